// Public modules
pub mod context;
pub mod error;
pub mod executor;
pub mod locking;
pub mod project;
pub mod project_runner;
pub mod requirements;
pub mod runtime;
pub mod step;
pub mod vcs;
pub mod version;
pub mod working_dir;

// Internal modules - not part of public API
pub(crate) mod paths;

// Public modules for CLI access
pub mod defaults;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export common types for convenience
pub use context::RequestContext;
pub use error::{Error, ErrorCode, Result};
pub use project::{CommandName, ProjectContext};
pub use project_runner::{ProjectCommandRunner, ProjectResult};
