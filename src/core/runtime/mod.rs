//! Step runners and the interpreter that sequences them.
//!
//! Every runner that wraps terraform implements [`StepRunner`]. `env` and
//! `run` steps take a command instead of extra args and have their own
//! entry points.

pub mod apply;
pub mod command_step;
pub mod env;
pub mod min_version;
pub mod plan;
pub mod plan_file;
pub mod remote_apply;
pub mod run;
pub mod steps;

use semver::Version;
use std::path::Path;

use crate::context::RequestContext;
use crate::error::Result;
use crate::project::ProjectContext;

pub use crate::executor::EnvMap;
pub use apply::ApplyStepRunner;
pub use command_step::{CommandStepRunner, CommandTemplate};
pub use env::EnvStepRunner;
pub use min_version::MinimumVersionGate;
pub use plan::PlanStepRunner;
pub use remote_apply::{PlanComparison, RemoteApplyRunner};
pub use run::RunStepRunner;
pub use steps::StepsRunner;

pub trait StepRunner: Send + Sync {
    /// Run one step in `path` (the project directory) and return its output.
    fn run(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        extra_args: &[String],
        path: &Path,
        envs: &EnvMap,
    ) -> Result<String>;
}

/// The project's pinned terraform version, else `default`.
pub fn effective_version(prj: &ProjectContext, default: &Version) -> Version {
    prj.terraform_version
        .clone()
        .unwrap_or_else(|| default.clone())
}
