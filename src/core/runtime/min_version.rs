use semver::Version;
use std::path::Path;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::Result;
use crate::executor::EnvMap;
use crate::project::ProjectContext;
use crate::version::parse_tool_version;

use super::{effective_version, StepRunner};

/// Skips the wrapped step for terraform versions below a minimum, reporting
/// that as ordinary output so the remaining steps still run.
pub struct MinimumVersionGate {
    min_version: Version,
    default_version: Version,
    delegate: Arc<dyn StepRunner>,
}

impl MinimumVersionGate {
    pub fn new(min_version: &str, default_version: Version, delegate: Arc<dyn StepRunner>) -> Result<Self> {
        Ok(Self {
            min_version: parse_tool_version(min_version, "minimum_version")?,
            default_version,
            delegate,
        })
    }
}

impl StepRunner for MinimumVersionGate {
    fn run(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        extra_args: &[String],
        path: &Path,
        envs: &EnvMap,
    ) -> Result<String> {
        let version = effective_version(prj, &self.default_version);
        if version < self.min_version {
            tracing::debug!(%version, minimum = %self.min_version, "skipping step below minimum version");
            return Ok(format!(
                "Version: {} is unsupported for this step. Minimum version is: {}",
                version, self.min_version
            ));
        }
        self.delegate.run(ctx, prj, extra_args, path, envs)
    }
}
