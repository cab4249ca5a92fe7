use std::path::Path;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::executor::EnvMap;
use crate::project::ProjectContext;

use super::run::RunStepRunner;

/// Computes the value an `env` step binds. The steps runner owns the map;
/// this only reads it.
#[derive(Debug, Clone)]
pub struct EnvStepRunner {
    run: Arc<RunStepRunner>,
}

impl EnvStepRunner {
    pub fn new(run: Arc<RunStepRunner>) -> Self {
        Self { run }
    }

    pub fn run(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        command: Option<&str>,
        value: Option<&str>,
        path: &Path,
        envs: &EnvMap,
    ) -> Result<String> {
        if let Some(value) = value {
            return Ok(value.to_string());
        }
        let Some(command) = command else {
            return Err(Error::validation_invalid_argument(
                "steps",
                "env step needs a value or a command",
                None,
                None,
            ));
        };

        let out = self.run.run(ctx, prj, command, path, envs)?;
        Ok(out.strip_suffix('\n').unwrap_or(&out).to_string())
    }
}
