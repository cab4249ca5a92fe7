//! Applying a generated plan.
//!
//! A plan file produced locally is applied directly and removed once the
//! apply succeeds. A plan file carrying the remote-ops marker only records
//! the plan text; the backend re-plans and [`RemoteApplyRunner`] confirms
//! it interactively.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::executor::{CommandExecutor, EnvMap};
use crate::project::ProjectContext;
use crate::utils::shell;

use super::plan_file;
use super::remote_apply::RemoteApplyRunner;
use super::StepRunner;

pub struct ApplyStepRunner {
    executor: Arc<dyn CommandExecutor>,
    remote: RemoteApplyRunner,
}

/// `apply -input=false <extra> <comment args>`
pub(crate) fn apply_args(prj: &ProjectContext, extra_args: &[String]) -> Vec<String> {
    let mut args = vec!["apply".to_string(), "-input=false".to_string()];
    args.extend(extra_args.iter().cloned());
    args.extend(prj.escaped_comment_args.iter().cloned());
    args
}

/// Whether `-target` was passed as a flag in either argument list. Comment
/// args arrive shell-escaped, so backslashes are ignored.
pub fn has_target_flag(prj: &ProjectContext, extra_args: &[String]) -> bool {
    prj.escaped_comment_args
        .iter()
        .chain(extra_args)
        .map(|arg| arg.replace('\\', ""))
        .any(|arg| arg == "-target" || arg.starts_with("-target="))
}

impl ApplyStepRunner {
    pub fn new(executor: Arc<dyn CommandExecutor>, remote: RemoteApplyRunner) -> Self {
        Self { executor, remote }
    }

    fn apply_local(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        extra_args: &[String],
        path: &Path,
        envs: &EnvMap,
        plan_path: &Path,
    ) -> Result<String> {
        let mut args = apply_args(prj, extra_args);
        args.push(shell::double_quote(&plan_path.to_string_lossy()));

        let output = self.executor.run_command_with_version(
            ctx,
            prj,
            path,
            &args,
            envs,
            prj.terraform_version.as_ref(),
            &prj.workspace,
        )?;

        if let Err(e) = fs::remove_file(plan_path) {
            tracing::warn!(plan = %plan_path.display(), error = %e, "failed to delete applied plan file");
        }
        Ok(output)
    }
}

impl StepRunner for ApplyStepRunner {
    fn run(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        extra_args: &[String],
        path: &Path,
        envs: &EnvMap,
    ) -> Result<String> {
        if has_target_flag(prj, extra_args) {
            return Err(Error::apply_target_not_allowed());
        }

        let plan_path = plan_file::plan_path(path, prj);
        let contents = match fs::read(&plan_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::plan_not_found(
                    &prj.repo_rel_dir,
                    &prj.workspace,
                    plan_path.to_string_lossy(),
                ))
            }
            Err(e) => {
                return Err(Error::internal_io(
                    e.to_string(),
                    Some(format!("read {}", plan_path.display())),
                ))
            }
        };

        match plan_file::recorded_remote_plan(&contents) {
            Some(recorded) => {
                tracing::info!(workspace = %prj.workspace, "plan was created by remote ops, applying remotely");
                self.remote.run(ctx, prj, extra_args, path, envs, &recorded)
            }
            None => self.apply_local(ctx, prj, extra_args, path, envs, &plan_path),
        }
    }
}
