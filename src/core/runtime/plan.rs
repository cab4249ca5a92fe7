use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::executor::{CommandExecutor, EnvMap};
use crate::project::{ProjectContext, DEFAULT_WORKSPACE};
use crate::utils::shell;

use super::plan_file::{self, REMOTE_OPS_HEADER};
use super::remote_apply::strip_refresh_output;
use super::StepRunner;

/// Printed by terraform when `-out` is used against a remote backend.
const REMOTE_OPS_ERROR: &str = "Error: Saving a generated plan is currently not supported";

pub struct PlanStepRunner {
    executor: Arc<dyn CommandExecutor>,
}

impl PlanStepRunner {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    fn terraform(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        path: &Path,
        args: &[String],
        envs: &EnvMap,
    ) -> Result<String> {
        self.executor.run_command_with_version(
            ctx,
            prj,
            path,
            args,
            envs,
            prj.terraform_version.as_ref(),
            &prj.workspace,
        )
    }

    /// Make sure terraform's selected workspace is the project's, creating
    /// it when it does not exist yet.
    fn switch_workspace(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        path: &Path,
        envs: &EnvMap,
    ) -> Result<()> {
        if prj.workspace == DEFAULT_WORKSPACE {
            return Ok(());
        }

        let current = self.terraform(ctx, prj, path, &words(&["workspace", "show"]), envs)?;
        if current.trim() == prj.workspace {
            return Ok(());
        }

        tracing::debug!(from = current.trim(), to = %prj.workspace, "switching terraform workspace");
        let select = words(&["workspace", "select", &prj.workspace]);
        if let Err(e) = self.terraform(ctx, prj, path, &select, envs) {
            if e.is_cancelled() {
                return Err(e);
            }
            let new = words(&["workspace", "new", &prj.workspace]);
            self.terraform(ctx, prj, path, &new, envs)?;
        }
        Ok(())
    }

    /// Remote backends can't save plans. Plan without `-out` and record the
    /// plan text behind the remote-ops marker so apply knows what to expect.
    fn remote_plan(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        extra_args: &[String],
        path: &Path,
        envs: &EnvMap,
    ) -> Result<String> {
        let mut args = words(&["plan", "-input=false", "-refresh"]);
        args.extend(extra_args.iter().cloned());
        args.extend(prj.escaped_comment_args.iter().cloned());

        let output = self.terraform(ctx, prj, path, &args, envs)?;

        let plan_path = plan_file::plan_path(path, prj);
        let recorded = format!("{}{}", REMOTE_OPS_HEADER, strip_refresh_output(&output));
        fs::write(&plan_path, recorded).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("write {}", plan_path.display())))
        })?;
        Ok(output)
    }
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl StepRunner for PlanStepRunner {
    fn run(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        extra_args: &[String],
        path: &Path,
        envs: &EnvMap,
    ) -> Result<String> {
        self.switch_workspace(ctx, prj, path, envs)?;

        let plan_path = plan_file::plan_path(path, prj);
        let mut args = words(&["plan", "-input=false", "-refresh", "-out"]);
        args.push(shell::double_quote(&plan_path.to_string_lossy()));
        args.extend(extra_args.iter().cloned());
        args.extend(prj.escaped_comment_args.iter().cloned());

        match self.terraform(ctx, prj, path, &args, envs) {
            Err(e) if e.message.contains(REMOTE_OPS_ERROR) => {
                tracing::info!(workspace = %prj.workspace, "backend runs remote operations, planning without -out");
                self.remote_plan(ctx, prj, extra_args, path, envs)
            }
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{args, RecordingExecutor};

    fn project(workspace: &str) -> ProjectContext {
        ProjectContext {
            workspace: workspace.to_string(),
            escaped_comment_args: args(&["-no-color"]),
            ..Default::default()
        }
    }

    #[test]
    fn plans_into_the_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        let exec = RecordingExecutor::new().respond(Ok("Plan: 1 to add".into()));
        let out = PlanStepRunner::new(exec.clone())
            .run(
                &RequestContext::new(),
                &project("default"),
                &args(&["-var", "a=b"]),
                dir.path(),
                &EnvMap::new(),
            )
            .unwrap();

        assert_eq!(out, "Plan: 1 to add");
        let calls = exec.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].args,
            vec![
                "plan".to_string(),
                "-input=false".to_string(),
                "-refresh".to_string(),
                "-out".to_string(),
                format!("\"{}\"", dir.path().join("default.tfplan").display()),
                "-var".to_string(),
                "a=b".to_string(),
                "-no-color".to_string(),
            ]
        );
    }

    #[test]
    fn creates_missing_workspace_before_planning() {
        let dir = tempfile::tempdir().unwrap();
        let exec = RecordingExecutor::new()
            .respond(Ok("default\n".into()))
            .respond(Err(Error::other("Workspace \"staging\" doesn't exist.")))
            .respond(Ok("Created and switched to workspace \"staging\"!".into()))
            .respond(Ok("plan output".into()));

        let out = PlanStepRunner::new(exec.clone())
            .run(&RequestContext::new(), &project("staging"), &[], dir.path(), &EnvMap::new())
            .unwrap();

        assert_eq!(out, "plan output");
        let calls: Vec<Vec<String>> = exec.calls().into_iter().map(|c| c.args).collect();
        assert_eq!(calls[0], args(&["workspace", "show"]));
        assert_eq!(calls[1], args(&["workspace", "select", "staging"]));
        assert_eq!(calls[2], args(&["workspace", "new", "staging"]));
        assert_eq!(calls[3][0], "plan");
    }

    #[test]
    fn already_selected_workspace_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let exec = RecordingExecutor::new().respond(Ok("staging\n".into()));
        PlanStepRunner::new(exec.clone())
            .run(&RequestContext::new(), &project("staging"), &[], dir.path(), &EnvMap::new())
            .unwrap();
        assert_eq!(exec.calls().len(), 2);
    }

    #[test]
    fn remote_backend_falls_back_and_records_plan() {
        let dir = tempfile::tempdir().unwrap();
        let remote_output = "Running plan in the remote backend.\n\nRefreshing state...\n------------------------------------------------------------------------\n\n  + null_resource.a\n\nPlan: 1 to add, 0 to change, 0 to destroy.\n";
        let exec = RecordingExecutor::new()
            .respond(Err(Error::other(
                "exit status 1\n\nError: Saving a generated plan is currently not supported\n",
            )))
            .respond(Ok(remote_output.into()));

        let out = PlanStepRunner::new(exec.clone())
            .run(&RequestContext::new(), &project("default"), &[], dir.path(), &EnvMap::new())
            .unwrap();

        assert_eq!(out, remote_output);
        assert_eq!(
            exec.calls()[1].args,
            args(&["plan", "-input=false", "-refresh", "-no-color"])
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("default.tfplan")).unwrap(),
            "Atlantis: this plan was created by remote ops\n\n  + null_resource.a\n\nPlan: 1 to add, 0 to change, 0 to destroy.\n"
        );
    }

    #[test]
    fn other_failures_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let exec = RecordingExecutor::new().respond(Err(Error::other("Error: Invalid reference")));
        let err = PlanStepRunner::new(exec.clone())
            .run(&RequestContext::new(), &project("default"), &[], dir.path(), &EnvMap::new())
            .unwrap_err();
        assert_eq!(err.message, "Error: Invalid reference");
        assert_eq!(exec.calls().len(), 1);
    }
}
