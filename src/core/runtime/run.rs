use semver::Version;
use std::path::Path;

use crate::context::RequestContext;
use crate::error::{CommandFailedDetails, Error, Result};
use crate::executor::{self, EnvMap};
use crate::project::ProjectContext;

use super::{effective_version, plan_file};

/// Runs a user-supplied shell command with the project's context exported
/// as environment variables.
#[derive(Debug, Clone)]
pub struct RunStepRunner {
    default_version: Version,
}

impl RunStepRunner {
    pub fn new(default_version: Version) -> Self {
        Self { default_version }
    }

    /// Variables exported to custom commands. Entries from `envs` come last
    /// and override the built-ins.
    pub fn command_env(&self, prj: &ProjectContext, path: &Path, envs: &EnvMap) -> Vec<(String, String)> {
        let path_str = |p: &Path| p.to_string_lossy().to_string();
        let mut vars: Vec<(String, String)> = [
            ("TERRAFORM_VERSION", effective_version(prj, &self.default_version).to_string()),
            ("BASE_BRANCH_NAME", prj.pull.base_branch.clone()),
            ("BASE_REPO_NAME", prj.base_repo.name.clone()),
            ("BASE_REPO_OWNER", prj.base_repo.owner.clone()),
            ("COMMENT_ARGS", prj.escaped_comment_args.join(",")),
            ("DIR", path_str(path)),
            ("HEAD_BRANCH_NAME", prj.pull.head_branch.clone()),
            ("HEAD_COMMIT", prj.pull.head_commit.clone()),
            ("HEAD_REPO_NAME", prj.head_repo.name.clone()),
            ("HEAD_REPO_OWNER", prj.head_repo.owner.clone()),
            ("PLANFILE", path_str(&plan_file::plan_path(path, prj))),
            ("SHOWFILE", path_str(&plan_file::show_path(path, prj))),
            ("PROJECT_NAME", prj.project_name.clone()),
            ("PULL_AUTHOR", prj.pull.author.clone()),
            ("PULL_NUM", prj.pull.num.to_string()),
            ("REPO_REL_DIR", prj.repo_rel_dir.clone()),
            ("USER_NAME", prj.user.clone()),
            ("WORKSPACE", prj.workspace.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let mut custom: Vec<_> = envs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        custom.sort();
        vars.extend(custom);
        vars
    }

    pub fn run(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        command: &str,
        path: &Path,
        envs: &EnvMap,
    ) -> Result<String> {
        tracing::debug!(workspace = %prj.workspace, command, "running custom command");
        let vars = self.command_env(prj, path, envs);
        let out = executor::run_shell(ctx, command, path, &vars)?;

        if !out.success() {
            let message = format!(
                "{}: running {:?} in {:?}: \n{}",
                executor::describe_status(&out.status),
                command,
                path.display().to_string(),
                out.output
            );
            return Err(Error::command_failed(
                message,
                CommandFailedDetails {
                    command: command.to_string(),
                    dir: path.display().to_string(),
                    exit_code: out.exit_code(),
                    output: out.output,
                },
            ));
        }
        Ok(out.output)
    }
}
