use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::executor::{CommandExecutor, EnvMap};
use crate::project::ProjectContext;
use crate::utils::shell;

use super::plan_file;
use super::StepRunner;

/// Argument template for the steps that are a single tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTemplate {
    /// `init -input=false`
    Init,
    /// `show -no-color -json <planfile>`, output written to the show file
    Show,
    /// `test <showfile> -p <policy path>...`, run with the policy tool
    PolicyCheck,
    /// `version`
    Version,
}

/// One runner for init, show, policy check and version. Extra args are
/// appended to the template.
pub struct CommandStepRunner {
    executor: Arc<dyn CommandExecutor>,
    template: CommandTemplate,
    policy_paths: Vec<String>,
}

impl CommandStepRunner {
    pub fn new(executor: Arc<dyn CommandExecutor>, template: CommandTemplate) -> Self {
        Self {
            executor,
            template,
            policy_paths: Vec::new(),
        }
    }

    pub fn with_policy_paths(mut self, policy_paths: Vec<String>) -> Self {
        self.policy_paths = policy_paths;
        self
    }

    pub fn args(&self, prj: &ProjectContext, extra_args: &[String], path: &Path) -> Vec<String> {
        let mut args: Vec<String> = match self.template {
            CommandTemplate::Init => vec!["init".into(), "-input=false".into()],
            CommandTemplate::Show => vec![
                "show".into(),
                "-no-color".into(),
                "-json".into(),
                shell::double_quote(&plan_file::plan_path(path, prj).to_string_lossy()),
            ],
            CommandTemplate::PolicyCheck => {
                let mut args = vec![
                    "test".into(),
                    shell::double_quote(&plan_file::show_path(path, prj).to_string_lossy()),
                ];
                for policy in &self.policy_paths {
                    args.push("-p".into());
                    args.push(shell::double_quote(policy));
                }
                args
            }
            CommandTemplate::Version => vec!["version".into()],
        };
        args.extend(extra_args.iter().cloned());
        args
    }
}

impl StepRunner for CommandStepRunner {
    fn run(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        extra_args: &[String],
        path: &Path,
        envs: &EnvMap,
    ) -> Result<String> {
        let args = self.args(prj, extra_args, path);
        if self.template != CommandTemplate::Show {
            return self.executor.run_command_with_version(
                ctx,
                prj,
                path,
                &args,
                envs,
                prj.terraform_version.as_ref(),
                &prj.workspace,
            );
        }

        let output = self.executor.run_command_stdout_with_version(
            ctx,
            prj,
            path,
            &args,
            envs,
            prj.terraform_version.as_ref(),
            &prj.workspace,
        )?;
        let show_file = plan_file::show_path(path, prj);
        fs::write(&show_file, &output).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("write {}", show_file.display())))
        })?;
        Ok(String::new())
    }
}
