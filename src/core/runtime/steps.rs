//! The step interpreter.

use semver::Version;
use std::path::Path;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::defaults::Defaults;
use crate::error::Result;
use crate::executor::{AsyncCommandExecutor, CommandExecutor, EnvMap};
use crate::project::ProjectContext;
use crate::step::Step;
use crate::vcs::VcsStatusUpdater;
use crate::version::parse_tool_version;

use super::{
    ApplyStepRunner, CommandStepRunner, CommandTemplate, EnvStepRunner, MinimumVersionGate,
    PlanStepRunner, RemoteApplyRunner, RunStepRunner, StepRunner,
};

/// Executes a project's steps in order, threading one environment map
/// through them.
pub struct StepsRunner {
    pub init: Arc<dyn StepRunner>,
    pub plan: Arc<dyn StepRunner>,
    pub show: Arc<dyn StepRunner>,
    pub policy_check: Arc<dyn StepRunner>,
    pub version: Arc<dyn StepRunner>,
    pub apply: Arc<dyn StepRunner>,
    pub run: Arc<RunStepRunner>,
    pub env: EnvStepRunner,
}

/// Collaborators the standard runners are built from.
pub struct Executors {
    pub terraform: Arc<dyn CommandExecutor>,
    pub terraform_async: Arc<dyn AsyncCommandExecutor>,
    /// Runs the policy tool rather than terraform.
    pub policy: Arc<dyn CommandExecutor>,
    pub updater: Arc<dyn VcsStatusUpdater>,
}

impl StepsRunner {
    /// Standard runners. Show and policy check are gated on the configured
    /// minimum versions.
    pub fn build(defaults: &Defaults, executors: Executors) -> Result<Self> {
        let default_version = default_version(defaults)?;
        let run = Arc::new(RunStepRunner::new(default_version.clone()));

        let show = MinimumVersionGate::new(
            &defaults.show_minimum_version,
            default_version.clone(),
            Arc::new(CommandStepRunner::new(executors.terraform.clone(), CommandTemplate::Show)),
        )?;
        let policy_check = MinimumVersionGate::new(
            &defaults.policy_check_minimum_version,
            default_version.clone(),
            Arc::new(
                CommandStepRunner::new(executors.policy, CommandTemplate::PolicyCheck)
                    .with_policy_paths(defaults.policy_paths.clone()),
            ),
        )?;

        Ok(Self {
            init: Arc::new(CommandStepRunner::new(executors.terraform.clone(), CommandTemplate::Init)),
            plan: Arc::new(PlanStepRunner::new(executors.terraform.clone())),
            show: Arc::new(show),
            policy_check: Arc::new(policy_check),
            version: Arc::new(CommandStepRunner::new(executors.terraform.clone(), CommandTemplate::Version)),
            apply: Arc::new(ApplyStepRunner::new(
                executors.terraform,
                RemoteApplyRunner::new(executors.terraform_async, executors.updater, defaults.plan_comparison),
            )),
            env: EnvStepRunner::new(run.clone()),
            run,
        })
    }

    fn runner_for<'a>(&'a self, step: &'a Step) -> Option<(&'a dyn StepRunner, &'a [String])> {
        let (runner, extra_args) = match step {
            Step::Init { extra_args } => (&self.init, extra_args),
            Step::Plan { extra_args } => (&self.plan, extra_args),
            Step::Show { extra_args } => (&self.show, extra_args),
            Step::PolicyCheck { extra_args } => (&self.policy_check, extra_args),
            Step::Version { extra_args } => (&self.version, extra_args),
            Step::Apply { extra_args } => (&self.apply, extra_args),
            Step::Env { .. } | Step::Run { .. } => return None,
        };
        Some((runner.as_ref(), extra_args.as_slice()))
    }

    /// Run every step of `prj` in `path`. Returns the non-empty outputs
    /// joined by newlines, or the first error on its own.
    pub fn run(&self, ctx: &RequestContext, prj: &ProjectContext, path: &Path) -> Result<String> {
        let mut envs = EnvMap::new();
        let mut outputs: Vec<String> = Vec::new();

        for step in &prj.steps {
            ctx.check(&format!("{} step", step.kind()))?;
            tracing::debug!(
                repo = %prj.base_repo.full_name,
                pull = prj.pull.num,
                workspace = %prj.workspace,
                step = step.kind(),
                "running step"
            );

            let output = match step {
                Step::Env { name, value, command } => {
                    let bound = self.env.run(
                        ctx,
                        prj,
                        command.as_deref(),
                        value.as_deref(),
                        path,
                        &envs,
                    )?;
                    envs.insert(name.clone(), bound);
                    continue;
                }
                Step::Run { command } => self.run.run(ctx, prj, command, path, &envs)?,
                _ => match self.runner_for(step) {
                    Some((runner, extra_args)) => runner.run(ctx, prj, extra_args, path, &envs)?,
                    None => continue,
                },
            };

            if !output.is_empty() {
                outputs.push(output);
            }
        }

        Ok(outputs.join("\n"))
    }
}

/// Default terraform version from config, for callers that need it outside
/// the runners.
pub fn default_version(defaults: &Defaults) -> Result<Version> {
    parse_tool_version(&defaults.default_tf_version, "default_tf_version")
}
