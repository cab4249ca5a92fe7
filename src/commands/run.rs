use clap::{Args, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};

use tfgate::defaults::{self, Defaults};
use tfgate::log_status;
use tfgate::project::ProjectPlanStatus;
use tfgate::{CommandName, ProjectContext, ProjectResult, RequestContext};

use super::CmdResult;

#[derive(Args)]
pub struct RunArgs {
    /// Command whose steps to run
    #[arg(value_enum)]
    command: RunCommand,

    /// Project file (JSON or YAML, `-` for stdin). Repeat for several projects.
    #[arg(long = "project", short = 'p', required = true)]
    projects: Vec<String>,

    /// Repository checkout the projects live in
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Projects to run at once (defaults to parallel_pool_size)
    #[arg(long)]
    parallel: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RunCommand {
    Plan,
    PolicyCheck,
    Apply,
    Version,
}

impl From<RunCommand> for CommandName {
    fn from(command: RunCommand) -> Self {
        match command {
            RunCommand::Plan => CommandName::Plan,
            RunCommand::PolicyCheck => CommandName::PolicyCheck,
            RunCommand::Apply => CommandName::Apply,
            RunCommand::Version => CommandName::Version,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectRunOutput {
    #[serde(flatten)]
    result: ProjectResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan_status: Option<ProjectPlanStatus>,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    command: String,
    succeeded: usize,
    failed: usize,
    results: Vec<ProjectRunOutput>,
}

pub fn run(args: RunArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<RunOutput> {
    let command: CommandName = args.command.into();
    let defaults = defaults::load_defaults();
    let pool_size = args.parallel.unwrap_or(defaults.parallel_pool_size);

    let ctx = RequestContext::new();
    crate::interrupt::cancel_on_interrupt(&ctx);
    let results = run_projects(&ctx, &defaults, command, &args.projects, &args.dir, pool_size)?;

    Ok(summarize(command, results))
}

fn run_projects(
    ctx: &RequestContext,
    defaults: &Defaults,
    command: CommandName,
    sources: &[String],
    dir: &Path,
    pool_size: usize,
) -> tfgate::Result<Vec<ProjectResult>> {
    let projects: Vec<ProjectContext> = super::load_projects(sources)?
        .into_iter()
        .map(|prj| for_command(prj, command))
        .collect();

    let runner = super::build_runner(defaults, dir)?;
    log_status!("run", "Running {} for {} project(s)", command, projects.len());

    Ok(runner.run_all(ctx, &projects, pool_size))
}

/// Point a loaded project at `command`. Steps written for another command
/// are dropped so the command's default workflow runs instead.
fn for_command(mut prj: ProjectContext, command: CommandName) -> ProjectContext {
    if prj.command != command {
        prj.steps.clear();
    }
    prj.command = command;
    prj
}

fn summarize(command: CommandName, results: Vec<ProjectResult>) -> (RunOutput, i32) {
    let succeeded = results.iter().filter(|r| r.is_successful()).count();
    let failed = results.len() - succeeded;
    let results = results
        .into_iter()
        .map(|result| ProjectRunOutput {
            plan_status: result.plan_status(),
            result,
        })
        .collect();

    let exit_code = if failed == 0 { 0 } else { 1 };
    (
        RunOutput {
            command: format!("run.{}", command),
            succeeded,
            failed,
            results,
        },
        exit_code,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tfgate::step::Step;

    const PLAN_STEPS_PROJECT: &str = r#"{
        "base_repo": {"full_name": "acme/infra"},
        "pull": {"num": 7},
        "workspace": "default",
        "steps": [{"step": "init"}, {"step": "plan"}]
    }"#;

    #[test]
    fn steps_for_another_command_fall_back_to_defaults() {
        let prj = crate::commands::parse_projects(PLAN_STEPS_PROJECT, "project.json")
            .unwrap()
            .remove(0);
        assert_eq!(prj.command, CommandName::Plan);

        let apply = for_command(prj.clone(), CommandName::Apply);
        assert_eq!(apply.command, CommandName::Apply);
        assert!(apply.steps.is_empty());

        let plan = for_command(prj, CommandName::Plan);
        assert_eq!(plan.steps, vec![Step::init(), Step::plan()]);
    }

    #[cfg(unix)]
    #[test]
    fn apply_with_plan_steps_project_runs_apply() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let terraform = dir.path().join("terraform");
        std::fs::write(
            &terraform,
            "#!/bin/sh\necho \"$*\" >> \"$DIR/calls.log\"\necho \"ran $1\"\n",
        )
        .unwrap();
        let mut perms = std::fs::metadata(&terraform).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&terraform, perms).unwrap();

        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("default.tfplan"), "binary plan").unwrap();
        let project_file = dir.path().join("project.json");
        std::fs::write(&project_file, PLAN_STEPS_PROJECT).unwrap();

        let defaults = Defaults {
            terraform_binary: terraform.display().to_string(),
            ..Defaults::default()
        };
        let results = run_projects(
            &RequestContext::new(),
            &defaults,
            CommandName::Apply,
            &[project_file.display().to_string()],
            &repo,
            1,
        )
        .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].is_successful(), "{:?}", results[0].error);
        assert_eq!(results[0].output.as_deref(), Some("ran apply\n"));
        let calls = std::fs::read_to_string(repo.join("calls.log")).unwrap();
        assert!(calls.starts_with("apply -input=false"), "{}", calls);
        assert!(!calls.contains("plan -input=false"));
        assert!(!repo.join("default.tfplan").exists());
    }
}
