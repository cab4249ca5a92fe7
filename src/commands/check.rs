use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use tfgate::defaults;

use super::CmdResult;

#[derive(Args)]
pub struct CheckArgs {
    /// Project file (JSON or YAML, `-` for stdin). Repeat for several projects.
    #[arg(long = "project", short = 'p', required = true)]
    projects: Vec<String>,

    /// Repository checkout the projects live in
    #[arg(long, default_value = ".")]
    dir: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct ProjectCheck {
    project: String,
    workspace: String,
    repo_rel_dir: String,
    eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckOutput {
    command: String,
    eligible: bool,
    projects: Vec<ProjectCheck>,
}

pub fn run(args: CheckArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<CheckOutput> {
    let defaults = defaults::load_defaults();
    let projects = super::load_projects(&args.projects)?;
    let runner = super::build_runner(&defaults, &args.dir)?;

    let mut checks = Vec::with_capacity(projects.len());
    for prj in &projects {
        let failure = runner.check_apply_requirements(prj)?;
        checks.push(ProjectCheck {
            project: prj.display_name(),
            workspace: prj.workspace.clone(),
            repo_rel_dir: prj.repo_rel_dir.clone(),
            eligible: failure.is_none(),
            failure,
        });
    }

    let eligible = checks.iter().all(|c| c.eligible);
    Ok((
        CheckOutput {
            command: "check".to_string(),
            eligible,
            projects: checks,
        },
        if eligible { 0 } else { 1 },
    ))
}
