use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tfgate::defaults::Defaults;
use tfgate::executor::LocalExecutor;
use tfgate::locking::WorkingDirLocker;
use tfgate::runtime::steps::{Executors, StepsRunner};
use tfgate::vcs::{GithubStatusUpdater, LogStatusUpdater, VcsStatusUpdater};
use tfgate::working_dir::CheckoutWorkingDir;
use tfgate::{ProjectCommandRunner, ProjectContext};

pub type CmdResult<T> = tfgate::Result<(T, i32)>;

pub(crate) struct GlobalArgs {}

pub mod check;
pub mod config;
pub mod run;

// ============================================================================
// Project input (CLI layer)
// ============================================================================

/// A project file holds either one project or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProjectFile {
    Many(Vec<ProjectContext>),
    One(Box<ProjectContext>),
}

/// Read a project spec from a file path, or stdin (-).
fn read_project_source(source: &str) -> tfgate::Result<String> {
    use std::io::IsTerminal;

    if source.trim() == "-" {
        let mut buf = String::new();
        let mut stdin = std::io::stdin();
        if stdin.is_terminal() {
            return Err(tfgate::Error::validation_invalid_argument(
                "project",
                "Cannot read project from stdin when stdin is a TTY",
                None,
                None,
            ));
        }
        stdin.read_to_string(&mut buf).map_err(|e| {
            tfgate::Error::internal_io(e.to_string(), Some("read stdin".to_string()))
        })?;
        return Ok(buf);
    }

    std::fs::read_to_string(Path::new(source))
        .map_err(|e| tfgate::Error::internal_io(e.to_string(), Some(format!("read {}", source))))
}

fn is_yaml(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.ends_with(".yaml") || lower.ends_with(".yml")
}

/// Parse project contexts from JSON, or YAML when the file says so.
pub(crate) fn parse_projects(raw: &str, source: &str) -> tfgate::Result<Vec<ProjectContext>> {
    let context = Some(format!("parse project {}", source));
    let file: ProjectFile = if is_yaml(source) {
        serde_yml::from_str(raw).map_err(|e| tfgate::Error::validation_invalid_json(e, context))?
    } else {
        serde_json::from_str(raw).map_err(|e| tfgate::Error::validation_invalid_json(e, context))?
    };

    Ok(match file {
        ProjectFile::Many(projects) => projects,
        ProjectFile::One(project) => vec![*project],
    })
}

pub(crate) fn load_projects(sources: &[String]) -> tfgate::Result<Vec<ProjectContext>> {
    let mut projects = Vec::new();
    for source in sources {
        let raw = read_project_source(source)?;
        projects.extend(parse_projects(&raw, source)?);
    }

    if projects.is_empty() {
        return Err(tfgate::Error::validation_invalid_argument(
            "project",
            "No projects found in the given project files",
            None,
            None,
        ));
    }
    Ok(projects)
}

// ============================================================================
// Runner wiring
// ============================================================================

fn status_updater(defaults: &Defaults) -> tfgate::Result<Arc<dyn VcsStatusUpdater>> {
    Ok(match &defaults.github {
        Some(github) => Arc::new(GithubStatusUpdater::new(
            github.clone(),
            defaults.vcs_status_name.clone(),
        )?),
        None => Arc::new(LogStatusUpdater::new(defaults.vcs_status_name.clone())),
    })
}

/// Build a project runner over a single checkout at `dir`.
pub(crate) fn build_runner(defaults: &Defaults, dir: &Path) -> tfgate::Result<ProjectCommandRunner> {
    let terraform = Arc::new(LocalExecutor::from_defaults(defaults));
    let policy = Arc::new(LocalExecutor::new(defaults.conftest_binary.clone(), None));
    let updater = status_updater(defaults)?;

    let steps = StepsRunner::build(
        defaults,
        Executors {
            terraform: terraform.clone(),
            terraform_async: terraform,
            policy,
            updater: updater.clone(),
        },
    )?;

    Ok(ProjectCommandRunner::new(
        WorkingDirLocker::new(),
        Arc::new(CheckoutWorkingDir::new(dir)),
        steps,
        updater,
    ))
}

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (tfgate::Result<serde_json::Value>, i32) {
    crate::tty::status("tfgate is working...");

    match command {
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Check(args) => dispatch!(args, global, check),
        crate::Commands::Config(args) => dispatch!(args, global, config),
    }
}
