//! Plan file naming and the remote-ops marker.

use std::path::{Path, PathBuf};

use crate::project::ProjectContext;

/// First line of a plan file written for a remote backend. Everything after
/// it is the plan text recorded at plan time.
pub const REMOTE_OPS_HEADER: &str = "Atlantis: this plan was created by remote ops\n";

/// `<workspace>.tfplan`, or `<project>-<workspace>.tfplan` for named
/// projects. `/` in project names is written as `::`.
pub fn plan_filename(workspace: &str, project_name: &str) -> String {
    if project_name.is_empty() {
        format!("{}.tfplan", workspace)
    } else {
        format!("{}-{}.tfplan", project_name.replace('/', "::"), workspace)
    }
}

pub fn plan_path(project_dir: &Path, prj: &ProjectContext) -> PathBuf {
    project_dir.join(plan_filename(&prj.workspace, &prj.project_name))
}

/// JSON rendering of the plan, consumed by policy checks.
pub fn show_path(project_dir: &Path, prj: &ProjectContext) -> PathBuf {
    plan_path(project_dir, prj).with_extension("json")
}

/// Recorded plan text if `contents` came from a remote-ops plan.
pub fn recorded_remote_plan(contents: &[u8]) -> Option<String> {
    contents
        .strip_prefix(REMOTE_OPS_HEADER.as_bytes())
        .map(|rest| String::from_utf8_lossy(rest).to_string())
}
