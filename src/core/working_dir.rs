//! Locating project checkouts and checking them against the base branch.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::project::ProjectContext;
use crate::utils::command;

pub trait WorkingDir: Send + Sync {
    /// Root of the checkout that `prj` runs against.
    fn repo_dir(&self, prj: &ProjectContext) -> Result<PathBuf>;

    /// Whether the base branch has moved on in a way the checkout does not
    /// contain. Any failure to find out is reported as "not diverged".
    fn has_diverged(&self, repo_dir: &Path) -> bool;
}

/// Checkouts laid out as `<root>/<owner>/<repo>/<pull>/<workspace>`.
#[derive(Debug, Clone)]
pub struct DataDirWorkingDir {
    pub root: PathBuf,
    /// Only merge-strategy checkouts can diverge from the base branch.
    pub check_divergence: bool,
}

impl DataDirWorkingDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            check_divergence: true,
        }
    }
}

impl WorkingDir for DataDirWorkingDir {
    fn repo_dir(&self, prj: &ProjectContext) -> Result<PathBuf> {
        let dir = self
            .root
            .join(&prj.base_repo.full_name)
            .join(prj.pull.num.to_string())
            .join(&prj.workspace);
        existing_dir(dir)
    }

    fn has_diverged(&self, repo_dir: &Path) -> bool {
        self.check_divergence && git_has_diverged(repo_dir)
    }
}

/// A single checkout used for every project, as the CLI does with `--dir`.
#[derive(Debug, Clone)]
pub struct CheckoutWorkingDir {
    pub path: PathBuf,
}

impl CheckoutWorkingDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WorkingDir for CheckoutWorkingDir {
    fn repo_dir(&self, _prj: &ProjectContext) -> Result<PathBuf> {
        existing_dir(self.path.clone())
    }

    fn has_diverged(&self, repo_dir: &Path) -> bool {
        git_has_diverged(repo_dir)
    }
}

fn existing_dir(dir: PathBuf) -> Result<PathBuf> {
    if dir.is_dir() {
        Ok(dir)
    } else {
        Err(Error::workdir_not_found(dir.to_string_lossy()))
    }
}

/// Refresh remote refs, then ask git whether local and upstream diverged.
pub fn git_has_diverged(repo_dir: &Path) -> bool {
    let dir = repo_dir.to_string_lossy();

    if let Err(e) = command::run_in(&dir, "git", &["fetch"], "git fetch") {
        tracing::warn!(dir = %dir, error = %e, "fetching to check divergence failed");
        return false;
    }

    match command::run_in(&dir, "git", &["status", "--untracked-files=no"], "git status") {
        Ok(status) => status.contains("have diverged"),
        Err(e) => {
            tracing::warn!(dir = %dir, error = %e, "checking git status for divergence failed");
            false
        }
    }
}
