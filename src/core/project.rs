//! Per-invocation project context.
//!
//! A `ProjectContext` is built once per project per command by the caller
//! and passed by reference through the whole pipeline. Nothing downstream
//! mutates it.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::requirements::ApplyRequirement;
use crate::step::Step;

/// The command a pipeline invocation is running for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    #[default]
    Plan,
    PolicyCheck,
    Apply,
    Version,
}

impl CommandName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::Plan => "plan",
            CommandName::PolicyCheck => "policy_check",
            CommandName::Apply => "apply",
            CommandName::Version => "version",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Repo {
    /// `owner/name`
    pub full_name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub clone_url: String,
}

impl Repo {
    pub fn new(full_name: &str) -> Self {
        let (owner, name) = full_name.split_once('/').unwrap_or(("", full_name));
        Self {
            full_name: full_name.to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
            clone_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PullRequest {
    pub num: u64,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub head_branch: String,
    #[serde(default)]
    pub base_branch: String,
    #[serde(default)]
    pub head_commit: String,
}

/// Point-in-time facts about the pull request, computed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PullReqStatus {
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub mergeable: bool,
    /// Locked by the submit queue.
    #[serde(default)]
    pub sq_locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPlanStatus {
    ErroredPlan,
    #[default]
    Planned,
    ErroredApply,
    Applied,
    DiscardedPlan,
    ErroredPolicyCheck,
    PassedPolicyCheck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProjectContext {
    #[serde(default)]
    pub command: CommandName,
    pub base_repo: Repo,
    #[serde(default)]
    pub head_repo: Repo,
    pub pull: PullRequest,
    #[serde(default)]
    pub user: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Empty when the project has no explicit name.
    #[serde(default)]
    pub project_name: String,
    #[serde(default = "default_repo_rel_dir")]
    pub repo_rel_dir: String,
    #[serde(
        default,
        with = "crate::version::serde_optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub terraform_version: Option<Version>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub escaped_comment_args: Vec<String>,
    #[serde(default)]
    pub apply_requirements: Vec<ApplyRequirement>,
    #[serde(default)]
    pub pull_status: PullReqStatus,
    #[serde(default)]
    pub plan_status: ProjectPlanStatus,
    #[serde(default)]
    pub status_id: String,
    #[serde(default)]
    pub job_id: String,
}

pub const DEFAULT_WORKSPACE: &str = "default";

fn default_workspace() -> String {
    DEFAULT_WORKSPACE.to_string()
}

fn default_repo_rel_dir() -> String {
    ".".to_string()
}

impl ProjectContext {
    /// Human-readable identifier used in logs and status contexts.
    pub fn display_name(&self) -> String {
        if self.project_name.is_empty() {
            format!("dir: {} workspace: {}", self.repo_rel_dir, self.workspace)
        } else {
            self.project_name.clone()
        }
    }
}
