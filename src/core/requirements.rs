//! Apply-eligibility gate.
//!
//! Requirements are checked in a fixed priority order regardless of how
//! they were configured, so the message a user sees is stable.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::project::{ProjectContext, ProjectPlanStatus};
use crate::working_dir::WorkingDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyRequirement {
    Approved,
    Mergeable,
    Undiverged,
    Unlocked,
    PoliciesPassed,
}

impl ApplyRequirement {
    /// Evaluation order. Policies come before mergeability because a
    /// mergeable check usually covers required status checks, policies
    /// among them.
    pub const PRIORITY: [ApplyRequirement; 5] = [
        ApplyRequirement::Approved,
        ApplyRequirement::PoliciesPassed,
        ApplyRequirement::Mergeable,
        ApplyRequirement::Undiverged,
        ApplyRequirement::Unlocked,
    ];

    pub fn failure_message(&self) -> &'static str {
        match self {
            ApplyRequirement::Approved => "Pull request must be approved by at least one person other than the author before running apply.",
            ApplyRequirement::PoliciesPassed => "All policies must pass for project before running apply",
            ApplyRequirement::Mergeable => "Pull request must be mergeable before running apply.",
            ApplyRequirement::Undiverged => "Default branch must be rebased onto pull request before running apply.",
            ApplyRequirement::Unlocked => "Pull request must be unlocked using the 🔓  emoji before running apply.",
        }
    }
}

#[derive(Clone)]
pub struct ApplyRequirementHandler {
    working_dir: Arc<dyn WorkingDir>,
}

impl ApplyRequirementHandler {
    pub fn new(working_dir: Arc<dyn WorkingDir>) -> Self {
        Self { working_dir }
    }

    /// First unmet requirement's message, or `None` when apply may run.
    pub fn validate_project(&self, repo_dir: &Path, prj: &ProjectContext) -> Option<String> {
        ApplyRequirement::PRIORITY
            .iter()
            .filter(|req| prj.apply_requirements.contains(req))
            .find(|req| !self.is_met(**req, repo_dir, prj))
            .map(|req| {
                tracing::info!(
                    repo = %prj.base_repo.full_name,
                    pull = prj.pull.num,
                    workspace = %prj.workspace,
                    requirement = ?req,
                    "apply requirement not met"
                );
                req.failure_message().to_string()
            })
    }

    fn is_met(&self, req: ApplyRequirement, repo_dir: &Path, prj: &ProjectContext) -> bool {
        match req {
            ApplyRequirement::Approved => prj.pull_status.approved,
            ApplyRequirement::PoliciesPassed => {
                prj.plan_status == ProjectPlanStatus::PassedPolicyCheck
            }
            ApplyRequirement::Mergeable => prj.pull_status.mergeable,
            ApplyRequirement::Undiverged => !self.working_dir.has_diverged(repo_dir),
            ApplyRequirement::Unlocked => !prj.pull_status.sq_locked,
        }
    }
}
