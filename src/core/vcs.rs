//! Commit-status reporting.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::context::RequestContext;
use crate::defaults::GithubConfig;
use crate::error::{Error, Result};
use crate::project::{CommandName, ProjectContext};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VcsStatus {
    Pending,
    Success,
    Failed,
}

impl VcsStatus {
    fn description(&self) -> &'static str {
        match self {
            VcsStatus::Pending => "in progress...",
            VcsStatus::Success => "succeeded.",
            VcsStatus::Failed => "failed.",
        }
    }

    /// GitHub's commit status state for this status.
    pub fn github_state(&self) -> &'static str {
        match self {
            VcsStatus::Pending => "pending",
            VcsStatus::Success => "success",
            VcsStatus::Failed => "failure",
        }
    }
}

impl fmt::Display for VcsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VcsStatus::Pending => "pending",
            VcsStatus::Success => "success",
            VcsStatus::Failed => "failed",
        })
    }
}

pub trait VcsStatusUpdater: Send + Sync {
    /// Report `status` for one project. Returns the id of the status that
    /// was written so later updates can target it.
    fn update_project(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        command: CommandName,
        status: VcsStatus,
        run_url: &str,
        status_id: &str,
    ) -> Result<String>;
}

/// Identifier of a project within a status context.
pub fn project_identifier(prj: &ProjectContext) -> String {
    if prj.project_name.is_empty() {
        format!("{}/{}", prj.repo_rel_dir, prj.workspace)
    } else {
        prj.project_name.clone()
    }
}

pub fn status_context(status_name: &str, command: CommandName, prj: &ProjectContext) -> String {
    format!("{}/{}: {}", status_name, command, project_identifier(prj))
}

pub fn status_description(command: CommandName, status: VcsStatus) -> String {
    let title = match command {
        CommandName::Plan => "Plan",
        CommandName::PolicyCheck => "Policy check",
        CommandName::Apply => "Apply",
        CommandName::Version => "Version",
    };
    format!("{} {}", title, status.description())
}

/// Writes status updates to the log only.
#[derive(Debug, Clone)]
pub struct LogStatusUpdater {
    pub status_name: String,
}

impl LogStatusUpdater {
    pub fn new(status_name: impl Into<String>) -> Self {
        Self {
            status_name: status_name.into(),
        }
    }
}

impl VcsStatusUpdater for LogStatusUpdater {
    fn update_project(
        &self,
        _ctx: &RequestContext,
        prj: &ProjectContext,
        command: CommandName,
        status: VcsStatus,
        run_url: &str,
        status_id: &str,
    ) -> Result<String> {
        let id = if status_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            status_id.to_string()
        };

        tracing::info!(
            context = %status_context(&self.status_name, command, prj),
            status = %status,
            url = run_url,
            status_id = %id,
            "{}",
            status_description(command, status)
        );
        log_status!("status", "{} {}", project_identifier(prj), status_description(command, status));

        Ok(id)
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct GithubStatusPayload {
    pub state: &'static str,
    pub target_url: String,
    pub description: String,
    pub context: String,
}

/// Posts commit statuses to GitHub or GitHub Enterprise.
pub struct GithubStatusUpdater {
    config: GithubConfig,
    status_name: String,
    client: reqwest::blocking::Client,
}

impl GithubStatusUpdater {
    pub fn new(config: GithubConfig, status_name: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("tfgate/{}", VERSION))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::internal_io(e.to_string(), Some("create HTTP client".to_string())))?;

        Ok(Self {
            config,
            status_name: status_name.into(),
            client,
        })
    }

    fn api_base(&self) -> String {
        if self.config.hostname == "github.com" {
            "https://api.github.com".to_string()
        } else {
            format!("https://{}/api/v3", self.config.hostname)
        }
    }

    pub fn statuses_url(&self, prj: &ProjectContext) -> String {
        format!(
            "{}/repos/{}/statuses/{}",
            self.api_base(),
            prj.base_repo.full_name,
            prj.pull.head_commit
        )
    }

    pub fn payload(
        &self,
        prj: &ProjectContext,
        command: CommandName,
        status: VcsStatus,
        run_url: &str,
    ) -> GithubStatusPayload {
        GithubStatusPayload {
            state: status.github_state(),
            target_url: run_url.to_string(),
            description: status_description(command, status),
            context: status_context(&self.status_name, command, prj),
        }
    }
}

#[derive(serde::Deserialize)]
struct GithubStatusResponse {
    id: u64,
}

impl VcsStatusUpdater for GithubStatusUpdater {
    fn update_project(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        command: CommandName,
        status: VcsStatus,
        run_url: &str,
        _status_id: &str,
    ) -> Result<String> {
        // Final states post even after a cancel.
        if status == VcsStatus::Pending {
            ctx.check("status update")?;
        }

        let url = self.statuses_url(prj);
        let payload = self.payload(prj, command, status, run_url);
        tracing::debug!(url = %url, state = payload.state, context = %payload.context, "posting commit status");

        let mut request = self
            .client
            .post(&url)
            .header("Accept", "application/vnd.github+json")
            .json(&payload);
        if !self.config.token.is_empty() {
            request = request.bearer_auth(&self.config.token);
        }

        let response = request
            .send()
            .map_err(|e| Error::vcs_status_failed(format!("posting status to {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::vcs_status_failed(format!(
                "posting status to {}: HTTP {}",
                url,
                response.status()
            )));
        }

        let body: GithubStatusResponse = response.json().map_err(|e| {
            Error::internal_json(e.to_string(), Some("parse GitHub status response".to_string()))
        })?;
        Ok(body.id.to_string())
    }
}
