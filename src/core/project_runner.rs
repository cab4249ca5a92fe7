//! Runs one command for one project: working directory, apply gate, lock
//! and steps, in that order.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::locking::WorkingDirLocker;
use crate::project::{CommandName, ProjectContext, ProjectPlanStatus};
use crate::requirements::ApplyRequirementHandler;
use crate::runtime::StepsRunner;
use crate::step::{self, Step};
use crate::vcs::{VcsStatus, VcsStatusUpdater};
use crate::working_dir::WorkingDir;

#[derive(Debug, Clone, Serialize)]
pub struct ProjectResult {
    pub command: CommandName,
    pub repo_rel_dir: String,
    pub workspace: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub project_name: String,
    /// Output of a successful run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Why the command was not run, e.g. an unmet apply requirement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<Error>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub job_id: String,
    pub finished_at: DateTime<Utc>,
}

fn serialize_error<S: Serializer>(error: &Option<Error>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serde_json::json!({
            "code": e.code.as_str(),
            "message": e.message,
            "details": e.details,
        })
        .serialize(serializer),
        None => serializer.serialize_none(),
    }
}

enum Outcome {
    Output(String),
    Failure(String),
}

impl ProjectResult {
    fn new(prj: &ProjectContext, command: CommandName, outcome: Result<Outcome>) -> Self {
        let (output, failure, error) = match outcome {
            Ok(Outcome::Output(out)) => (Some(out), None, None),
            Ok(Outcome::Failure(failure)) => (None, Some(failure), None),
            Err(e) => (None, None, Some(e)),
        };
        Self {
            command,
            repo_rel_dir: prj.repo_rel_dir.clone(),
            workspace: prj.workspace.clone(),
            project_name: prj.project_name.clone(),
            output,
            failure,
            error,
            status_id: prj.status_id.clone(),
            job_id: prj.job_id.clone(),
            finished_at: Utc::now(),
        }
    }

    pub fn vcs_status(&self) -> VcsStatus {
        if self.error.is_some() || self.failure.is_some() {
            VcsStatus::Failed
        } else {
            VcsStatus::Success
        }
    }

    /// Plan status this result moves the project to. `version` leaves it
    /// unchanged.
    pub fn plan_status(&self) -> Option<ProjectPlanStatus> {
        let failed = self.vcs_status() == VcsStatus::Failed;
        let status = match (self.command, failed) {
            (CommandName::Plan, true) => ProjectPlanStatus::ErroredPlan,
            (CommandName::Plan, false) => ProjectPlanStatus::Planned,
            (CommandName::PolicyCheck, true) => ProjectPlanStatus::ErroredPolicyCheck,
            (CommandName::PolicyCheck, false) => ProjectPlanStatus::PassedPolicyCheck,
            (CommandName::Apply, true) => ProjectPlanStatus::ErroredApply,
            (CommandName::Apply, false) => ProjectPlanStatus::Applied,
            (CommandName::Version, _) => return None,
        };
        Some(status)
    }

    pub fn is_successful(&self) -> bool {
        self.output.is_some()
    }
}

pub struct ProjectCommandRunner {
    locker: WorkingDirLocker,
    working_dir: Arc<dyn WorkingDir>,
    requirements: ApplyRequirementHandler,
    steps: StepsRunner,
    updater: Arc<dyn VcsStatusUpdater>,
}

impl ProjectCommandRunner {
    pub fn new(
        locker: WorkingDirLocker,
        working_dir: Arc<dyn WorkingDir>,
        steps: StepsRunner,
        updater: Arc<dyn VcsStatusUpdater>,
    ) -> Self {
        Self {
            requirements: ApplyRequirementHandler::new(working_dir.clone()),
            locker,
            working_dir,
            steps,
            updater,
        }
    }

    pub fn plan(&self, ctx: &RequestContext, prj: &ProjectContext) -> ProjectResult {
        self.run_command(ctx, prj, CommandName::Plan)
    }

    pub fn policy_check(&self, ctx: &RequestContext, prj: &ProjectContext) -> ProjectResult {
        self.run_command(ctx, prj, CommandName::PolicyCheck)
    }

    pub fn apply(&self, ctx: &RequestContext, prj: &ProjectContext) -> ProjectResult {
        self.run_command(ctx, prj, CommandName::Apply)
    }

    pub fn version(&self, ctx: &RequestContext, prj: &ProjectContext) -> ProjectResult {
        self.run_command(ctx, prj, CommandName::Version)
    }

    /// Run the command named by `prj.command`.
    pub fn run(&self, ctx: &RequestContext, prj: &ProjectContext) -> ProjectResult {
        self.run_command(ctx, prj, prj.command)
    }

    /// Apply-gate verdict without running anything.
    pub fn check_apply_requirements(&self, prj: &ProjectContext) -> Result<Option<String>> {
        let repo_dir = self.working_dir.repo_dir(prj)?;
        Ok(self.requirements.validate_project(&repo_dir, prj))
    }

    /// Run `prj.command` for every project, at most `pool_size` at a time.
    /// Results come back in input order.
    pub fn run_all(
        &self,
        ctx: &RequestContext,
        projects: &[ProjectContext],
        pool_size: usize,
    ) -> Vec<ProjectResult> {
        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<Option<ProjectResult>>> = Mutex::new(vec![None; projects.len()]);
        let workers = pool_size.clamp(1, projects.len().max(1));

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(prj) = projects.get(idx) else { break };
                    let result = self.run_isolated(ctx, prj);
                    if let Ok(mut results) = results.lock() {
                        results[idx] = Some(result);
                    }
                });
            }
        });

        results
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .into_iter()
            .zip(projects)
            .map(|(result, prj)| {
                result.unwrap_or_else(|| {
                    ProjectResult::new(
                        prj,
                        prj.command,
                        Err(Error::internal_unexpected("project produced no result")),
                    )
                })
            })
            .collect()
    }

    /// A panicking project becomes an errored result instead of taking its
    /// siblings down.
    fn run_isolated(&self, ctx: &RequestContext, prj: &ProjectContext) -> ProjectResult {
        panic::catch_unwind(AssertUnwindSafe(|| self.run(ctx, prj))).unwrap_or_else(|_| {
            tracing::error!(project = %prj.display_name(), "project runner panicked");
            ProjectResult::new(
                prj,
                prj.command,
                Err(Error::internal_unexpected("project runner panicked")),
            )
        })
    }

    fn run_command(&self, ctx: &RequestContext, prj: &ProjectContext, command: CommandName) -> ProjectResult {
        let prj = with_default_steps(prj, command);
        tracing::info!(
            repo = %prj.base_repo.full_name,
            pull = prj.pull.num,
            workspace = %prj.workspace,
            project = %prj.display_name(),
            command = %command,
            "running project command"
        );

        let status_id = self
            .update_status(ctx, &prj, command, VcsStatus::Pending, &prj.status_id)
            .unwrap_or_else(|| prj.status_id.clone());
        let mut result = ProjectResult::new(&prj, command, self.execute(ctx, &prj, command));
        result.status_id = self
            .update_status(ctx, &prj, command, result.vcs_status(), &status_id)
            .unwrap_or(status_id);

        match (&result.error, &result.failure) {
            (Some(e), _) => tracing::warn!(code = e.code.as_str(), error = %e, "project command errored"),
            (None, Some(f)) => tracing::info!(failure = %f, "project command not run"),
            (None, None) => tracing::info!("project command succeeded"),
        }
        result
    }

    fn execute(&self, ctx: &RequestContext, prj: &ProjectContext, command: CommandName) -> Result<Outcome> {
        let repo_dir = self.working_dir.repo_dir(prj)?;

        if command == CommandName::Apply {
            if let Some(failure) = self.requirements.validate_project(&repo_dir, prj) {
                return Ok(Outcome::Failure(failure));
            }
        }

        let lock = self
            .locker
            .try_lock(&prj.base_repo.full_name, prj.pull.num, &prj.workspace)?;
        let output = self.steps.run(ctx, prj, &repo_dir.join(&prj.repo_rel_dir));
        lock.release();

        output.map(Outcome::Output)
    }

    fn update_status(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        command: CommandName,
        status: VcsStatus,
        status_id: &str,
    ) -> Option<String> {
        match self.updater.update_project(ctx, prj, command, status, "", status_id) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, status = %status, "unable to update commit status");
                None
            }
        }
    }
}

/// Projects without steps for `command` run its standard workflow.
fn with_default_steps(prj: &ProjectContext, command: CommandName) -> Cow<'_, ProjectContext> {
    if prj.command == command && !prj.steps.is_empty() {
        return Cow::Borrowed(prj);
    }
    if !prj.steps.is_empty() {
        tracing::debug!(configured = %prj.command, running = %command, "configured steps belong to another command");
    }

    let mut owned = prj.clone();
    owned.command = command;
    owned.steps = match command {
        CommandName::Plan => step::default_plan_steps(),
        CommandName::PolicyCheck => step::default_policy_check_steps(),
        CommandName::Apply => step::default_apply_steps(),
        CommandName::Version => vec![Step::Version { extra_args: Vec::new() }],
    };
    Cow::Owned(owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{PullReqStatus, PullRequest, Repo};
    use crate::requirements::ApplyRequirement;
    use crate::runtime::{EnvMap, StepRunner};
    use crate::test_support::{stub_steps_runner, RecordingUpdater, StubRunner};
    use crate::working_dir::CheckoutWorkingDir;
    use std::path::Path;

    struct Panicking;

    impl StepRunner for Panicking {
        fn run(
            &self,
            _ctx: &RequestContext,
            _prj: &ProjectContext,
            _extra_args: &[String],
            _path: &Path,
            _envs: &EnvMap,
        ) -> Result<String> {
            panic!("step exploded");
        }
    }

    fn project(workspace: &str, command: CommandName) -> ProjectContext {
        ProjectContext {
            command,
            base_repo: Repo::new("owner/repo"),
            pull: PullRequest {
                num: 9,
                ..Default::default()
            },
            workspace: workspace.to_string(),
            repo_rel_dir: ".".to_string(),
            ..Default::default()
        }
    }

    fn runner(
        dir: &Path,
        steps: StepsRunner,
    ) -> (ProjectCommandRunner, WorkingDirLocker, Arc<RecordingUpdater>) {
        let locker = WorkingDirLocker::new();
        let updater = RecordingUpdater::new();
        let runner = ProjectCommandRunner::new(
            locker.clone(),
            Arc::new(CheckoutWorkingDir::new(dir)),
            steps,
            updater.clone(),
        );
        (runner, locker, updater)
    }

    #[test]
    fn plan_runs_default_steps_and_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, locker, updater) = runner(dir.path(), stub_steps_runner(StubRunner::ok("apply")));

        let result = runner.plan(&RequestContext::new(), &project("default", CommandName::Plan));

        assert_eq!(result.output.as_deref(), Some("init\nplan"));
        assert!(result.is_successful());
        assert_eq!(result.vcs_status(), VcsStatus::Success);
        assert_eq!(result.plan_status(), Some(ProjectPlanStatus::Planned));
        assert!(!locker.is_locked("owner/repo", 9, "default"));

        let statuses: Vec<VcsStatus> = updater.calls().iter().map(|c| c.status).collect();
        assert_eq!(statuses, vec![VcsStatus::Pending, VcsStatus::Success]);
    }

    #[test]
    fn final_status_reuses_id_from_pending_update() {
        let dir = tempfile::tempdir().unwrap();
        let updater = RecordingUpdater::minting();
        let runner = ProjectCommandRunner::new(
            WorkingDirLocker::new(),
            Arc::new(CheckoutWorkingDir::new(dir.path())),
            stub_steps_runner(StubRunner::ok("apply")),
            updater.clone(),
        );

        let result = runner.plan(&RequestContext::new(), &project("default", CommandName::Plan));

        let calls: Vec<(VcsStatus, String)> = updater
            .calls()
            .into_iter()
            .map(|c| (c.status, c.status_id))
            .collect();
        assert_eq!(
            calls,
            vec![
                (VcsStatus::Pending, String::new()),
                (VcsStatus::Success, "minted-0".to_string()),
            ]
        );
        assert_eq!(result.status_id, "minted-0");
    }

    #[test]
    fn unmet_requirement_is_a_failure_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let apply = StubRunner::ok("apply");
        let (runner, _, _) = runner(dir.path(), stub_steps_runner(apply.clone()));
        let mut prj = project("default", CommandName::Apply);
        prj.apply_requirements = vec![ApplyRequirement::Mergeable, ApplyRequirement::Approved];
        prj.pull_status = PullReqStatus {
            mergeable: true,
            ..Default::default()
        };

        let result = runner.apply(&RequestContext::new(), &prj);

        assert_eq!(
            result.failure.as_deref(),
            Some("Pull request must be approved by at least one person other than the author before running apply.")
        );
        assert!(result.error.is_none());
        assert!(!result.is_successful());
        assert_eq!(result.plan_status(), Some(ProjectPlanStatus::ErroredApply));
        assert_eq!(apply.call_count(), 0);
    }

    #[test]
    fn held_lock_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, locker, _) = runner(dir.path(), stub_steps_runner(StubRunner::ok("apply")));
        let _held = locker.try_lock("owner/repo", 9, "default").unwrap();

        let result = runner.apply(&RequestContext::new(), &project("default", CommandName::Apply));
        let err = result.error.unwrap();
        assert_eq!(err.code.as_str(), "workdir.locked");
        assert_eq!(err.retryable, Some(true));
    }

    #[test]
    fn apply_without_checkout_asks_for_plan() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _, _) = runner(&dir.path().join("missing"), stub_steps_runner(StubRunner::ok("apply")));
        let result = runner.apply(&RequestContext::new(), &project("default", CommandName::Apply));
        assert_eq!(
            result.error.unwrap().message,
            "project has not been cloned–did you run plan?"
        );
    }

    #[test]
    fn run_all_keeps_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _, _) = runner(dir.path(), stub_steps_runner(StubRunner::ok("apply")));
        let projects = vec![
            project("a", CommandName::Plan),
            project("b", CommandName::Version),
            project("c", CommandName::Apply),
        ];

        let results = runner.run_all(&RequestContext::new(), &projects, 2);

        let summary: Vec<(String, CommandName, Option<String>)> = results
            .into_iter()
            .map(|r| (r.workspace, r.command, r.output))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a".to_string(), CommandName::Plan, Some("init\nplan".to_string())),
                ("b".to_string(), CommandName::Version, Some("Terraform v1.5.7".to_string())),
                ("c".to_string(), CommandName::Apply, Some("apply".to_string())),
            ]
        );
    }

    #[test]
    fn panicking_step_releases_lock_and_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, locker, _) = runner(dir.path(), stub_steps_runner(Arc::new(Panicking)));
        let projects = vec![project("default", CommandName::Apply)];

        let results = runner.run_all(&RequestContext::new(), &projects, 4);

        assert_eq!(results[0].error.as_ref().unwrap().message, "project runner panicked");
        assert!(!locker.is_locked("owner/repo", 9, "default"));
    }

    #[test]
    fn result_serializes_error_code() {
        let prj = project("default", CommandName::Plan);
        let result = ProjectResult::new(&prj, CommandName::Plan, Err(Error::other("boom")));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error"]["code"], "internal.unexpected");
        assert_eq!(json["error"]["message"], "boom");
        assert_eq!(json["command"], "plan");
        assert!(json.get("output").is_none());
    }
}
