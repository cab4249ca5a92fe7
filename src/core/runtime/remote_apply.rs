//! Interactive apply against a remote backend.
//!
//! The backend re-plans before applying. We stream its output, report the
//! run URL as soon as it appears, compare the freshly printed plan with the
//! one recorded at plan time and answer the confirmation prompt with
//! `yes` only when they match.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use crate::context::{RequestContext, POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::executor::{AsyncCommandExecutor, EnvMap, Line};
use crate::project::{CommandName, ProjectContext};
use crate::vcs::{VcsStatus, VcsStatusUpdater};

use super::apply::apply_args;

/// Terraform's confirmation prompt. Printed without a trailing newline.
pub const CONFIRM_PROMPT: &str = "Enter a value:";

const CONFIRM: &str = "yes\n";
const REFUSE: &str = "no\n";

/// How long a refused apply may keep streaming before it is killed.
pub const REFUSE_GRACE: Duration = Duration::from_secs(10);

/// Separates refresh noise from the plan in terraform's output.
const REFRESH_SEPARATOR: &str =
    "------------------------------------------------------------------------\n";

/// Where the plan starts in output that has no refresh separator.
const PLAN_START_MARKERS: [&str; 2] = [
    "An execution plan has been generated",
    "Terraform used the selected providers",
];

const PLAN_END_MARKER: &str = "Do you want to perform these actions";

static RUN_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^\s/]+/app/[^\s/]+/[^\s/]+/runs/run-[A-Za-z0-9]+")
        .unwrap()
});

/// How recorded and streamed plan text are normalized before comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanComparison {
    /// Exact match after trimming surrounding whitespace.
    #[default]
    Trimmed,
    /// Any run of whitespace compares equal to a single space.
    CollapseWhitespace,
}

impl PlanComparison {
    pub fn matches(&self, expected: &str, actual: &str) -> bool {
        match self {
            PlanComparison::Trimmed => expected.trim() == actual.trim(),
            PlanComparison::CollapseWhitespace => expected
                .split_whitespace()
                .eq(actual.split_whitespace()),
        }
    }
}

/// Drop everything before the plan proper.
pub fn strip_refresh_output(output: &str) -> &str {
    if let Some(idx) = output.find(REFRESH_SEPARATOR) {
        return &output[idx + REFRESH_SEPARATOR.len()..];
    }
    PLAN_START_MARKERS
        .iter()
        .filter_map(|marker| output.find(marker))
        .min()
        .map_or(output, |idx| &output[idx..])
}

/// Plan text printed by a remote apply before its confirmation prompt.
pub fn plan_from_apply_output(output: &str) -> Option<&str> {
    let end = output.find(PLAN_END_MARKER)?;
    Some(strip_refresh_output(&output[..end]).trim())
}

pub fn find_run_url(line: &str) -> Option<&str> {
    RUN_URL.find(line).map(|m| m.as_str())
}

fn is_prompt(line: &str) -> bool {
    line.trim_end().ends_with(CONFIRM_PROMPT)
}

pub struct RemoteApplyRunner {
    executor: Arc<dyn AsyncCommandExecutor>,
    updater: Arc<dyn VcsStatusUpdater>,
    comparison: PlanComparison,
    refuse_grace: Duration,
}

/// Progress of one streamed apply.
#[derive(Default)]
struct Exchange {
    run_url: Option<String>,
    /// Lines up to and including the prompt.
    pre_prompt: Vec<String>,
    /// Lines after a `yes`.
    applied: Vec<String>,
    answered: bool,
    /// Set when the answer was `no`.
    refused_at: Option<Instant>,
    mismatch: Option<Error>,
    stream_err: Option<Error>,
    /// Cancelled before the prompt was answered.
    cancelled: bool,
    cancel_ignored: bool,
}

impl RemoteApplyRunner {
    pub fn new(
        executor: Arc<dyn AsyncCommandExecutor>,
        updater: Arc<dyn VcsStatusUpdater>,
        comparison: PlanComparison,
    ) -> Self {
        Self {
            executor,
            updater,
            comparison,
            refuse_grace: REFUSE_GRACE,
        }
    }

    pub fn with_refuse_grace(mut self, refuse_grace: Duration) -> Self {
        self.refuse_grace = refuse_grace;
        self
    }

    /// Run the apply, confirming only if the streamed plan equals `recorded_plan`.
    ///
    /// Cancelling `ctx` before the prompt is answered refuses the apply. Once
    /// `yes` has been sent the apply runs to completion and its own outcome
    /// is reported.
    pub fn run(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        extra_args: &[String],
        path: &Path,
        envs: &EnvMap,
        recorded_plan: &str,
    ) -> Result<String> {
        let args = apply_args(prj, extra_args);
        let (input, input_rx) = mpsc::channel();
        // The process is only killed through this context, after a refusal
        // it ignored.
        let stream_ctx = RequestContext::new();
        let stream = self.executor.run_command_async_with_input(
            &stream_ctx,
            prj,
            path,
            &args,
            envs,
            prj.terraform_version.as_ref(),
            &prj.workspace,
            input_rx,
        );

        let mut exchange = Exchange::default();
        loop {
            if ctx.is_cancelled() {
                self.on_cancel(prj, &input, &mut exchange);
            }
            if let Some(refused_at) = exchange.refused_at {
                if refused_at.elapsed() >= self.refuse_grace && !stream_ctx.is_cancelled() {
                    tracing::warn!(workspace = %prj.workspace, "refused apply still running, stopping it");
                    stream_ctx.cancel();
                }
            }

            match stream.recv_timeout(POLL_INTERVAL) {
                Ok(Line::Text(line)) => {
                    self.on_line(ctx, prj, &input, &mut exchange, recorded_plan, line)
                }
                Ok(Line::Err(err)) => {
                    exchange.stream_err.get_or_insert(err);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // Closing the input side lets the executor's stdin pump finish.
        drop(input);
        stream.finish();

        self.conclude(ctx, prj, exchange)
    }

    fn on_cancel(&self, prj: &ProjectContext, input: &Sender<String>, exchange: &mut Exchange) {
        if !exchange.answered {
            tracing::info!(workspace = %prj.workspace, "cancelled before confirmation, refusing apply");
            exchange.answered = true;
            exchange.cancelled = true;
            exchange.refused_at = Some(Instant::now());
            let _ = input.send(REFUSE.to_string());
        } else if !exchange.cancelled && !exchange.cancel_ignored {
            tracing::info!(workspace = %prj.workspace, "cancelled after answering, waiting for remote apply");
            exchange.cancel_ignored = true;
        }
    }

    fn on_line(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        input: &Sender<String>,
        exchange: &mut Exchange,
        recorded_plan: &str,
        line: String,
    ) {
        if exchange.run_url.is_none() {
            if let Some(url) = find_run_url(&line) {
                exchange.run_url = Some(url.to_string());
                self.update(ctx, prj, VcsStatus::Pending, url);
            }
        }

        if exchange.answered {
            exchange.applied.push(line);
            return;
        }

        let at_prompt = is_prompt(&line);
        exchange.pre_prompt.push(line);
        if !at_prompt {
            return;
        }

        exchange.answered = true;
        let streamed = exchange.pre_prompt.join("\n");
        let answer = match plan_from_apply_output(&streamed) {
            Some(actual) if self.comparison.matches(recorded_plan, actual) => CONFIRM,
            Some(actual) => {
                exchange.mismatch = Some(Error::apply_plan_mismatch(recorded_plan.trim(), actual));
                REFUSE
            }
            None => {
                exchange.mismatch = Some(Error::internal_unexpected(format!(
                    "couldn't find plan end when parsing apply output:\n{:?}",
                    streamed
                )));
                REFUSE
            }
        };
        if answer == REFUSE {
            exchange.refused_at = Some(Instant::now());
        }

        tracing::info!(
            repo = %prj.base_repo.full_name,
            pull = prj.pull.num,
            workspace = %prj.workspace,
            answer = answer.trim_end(),
            "answering remote apply confirmation"
        );
        if input.send(answer.to_string()).is_err() {
            tracing::warn!("remote apply exited before reading its confirmation");
        }
    }

    fn conclude(
        &self,
        ctx: &RequestContext,
        prj: &ProjectContext,
        exchange: Exchange,
    ) -> Result<String> {
        let run_url = exchange.run_url.unwrap_or_default();

        let failure = exchange
            .mismatch
            .or_else(|| {
                exchange
                    .cancelled
                    .then(|| Error::request_cancelled("remote apply"))
            })
            .or(exchange.stream_err);

        if let Some(err) = failure {
            self.update(ctx, prj, VcsStatus::Failed, &run_url);
            return Err(err);
        }

        self.update(ctx, prj, VcsStatus::Success, &run_url);
        if exchange.applied.is_empty() {
            // The backend finished without asking, e.g. nothing to change.
            return Ok(exchange.pre_prompt.join("\n"));
        }
        Ok(exchange.applied.join("\n"))
    }

    fn update(&self, ctx: &RequestContext, prj: &ProjectContext, status: VcsStatus, run_url: &str) {
        if let Err(e) = self
            .updater
            .update_project(ctx, prj, CommandName::Apply, status, run_url, "")
        {
            tracing::warn!(error = %e, status = %status, "unable to update commit status");
        }
    }
}
