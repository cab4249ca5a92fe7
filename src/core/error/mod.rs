use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidValue,
    ConfigInvalidJson,

    ValidationInvalidArgument,
    ValidationInvalidJson,

    PlanNotFound,
    ApplyTargetNotAllowed,
    ApplyPlanMismatch,

    CommandFailed,
    CommandSpawnFailed,

    WorkdirLocked,
    WorkdirNotFound,

    RequestCancelled,

    VcsStatusFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationInvalidJson => "validation.invalid_json",

            ErrorCode::PlanNotFound => "plan.not_found",
            ErrorCode::ApplyTargetNotAllowed => "apply.target_not_allowed",
            ErrorCode::ApplyPlanMismatch => "apply.plan_mismatch",

            ErrorCode::CommandFailed => "command.failed",
            ErrorCode::CommandSpawnFailed => "command.spawn_failed",

            ErrorCode::WorkdirLocked => "workdir.locked",
            ErrorCode::WorkdirNotFound => "workdir.not_found",

            ErrorCode::RequestCancelled => "request.cancelled",

            ErrorCode::VcsStatusFailed => "vcs.status_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNotFoundDetails {
    pub repo_rel_dir: String,
    pub workspace: String,
    pub plan_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMismatchDetails {
    pub expected_plan: String,
    pub actual_plan: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    pub dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkdirLockedDetails {
    pub repo_full_name: String,
    pub pull_num: u64,
    pub workspace: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Typed error carried through every step runner.
///
/// `message` is shown to end users verbatim, so `Display` prints it and
/// nothing else. Machine-readable context lives in `details`.
#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.clone(),
        });

        Self::new(ErrorCode::ConfigInvalidValue, problem, details)
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let path = path.into();
        let details = serde_json::json!({
            "path": path.clone(),
            "error": err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            format!("Invalid JSON in configuration {}: {}", path, err),
            details,
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(ErrorCode::ValidationInvalidArgument, problem, details)
    }

    pub fn validation_invalid_json(err: impl std::fmt::Display, context: Option<String>) -> Self {
        let details = serde_json::json!({
            "error": err.to_string(),
            "context": context,
        });

        Self::new(
            ErrorCode::ValidationInvalidJson,
            format!("Invalid input: {}", err),
            details,
        )
    }

    /// No planfile at the expected location for this project and workspace.
    pub fn plan_not_found(
        repo_rel_dir: impl Into<String>,
        workspace: impl Into<String>,
        plan_path: impl Into<String>,
    ) -> Self {
        let repo_rel_dir = repo_rel_dir.into();
        let workspace = workspace.into();
        let message = format!(
            "no plan found at path {:?} and workspace {:?}–did you run plan?",
            repo_rel_dir, workspace
        );
        let details = to_details(PlanNotFoundDetails {
            repo_rel_dir,
            workspace,
            plan_path: plan_path.into(),
        });

        Self::new(ErrorCode::PlanNotFound, message, details)
            .with_hint("Run `tfgate run plan` for this project before applying")
    }

    pub fn apply_target_not_allowed() -> Self {
        Self::new(
            ErrorCode::ApplyTargetNotAllowed,
            "cannot run apply with -target because we are applying an already generated plan. Instead, run -target with plan",
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn apply_plan_mismatch(expected_plan: &str, actual_plan: &str) -> Self {
        let message = format!(
            "Plan generated during apply phase did not match plan generated during plan phase.
Aborting apply.

Expected Plan:

{}
**************************************************

Actual Plan:

{}
**************************************************

This likely occurred because someone applied a change to this state in-between
your plan and apply commands.
To resolve, re-run plan.",
            expected_plan, actual_plan
        );
        let details = to_details(PlanMismatchDetails {
            expected_plan: expected_plan.to_string(),
            actual_plan: actual_plan.to_string(),
        });

        Self::new(ErrorCode::ApplyPlanMismatch, message, details)
    }

    pub fn command_failed(message: impl Into<String>, details: CommandFailedDetails) -> Self {
        Self::new(ErrorCode::CommandFailed, message, to_details(details))
    }

    pub fn command_spawn_failed(command: impl Into<String>, err: impl std::fmt::Display) -> Self {
        let command = command.into();
        let message = format!("failed to start {:?}: {}", command, err);
        Self::new(
            ErrorCode::CommandSpawnFailed,
            message,
            serde_json::json!({ "command": command, "error": err.to_string() }),
        )
    }

    /// Another command already holds the working directory for this key.
    pub fn workdir_locked(
        repo_full_name: impl Into<String>,
        pull_num: u64,
        workspace: impl Into<String>,
    ) -> Self {
        let workspace = workspace.into();
        let message = format!(
            "the {} workspace is currently locked by another command that is running for this pull request.\n\
             Wait until the previous command is complete and try again",
            workspace
        );
        let details = to_details(WorkdirLockedDetails {
            repo_full_name: repo_full_name.into(),
            pull_num,
            workspace,
        });

        let mut err = Self::new(ErrorCode::WorkdirLocked, message, details);
        err.retryable = Some(true);
        err
    }

    pub fn workdir_not_found(path: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::WorkdirNotFound,
            "project has not been cloned–did you run plan?",
            serde_json::json!({ "path": path.into() }),
        )
    }

    pub fn request_cancelled(during: impl Into<String>) -> Self {
        let during = during.into();
        Self::new(
            ErrorCode::RequestCancelled,
            format!("request cancelled during {}", during),
            serde_json::json!({ "during": during }),
        )
    }

    pub fn vcs_status_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::VcsStatusFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        let message = match &context {
            Some(ctx) => format!("{}: {}", ctx, error),
            None => error.clone(),
        };
        let details = to_details(InternalIoErrorDetails { error, context });

        Self::new(ErrorCode::InternalIoError, message, details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalJsonErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalUnexpected,
            error.clone(),
            serde_json::json!({ "error": error }),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::internal_unexpected(message)
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::RequestCancelled
    }
}
