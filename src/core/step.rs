use serde::{Deserialize, Serialize};

/// One unit of a project's workflow.
///
/// The order of steps in `ProjectContext::steps` is the execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case", try_from = "StepDef")]
pub enum Step {
    Init {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        extra_args: Vec<String>,
    },
    Plan {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        extra_args: Vec<String>,
    },
    Show {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        extra_args: Vec<String>,
    },
    PolicyCheck {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        extra_args: Vec<String>,
    },
    Version {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        extra_args: Vec<String>,
    },
    Apply {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        extra_args: Vec<String>,
    },
    /// Bind `name` in the environment map for the remaining steps. A literal
    /// `value` wins over `command`.
    Env {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },
    Run {
        command: String,
    },
}

/// Wire shape of `Step`, checked before it becomes one.
#[derive(Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
enum StepDef {
    Init {
        #[serde(default)]
        extra_args: Vec<String>,
    },
    Plan {
        #[serde(default)]
        extra_args: Vec<String>,
    },
    Show {
        #[serde(default)]
        extra_args: Vec<String>,
    },
    PolicyCheck {
        #[serde(default)]
        extra_args: Vec<String>,
    },
    Version {
        #[serde(default)]
        extra_args: Vec<String>,
    },
    Apply {
        #[serde(default)]
        extra_args: Vec<String>,
    },
    Env {
        name: String,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        command: Option<String>,
    },
    Run {
        command: String,
    },
}

impl TryFrom<StepDef> for Step {
    type Error = String;

    fn try_from(def: StepDef) -> Result<Self, Self::Error> {
        Ok(match def {
            StepDef::Init { extra_args } => Step::Init { extra_args },
            StepDef::Plan { extra_args } => Step::Plan { extra_args },
            StepDef::Show { extra_args } => Step::Show { extra_args },
            StepDef::PolicyCheck { extra_args } => Step::PolicyCheck { extra_args },
            StepDef::Version { extra_args } => Step::Version { extra_args },
            StepDef::Apply { extra_args } => Step::Apply { extra_args },
            StepDef::Env { name, value: None, command: None } => {
                return Err(format!("env step {:?} needs a value or a command", name));
            }
            StepDef::Env { name, value, command } => Step::Env { name, value, command },
            StepDef::Run { command } => Step::Run { command },
        })
    }
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Init { .. } => "init",
            Step::Plan { .. } => "plan",
            Step::Show { .. } => "show",
            Step::PolicyCheck { .. } => "policy_check",
            Step::Version { .. } => "version",
            Step::Apply { .. } => "apply",
            Step::Env { .. } => "env",
            Step::Run { .. } => "run",
        }
    }

    pub fn init() -> Self {
        Step::Init { extra_args: Vec::new() }
    }

    pub fn plan() -> Self {
        Step::Plan { extra_args: Vec::new() }
    }

    pub fn apply() -> Self {
        Step::Apply { extra_args: Vec::new() }
    }

    pub fn run(command: impl Into<String>) -> Self {
        Step::Run {
            command: command.into(),
        }
    }

    pub fn env_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Step::Env {
            name: name.into(),
            value: Some(value.into()),
            command: None,
        }
    }

    pub fn env_command(name: impl Into<String>, command: impl Into<String>) -> Self {
        Step::Env {
            name: name.into(),
            value: None,
            command: Some(command.into()),
        }
    }
}

/// Default plan stage: `init` then `plan`.
pub fn default_plan_steps() -> Vec<Step> {
    vec![Step::init(), Step::plan()]
}

/// Default apply stage.
pub fn default_apply_steps() -> Vec<Step> {
    vec![Step::apply()]
}

/// Default policy-check stage: render the plan as JSON, then evaluate it.
pub fn default_policy_check_steps() -> Vec<Step> {
    vec![
        Step::Show { extra_args: Vec::new() },
        Step::PolicyCheck { extra_args: Vec::new() },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_tagged_steps() {
        let steps: Vec<Step> = serde_json::from_str(
            r#"[
                {"step": "init"},
                {"step": "plan", "extra_args": ["-lock=false"]},
                {"step": "env", "name": "TF_VAR_x", "command": "echo hi"},
                {"step": "run", "command": "make check"}
            ]"#,
        )
        .unwrap();
        assert_eq!(steps[0], Step::init());
        assert_eq!(
            steps[1],
            Step::Plan {
                extra_args: vec!["-lock=false".to_string()]
            }
        );
        assert_eq!(steps[2], Step::env_command("TF_VAR_x", "echo hi"));
        assert_eq!(steps[3].kind(), "run");
    }

    #[test]
    fn deserializes_yaml_workflow() {
        let steps: Vec<Step> = serde_yml::from_str(
            "- step: env\n  name: region\n  value: us-east-1\n- step: apply\n",
        )
        .unwrap();
        assert_eq!(steps, vec![Step::env_value("region", "us-east-1"), Step::apply()]);
    }

    #[test]
    fn unknown_step_is_rejected() {
        let result: Result<Step, _> = serde_json::from_str(r#"{"step": "destroy"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn env_step_without_value_or_command_is_rejected() {
        let err = serde_json::from_str::<Step>(r#"{"step": "env", "name": "REGION"}"#).unwrap_err();
        assert!(err.to_string().contains("env step \"REGION\" needs a value or a command"));

        let err = serde_yml::from_str::<Vec<Step>>("- step: env\n  name: REGION\n").unwrap_err();
        assert!(err.to_string().contains("needs a value or a command"));
    }
}
