use serde::{Deserialize, Serialize};
use std::fs;

use crate::paths;
use crate::runtime::PlanComparison;

/// Root configuration structure for tfgate.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TfgateConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via tfgate.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Terraform version used when a project doesn't pin one.
    #[serde(default = "default_tf_version")]
    pub default_tf_version: String,

    #[serde(default = "default_terraform_binary")]
    pub terraform_binary: String,

    /// Directory searched for `terraform<version>` binaries before falling
    /// back to `terraform_binary`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_bin_dir: Option<String>,

    #[serde(default = "default_conftest_binary")]
    pub conftest_binary: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_paths: Vec<String>,

    #[serde(default = "default_json_plan_minimum_version")]
    pub show_minimum_version: String,

    #[serde(default = "default_json_plan_minimum_version")]
    pub policy_check_minimum_version: String,

    #[serde(default)]
    pub plan_comparison: PlanComparison,

    #[serde(default = "default_vcs_status_name")]
    pub vcs_status_name: String,

    #[serde(default = "default_parallel_pool_size")]
    pub parallel_pool_size: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubConfig>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            default_tf_version: default_tf_version(),
            terraform_binary: default_terraform_binary(),
            terraform_bin_dir: None,
            conftest_binary: default_conftest_binary(),
            policy_paths: Vec::new(),
            show_minimum_version: default_json_plan_minimum_version(),
            policy_check_minimum_version: default_json_plan_minimum_version(),
            plan_comparison: PlanComparison::default(),
            vcs_status_name: default_vcs_status_name(),
            parallel_pool_size: default_parallel_pool_size(),
            github: None,
        }
    }
}

/// Commit-status reporting against GitHub (or GitHub Enterprise)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_github_hostname")]
    pub hostname: String,
    pub token: String,
}

fn default_tf_version() -> String {
    "1.5.7".to_string()
}

fn default_terraform_binary() -> String {
    "terraform".to_string()
}

fn default_conftest_binary() -> String {
    "conftest".to_string()
}

// `show -json` only exists from 0.12 onward.
fn default_json_plan_minimum_version() -> String {
    "0.12.0".to_string()
}

fn default_vcs_status_name() -> String {
    "tfgate".to_string()
}

fn default_parallel_pool_size() -> usize {
    15
}

fn default_github_hostname() -> String {
    "github.com".to_string()
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load defaults, merging file config with built-in defaults.
/// If tfgate.json is missing or invalid, silently returns built-in defaults.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

/// Load the full tfgate.json config, falling back to defaults on any error.
pub fn load_config() -> TfgateConfig {
    match load_config_from_file() {
        Ok(config) => config,
        Err(err) => {
            tracing::debug!(error = %err, "using built-in defaults");
            TfgateConfig::default()
        }
    }
}

/// Attempt to load config from tfgate.json file.
fn load_config_from_file() -> crate::Result<TfgateConfig> {
    let path = paths::tfgate_json()?;

    if !path.exists() {
        return Err(crate::Error::other("tfgate.json not found"));
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        crate::Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    parse_config(&content, &path.display().to_string())
}

pub(crate) fn parse_config(content: &str, origin: &str) -> crate::Result<TfgateConfig> {
    serde_json::from_str(content).map_err(|e| crate::Error::config_invalid_json(origin, e))
}

/// Save config to tfgate.json file (creates if missing).
pub fn save_config(config: &TfgateConfig) -> crate::Result<()> {
    let path = paths::tfgate_json()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            crate::Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
        })?;
    }

    let content = serde_json::to_string_pretty(config).map_err(|e| {
        crate::Error::internal_json(e.to_string(), Some("serialize tfgate.json".to_string()))
    })?;

    fs::write(&path, content).map_err(|e| {
        crate::Error::internal_io(e.to_string(), Some(format!("write {}", path.display())))
    })?;

    Ok(())
}

/// Check if tfgate.json file exists
pub fn config_exists() -> bool {
    paths::tfgate_json()
        .map(|p| p.exists())
        .unwrap_or(false)
}

/// Delete tfgate.json file (reset to defaults)
pub fn reset_config() -> crate::Result<bool> {
    let path = paths::tfgate_json()?;

    if path.exists() {
        fs::remove_file(&path).map_err(|e| {
            crate::Error::internal_io(e.to_string(), Some(format!("delete {}", path.display())))
        })?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Get the path to tfgate.json (for display purposes)
pub fn config_path() -> crate::Result<String> {
    Ok(paths::tfgate_json()?.display().to_string())
}

/// Get built-in defaults (ignoring any file config)
pub fn builtin_defaults() -> Defaults {
    Defaults::default()
}
