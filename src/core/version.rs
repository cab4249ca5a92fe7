//! Terraform version parsing.
//!
//! Tool versions show up in config and project files as `1.5.7`, `v0.12`
//! or `0.11.15`. They are normalized to full semver so comparisons are
//! strict: `0.11.15 < 0.12.0`.

use crate::error::{Error, Result};
use semver::Version;

/// Parse a tool version, accepting a leading `v` and partial versions.
///
/// `field` names the config key or input the value came from.
pub fn parse_tool_version(input: &str, field: &str) -> Result<Version> {
    let s = input.trim();
    let s = s.strip_prefix('v').unwrap_or(s);

    if let Ok(v) = Version::parse(s) {
        return Ok(v);
    }

    // Try padding partial versions: "1" -> "1.0.0", "1.2" -> "1.2.0"
    let parts: Vec<&str> = s.split('.').collect();
    let padded = match parts.len() {
        1 => format!("{}.0.0", s),
        2 => format!("{}.0", s),
        _ => s.to_string(),
    };

    Version::parse(&padded).map_err(|e| {
        Error::config_invalid_value(
            field,
            Some(input.to_string()),
            format!("invalid version {:?} for {}: {}", input, field, e),
        )
    })
}

/// Serde adapter for `Option<Version>` fields written as plain strings.
pub mod serde_optional {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Version>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Version>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => super::parse_tool_version(&s, "terraform_version")
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
