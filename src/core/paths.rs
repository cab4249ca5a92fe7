use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base tfgate config directory (universal ~/.config/tfgate/ on all platforms)
pub fn tfgate() -> Result<PathBuf> {
    if let Ok(dir) = env::var("TFGATE_CONFIG_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(&dir).into_owned()));
        }
    }

    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("tfgate"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("tfgate"))
    }
}

/// Global tfgate.json config file path
pub fn tfgate_json() -> Result<PathBuf> {
    Ok(tfgate()?.join("tfgate.json"))
}

/// Directory holding versioned terraform binaries (`terraform<version>`)
pub fn bin() -> Result<PathBuf> {
    Ok(tfgate()?.join("bin"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_lives_under_base_dir() {
        let base = tfgate().unwrap();
        assert_eq!(tfgate_json().unwrap(), base.join("tfgate.json"));
        assert_eq!(bin().unwrap(), base.join("bin"));
    }
}
