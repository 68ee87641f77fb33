//! Configuration loading and data folder resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the data folder
pub const DATA_DIR_ENV: &str = "ECHO_DATA_DIR";

/// Environment variable naming an explicit config file
pub const CONFIG_FILE_ENV: &str = "ECHO_CONFIG";

/// Data folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. `data_dir` key of the TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_folder(cli_arg: Option<&Path>, env_var_name: &str) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(config_path) = find_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(data_dir) = config.get("data_dir").and_then(|v| v.as_str()) {
                    return PathBuf::from(data_dir);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    default_data_folder()
}

/// Locate the configuration file for the platform, if one exists
///
/// `ECHO_CONFIG` wins when set; otherwise the user config directory is tried
/// before the system-wide location.
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        warn!("{} points at missing file {}", CONFIG_FILE_ENV, path.display());
    }

    let user_config = dirs::config_dir().map(|d| d.join("echo").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/echo/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Deserialize a TOML config file, falling back to defaults when it is absent
///
/// A missing file is not an error. A file that exists but cannot be parsed is.
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        debug!("No config file found, using defaults");
        return Ok(T::default());
    };

    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Get OS-dependent default data folder path
pub fn default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("echo"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/echo"))
    } else if cfg!(any(target_os = "macos", target_os = "windows")) {
        dirs::data_local_dir()
            .map(|d| d.join("echo"))
            .unwrap_or_else(|| PathBuf::from("./echo_data"))
    } else {
        PathBuf::from("./echo_data")
    }
}

/// Parse a human byte size such as `2GB`, `512 MiB`, `1.5g` or `1048576`
///
/// Decimal suffixes (`KB`, `MB`, `GB`, `TB`) are powers of 1000, binary ones
/// (`KiB`, `MiB`, `GiB`, `TiB`) powers of 1024. Single letters follow the
/// decimal scale.
pub fn parse_byte_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| Error::Config(format!("Invalid byte size: {:?}", input)))?;

    let multiplier: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "k" | "kb" => 1e3,
        "m" | "mb" => 1e6,
        "g" | "gb" => 1e9,
        "t" | "tb" => 1e12,
        "kib" => 1024.0,
        "mib" => 1024.0 * 1024.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        other => {
            return Err(Error::Config(format!(
                "Unknown byte size unit {:?} in {:?}",
                other, input
            )))
        }
    };

    let bytes = (value * multiplier).round();
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(Error::Config(format!("Byte size out of range: {:?}", input)));
    }

    Ok(bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte_size_units() {
        assert_eq!(parse_byte_size("2GB").unwrap(), 2_000_000_000);
        assert_eq!(parse_byte_size("512 MiB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_byte_size("1.5k").unwrap(), 1500);
        assert_eq!(parse_byte_size("100").unwrap(), 100);
        assert_eq!(parse_byte_size(" 10 b ").unwrap(), 10);
    }

    #[test]
    fn test_parse_byte_size_rejects_garbage() {
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("GB").is_err());
        assert!(parse_byte_size("12 parsecs").is_err());
    }

    #[test]
    fn test_cli_argument_wins() {
        let path = PathBuf::from("/tmp/echo-cli");
        assert_eq!(
            resolve_data_folder(Some(&path), "ECHO_TEST_UNUSED_ENV"),
            path
        );
    }

    #[test]
    fn test_default_data_folder_not_empty() {
        assert!(!default_data_folder().as_os_str().is_empty());
    }
}
