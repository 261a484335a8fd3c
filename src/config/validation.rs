//! Configuration errors and value parsers.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

use super::app::MIN_REFRESH;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or stat the configuration file.
    #[error("failed to read config file '{}': {source}", path.display())]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config file '{}': {source}", path.display())]
    ParseError {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse a duration string using humantime.
///
/// Supports `30s`, `5m`, `1h30m`, `100ms` and so on. A bare number is rejected.
///
/// # Examples
///
/// ```
/// use query_exporter::config::parse_duration;
///
/// assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
/// assert_eq!(parse_duration("5m").unwrap().as_secs(), 300);
/// assert_eq!(parse_duration("1h30m").unwrap().as_secs(), 5400);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Parse a refresh interval, enforcing the one second minimum.
pub fn parse_refresh(s: &str) -> Result<Duration, String> {
    let refresh = parse_duration(s)?;
    if refresh < MIN_REFRESH {
        return Err(format!(
            "refresh must be at least {}",
            humantime::format_duration(MIN_REFRESH)
        ));
    }
    Ok(refresh)
}

/// Expand `${VAR}` and `${VAR:-default}` references from the environment.
///
/// An unset variable without a default expands to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: OnceLock<Regex> = OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    regex
        .replace_all(input, |caps: &Captures| {
            let default_value = caps.get(2).map_or("", |m| m.as_str());
            std::env::var(&caps[1]).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration(" 5m ").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("300").is_err());
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn test_parse_refresh_minimum() {
        assert_eq!(parse_refresh("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_refresh("5m").unwrap(), Duration::from_secs(300));
        assert!(parse_refresh("500ms").unwrap_err().contains("at least 1s"));
    }

    #[test]
    fn test_expand_env_vars_passthrough() {
        assert_eq!(
            expand_env_vars("sqlite:data/metrics.db?mode=ro"),
            "sqlite:data/metrics.db?mode=ro"
        );
    }

    #[test]
    fn test_expand_env_vars_default() {
        let result = expand_env_vars("sqlite:${QE_TEST_UNSET_DB_DIR_4821:-/var/lib}/metrics.db");
        assert_eq!(result, "sqlite:/var/lib/metrics.db");
        assert_eq!(expand_env_vars("${QE_TEST_UNSET_DB_DIR_4821}"), "");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: only this test touches this variable.
        unsafe {
            std::env::set_var("QE_TEST_DB_PATH", "/srv/metrics.db");
        }
        assert_eq!(expand_env_vars("sqlite:${QE_TEST_DB_PATH}"), "sqlite:/srv/metrics.db");
        // SAFETY: cleanup of the variable set above.
        unsafe {
            std::env::remove_var("QE_TEST_DB_PATH");
        }
    }
}
