//! Multi-tier TOML settings for toolwire.
//!
//! Reads settings from multiple sources with precedence:
//! CLI flags > env vars > settings file > defaults

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Maximum length, in characters, of a rendered tool result.
pub const DEFAULT_MAX_RESULT_LENGTH: usize = 30_000;

/// Bounded wait around a single tool call.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 60_000;

/// Bounded wait around connecting to a server.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Per-request timeout inside the stdio transport.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

const SETTINGS_FILE: &str = "settings.toml";

/// Resolved settings for a toolwire process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub config_dir: PathBuf,
    pub max_result_length: usize,
    pub call_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

/// Settings that can be read from `settings.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub invoke: InvokeSettings,
    #[serde(default)]
    pub connect: ConnectSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeSettings {
    pub max_result_length: Option<usize>,
    pub call_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectSettings {
    pub timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_dir: Option<PathBuf>,
    pub max_result_length: Option<usize>,
    pub call_timeout_ms: Option<u64>,
}

impl Settings {
    /// Load settings from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. `<config_dir>/settings.toml`
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = overrides.config_dir.clone().unwrap_or_else(config_dir);
        let file = match read_settings_file(&config_dir.join(SETTINGS_FILE)) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("{e}; using defaults");
                SettingsFile::default()
            }
        };
        Self::resolve(config_dir, overrides, file, |key| std::env::var(key).ok())
    }

    /// Apply precedence over already-gathered sources.
    pub fn resolve<E>(
        config_dir: PathBuf,
        overrides: CliOverrides,
        file: SettingsFile,
        env: E,
    ) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let max_result_length = match overrides.max_result_length {
            Some(v) => v,
            None => env_number(&env, "TOOLWIRE_MAX_RESULT_LENGTH")?
                .or(file.invoke.max_result_length)
                .unwrap_or(DEFAULT_MAX_RESULT_LENGTH),
        };
        if max_result_length == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_result_length".into(),
                message: "must be greater than zero".into(),
            });
        }

        let call_timeout_ms = match overrides.call_timeout_ms {
            Some(v) => v,
            None => env_number(&env, "TOOLWIRE_CALL_TIMEOUT_MS")?
                .or(file.invoke.call_timeout_ms)
                .unwrap_or(DEFAULT_CALL_TIMEOUT_MS),
        };

        let connect_timeout_ms = env_number(&env, "TOOLWIRE_CONNECT_TIMEOUT_MS")?
            .or(file.connect.timeout_ms)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

        let request_timeout_ms = file
            .connect
            .request_timeout_ms
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);

        Ok(Settings {
            config_dir,
            max_result_length,
            call_timeout_ms,
            connect_timeout_ms,
            request_timeout_ms,
        })
    }
}

/// Get the toolwire config directory path (~/.toolwire/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TOOLWIRE_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolwire")
}

/// Read and parse a TOML settings file. A missing file yields defaults.
fn read_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(SettingsFile::default()),
    }
}

fn env_number<E, T>(env: &E, key: &str) -> Result<Option<T>, ConfigError>
where
    E: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn resolve_with(
        overrides: CliOverrides,
        file: SettingsFile,
        env: HashMap<&str, &str>,
    ) -> Result<Settings, ConfigError> {
        Settings::resolve(PathBuf::from("/tmp/tw"), overrides, file, |key| {
            env.get(key).map(|v| v.to_string())
        })
    }

    #[test]
    fn defaults_apply_without_sources() {
        let settings = Settings::resolve(
            PathBuf::from("/tmp/tw"),
            CliOverrides::default(),
            SettingsFile::default(),
            no_env,
        )
        .unwrap();
        assert_eq!(settings.max_result_length, DEFAULT_MAX_RESULT_LENGTH);
        assert_eq!(settings.call_timeout_ms, DEFAULT_CALL_TIMEOUT_MS);
        assert_eq!(settings.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(settings.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
    }

    #[test]
    fn settings_toml_parse() {
        let toml_str = r#"
[invoke]
max_result_length = 5000
call_timeout_ms = 1000

[connect]
timeout_ms = 2000
"#;
        let file: SettingsFile = toml::from_str(toml_str).unwrap();
        assert_eq!(file.invoke.max_result_length, Some(5000));
        assert_eq!(file.connect.timeout_ms, Some(2000));
        assert!(file.connect.request_timeout_ms.is_none());
    }

    #[test]
    fn precedence_cli_over_env_over_file() {
        let mut file = SettingsFile::default();
        file.invoke.max_result_length = Some(100);
        file.invoke.call_timeout_ms = Some(100);

        let env = HashMap::from([
            ("TOOLWIRE_MAX_RESULT_LENGTH", "200"),
            ("TOOLWIRE_CALL_TIMEOUT_MS", "200"),
        ]);
        let overrides = CliOverrides {
            max_result_length: Some(300),
            ..Default::default()
        };

        let settings = resolve_with(overrides, file, env).unwrap();
        assert_eq!(settings.max_result_length, 300);
        assert_eq!(settings.call_timeout_ms, 200);
    }

    #[test]
    fn invalid_env_value_is_rejected() {
        let env = HashMap::from([("TOOLWIRE_CALL_TIMEOUT_MS", "soon")]);
        let result = resolve_with(CliOverrides::default(), SettingsFile::default(), env);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "TOOLWIRE_CALL_TIMEOUT_MS"
        ));
    }

    #[test]
    fn zero_result_length_is_rejected() {
        let overrides = CliOverrides {
            max_result_length: Some(0),
            ..Default::default()
        };
        let result = resolve_with(overrides, SettingsFile::default(), HashMap::new());
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn broken_settings_file_reports_parse_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("settings.toml");
        std::fs::write(&path, "[invoke\nmax_result_length = ").unwrap();
        assert!(matches!(
            read_settings_file(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(read_settings_file(&tmp.path().join("missing.toml")).is_ok());
    }
}
