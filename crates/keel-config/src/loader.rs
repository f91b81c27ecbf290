//! Layered configuration loading.

use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, ConfigResult, KeelConfig};

/// Loads a [`KeelConfig`] in layers, later layers overriding earlier ones:
///
/// 1. Built-in defaults
/// 2. A TOML or JSON file, or an in-memory string
/// 3. Environment variables named `PREFIX__SECTION__KEY`
///
/// A file replaces the whole record; fields it leaves out take their
/// defaults. Unknown fields are rejected.
///
/// ```no_run
/// use keel_config::ConfigLoader;
///
/// # fn main() -> Result<(), keel_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("keel.toml")?
///     .with_env_prefix("KEEL")
///     .load()?;
///
/// println!("ops server on {}", config.ops.addr);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: KeelConfig,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// Creates a loader holding the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets to the built-in defaults.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = KeelConfig::default();
        self
    }

    /// Loads a file; `.toml` and `.json` extensions are supported.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        self.config = parse(&content, format)?;
        Ok(self)
    }

    /// Loads a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> ConfigResult<Self> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Loads configuration text in `format` (`"toml"` or `"json"`).
    ///
    /// ```
    /// use keel_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[ops]\naddr = \"127.0.0.1:7070\"", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.ops.addr, "127.0.0.1:7070");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> ConfigResult<Self> {
        self.config = parse(content, format)?;
        Ok(self)
    }

    /// Applies `PREFIX__SECTION__KEY` environment variables at [`load`](Self::load).
    ///
    /// With prefix `KEEL`, `KEEL__OPS__ADDR=:7070` overrides `ops.addr`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Loads variables from a `.env` file in the working directory, if any.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        let _ = dotenvy::dotenv();
        self
    }

    /// Applies environment overrides and validates the result.
    pub fn load(mut self) -> ConfigResult<KeelConfig> {
        if let Some(prefix) = self.env_prefix.take() {
            let marker = format!("{prefix}__");
            for (key, value) in env::vars().filter(|(k, _)| k.starts_with(&marker)) {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> KeelConfig {
        self.config
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> ConfigResult<()> {
        let path = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;
        let parts: Vec<&str> = path.split("__").collect();

        let ops = &mut self.config.ops;
        let logging = &mut self.config.logging;
        match parts.as_slice() {
            ["OPS", "ADDR"] => ops.addr = value.to_string(),
            ["OPS", "DISABLE"] => ops.disable = parse_bool(key, value)?,
            ["OPS", "WITH_METRICS"] => ops.with_metrics = parse_bool(key, value)?,
            ["OPS", "WITH_PPROF"] => ops.with_pprof = parse_bool(key, value)?,
            ["OPS", "WITH_LOG_CONTROL"] => ops.with_log_control = parse_bool(key, value)?,
            ["OPS", "GRACE_PERIOD_MS"] => {
                ops.grace_period_ms = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
            }
            ["LOGGING", "LEVEL"] => {
                logging.level = value
                    .parse()
                    .map_err(|e: keel_telemetry::TelemetryError| {
                        ConfigError::env_parse_error(key, e.to_string())
                    })?;
            }
            ["LOGGING", "FORMAT"] => {
                logging.format = value
                    .parse()
                    .map_err(|e: keel_telemetry::TelemetryError| {
                        ConfigError::env_parse_error(key, e.to_string())
                    })?;
            }
            ["LOGGING", "WITH_CALLER"] => logging.with_caller = parse_bool(key, value)?,
            // Unknown keys under the prefix are ignored.
            _ => {}
        }

        Ok(())
    }
}

fn parse(content: &str, format: &str) -> ConfigResult<KeelConfig> {
    match format.to_ascii_lowercase().as_str() {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

fn parse_bool(key: &str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::env_parse_error(key, "expected boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_telemetry::{LogFormat, LogLevel};
    use std::io::Write;

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, KeelConfig::default());
        assert_eq!(config.ops.grace_period_ms, 0);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_loader_with_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[ops]\naddr = \"127.0.0.1:7070\"\nwith_pprof = true\ngrace_period_ms = 2500\n\n[logging]\nformat = \"json\""
        )
        .unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.ops.addr, "127.0.0.1:7070");
        assert!(config.ops.with_pprof);
        assert!(config.ops.with_metrics);
        assert_eq!(config.ops.grace_period_ms, 2500);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_loader_with_json_string() {
        let config = ConfigLoader::new()
            .with_string(r#"{"ops": {"with_log_control": true}}"#, "json")
            .unwrap()
            .load()
            .unwrap();
        assert!(config.ops.with_log_control);
    }

    #[test]
    fn test_loader_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/keel.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));

        let loader = ConfigLoader::new()
            .with_optional_file("/nonexistent/keel.toml")
            .unwrap();
        assert_eq!(loader.load_unvalidated(), KeelConfig::default());
    }

    #[test]
    fn test_loader_unsupported_format() {
        let result = ConfigLoader::new().with_string("addr: x", "yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_loader_rejects_unknown_fields() {
        let result = ConfigLoader::new().with_string("[ops]\nport = 6060", "toml");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_apply_env_var_ops() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__OPS__ADDR", ":9999", "TEST").unwrap();
        loader.apply_env_var("TEST__OPS__DISABLE", "yes", "TEST").unwrap();
        loader.apply_env_var("TEST__OPS__GRACE_PERIOD_MS", "300", "TEST").unwrap();
        assert_eq!(loader.config.ops.addr, ":9999");
        assert!(loader.config.ops.disable);
        assert_eq!(loader.config.ops.grace_period_ms, 300);
    }

    #[test]
    fn test_apply_env_var_logging() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__LOGGING__LEVEL", "warning", "TEST").unwrap();
        loader.apply_env_var("TEST__LOGGING__WITH_CALLER", "off", "TEST").unwrap();
        assert_eq!(loader.config.logging.level, LogLevel::Warn);
        assert!(!loader.config.logging.with_caller);
    }

    #[test]
    fn test_apply_env_var_invalid_values() {
        let mut loader = ConfigLoader::new();
        assert!(loader.apply_env_var("TEST__OPS__WITH_METRICS", "maybe", "TEST").is_err());
        assert!(loader.apply_env_var("TEST__OPS__GRACE_PERIOD_MS", "soon", "TEST").is_err());
        assert!(loader.apply_env_var("TEST__LOGGING__LEVEL", "trace", "TEST").is_err());
        assert!(loader.apply_env_var("TEST__OPS__UNKNOWN", "1", "TEST").is_ok());
    }

    #[test]
    fn test_env_overrides_applied_at_load() {
        // Unique prefix so parallel tests do not see this variable.
        env::set_var("KEELLOADTEST__OPS__WITH_METRICS", "false");
        let config = ConfigLoader::new()
            .with_env_prefix("keelloadtest")
            .load()
            .unwrap();
        env::remove_var("KEELLOADTEST__OPS__WITH_METRICS");

        assert!(!config.ops.with_metrics);
    }
}
