use std::{env, io::IsTerminal};

use crate::logger::{error::LoggerError, format::LoggerFormat};

/// Environment variable overriding [`LoggerConfig::level`].
pub const ENV_LOG_LEVEL: &str = "KEEL_LOG_LEVEL";
/// Environment variable overriding [`LoggerConfig::format`].
pub const ENV_LOG_FORMAT: &str = "KEEL_LOG_FORMAT";

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directive, e.g. `info` or `info,keel_runtime=trace`.
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let use_color = cfg!(test) || std::io::stdout().is_terminal();
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color,
        }
    }
}

impl LoggerConfig {
    /// Defaults, overridden by `KEEL_LOG_LEVEL` and `KEEL_LOG_FORMAT` when set.
    pub fn from_env() -> Result<Self, LoggerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LoggerError> {
        let mut cfg = Self::default();

        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            cfg.level = level.trim().to_string();
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT).filter(|v| !v.trim().is_empty()) {
            cfg.format = format.parse()?;
        }
        if cfg.format != LoggerFormat::Text {
            cfg.use_color = false;
        }
        Ok(cfg)
    }
}
