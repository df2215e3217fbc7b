//! Tracing setup for the CLI
//!
//! The level comes from `--log-level` or `--verbose`. A `RUST_LOG` variable,
//! when set, replaces the computed filter entirely. Burn and CubeCL internals
//! are held at `warn` unless the level is `trace`.

use std::fmt;
use std::io::IsTerminal;
use std::str::FromStr;

use tracing_subscriber::{fmt as fmt_layer, prelude::*, EnvFilter};

use crate::utils::error::{LesionError, Result};

/// Crates whose output is capped below `trace`
const NOISY_TARGETS: [&str; 2] = ["burn", "cubecl"];

/// Minimum severity written to the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LesionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(LesionError::Config(format!(
                "Unknown log level '{}' (expected trace, debug, info, warn or error)",
                other
            ))),
        }
    }
}

/// Console logging settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Prefix lines with the module path
    pub show_targets: bool,
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            show_targets: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Settings from the global CLI flags.
    ///
    /// An explicit level wins over `verbose`; colours are dropped when asked
    /// for plain output or when stdout is not a terminal.
    pub fn for_cli(verbose: bool, level: Option<LogLevel>, plain: bool) -> Self {
        let level = level.unwrap_or(if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        });
        Self {
            level,
            show_targets: verbose || level <= LogLevel::Debug,
            ansi_colors: !plain && std::io::stdout().is_terminal(),
        }
    }

    /// Filter directives used when `RUST_LOG` is not set
    pub fn directives(&self) -> String {
        let mut directives = self.level.to_string();
        if self.level > LogLevel::Trace {
            let cap = self.level.max(LogLevel::Warn);
            for target in NOISY_TARGETS {
                directives.push_str(&format!(",{}={}", target, cap));
            }
        }
        directives
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }
}

/// Install the global tracing subscriber; fails if one is already set
pub fn init_logging(config: &LogConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            fmt_layer::layer()
                .compact()
                .with_target(config.show_targets)
                .with_ansi(config.ansi_colors),
        )
        .with(config.filter())
        .try_init()
        .map_err(|e| LesionError::Config(format!("Failed to initialize logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str_is_strict() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!(matches!(
            "verbose".parse::<LogLevel>(),
            Err(LesionError::Config(_))
        ));
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[test]
    fn test_explicit_level_beats_verbose() {
        assert_eq!(LogConfig::for_cli(false, None, true).level, LogLevel::Info);
        assert_eq!(LogConfig::for_cli(true, None, true).level, LogLevel::Debug);

        let config = LogConfig::for_cli(true, Some(LogLevel::Warn), true);
        assert_eq!(config.level, LogLevel::Warn);
        assert!(config.show_targets);
        assert!(!config.ansi_colors);
    }

    #[test]
    fn test_directives_cap_framework_targets() {
        let info = LogConfig::default();
        assert_eq!(info.directives(), "info,burn=warn,cubecl=warn");

        let error = LogConfig {
            level: LogLevel::Error,
            ..LogConfig::default()
        };
        assert_eq!(error.directives(), "error,burn=error,cubecl=error");

        let trace = LogConfig {
            level: LogLevel::Trace,
            ..LogConfig::default()
        };
        assert_eq!(trace.directives(), "trace");
    }

    #[test]
    fn test_second_init_is_rejected() {
        let config = LogConfig::for_cli(false, Some(LogLevel::Warn), true);
        // Another test may have installed a subscriber first; only the repeat matters
        let _ = init_logging(&config);
        assert!(matches!(init_logging(&config), Err(LesionError::Config(_))));
    }
}
