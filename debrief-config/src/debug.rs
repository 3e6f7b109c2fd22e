//! Logging configuration

use serde::{Deserialize, Serialize};

/// Verbosity for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl TraceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

impl std::fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Unknown levels fall back to the default instead of failing the whole file.
impl<'de> Deserialize<'de> for TraceLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw).unwrap_or_default())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DebugConfig {
    /// Install the tracing subscriber when the client starts
    #[serde(default)]
    pub enable_tracing: bool,

    /// Default level (error, warn, info, debug, trace)
    #[serde(default)]
    pub trace_level: TraceLevel,

    /// Extra per-target directives, e.g. "debrief_calc_client::execution=debug"
    #[serde(default)]
    pub trace_targets: Vec<String>,
}

impl DebugConfig {
    /// Filter directive string in `EnvFilter` syntax.
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![self.trace_level.as_str().to_string()];
        directives.extend(
            self.trace_targets
                .iter()
                .map(|target| target.trim())
                .filter(|target| !target.is_empty())
                .map(str::to_string),
        );
        directives.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_level_parsing() {
        assert_eq!(TraceLevel::parse("error"), Some(TraceLevel::Error));
        assert_eq!(TraceLevel::parse("WARNING"), Some(TraceLevel::Warn));
        assert_eq!(TraceLevel::parse(" Debug "), Some(TraceLevel::Debug));
        assert_eq!(TraceLevel::parse("loud"), None);
    }

    #[test]
    fn unknown_level_deserializes_to_default() {
        let config: DebugConfig = toml::from_str("trace_level = \"shouty\"").unwrap();
        assert_eq!(config.trace_level, TraceLevel::Warn);
    }

    #[test]
    fn filter_directives_join_level_and_targets() {
        let config = DebugConfig {
            enable_tracing: true,
            trace_level: TraceLevel::Info,
            trace_targets: vec![
                "debrief_calc_client::connection=trace".to_string(),
                "  ".to_string(),
            ],
        };
        assert_eq!(
            config.filter_directives(),
            "info,debrief_calc_client::connection=trace"
        );
    }
}
