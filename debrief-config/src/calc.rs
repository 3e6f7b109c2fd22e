use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::constants::{circuit_breaker, connection, engine, result_style, tool_cache};
use crate::debug::DebugConfig;

/// Root configuration for the calc client.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CalcConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub tool_cache: ToolCacheConfig,
    #[serde(default)]
    pub result_style: ResultStyleConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

impl CalcConfig {
    pub fn validate(&self) -> Result<()> {
        self.engine
            .validate()
            .context("Invalid [engine] configuration")?;
        self.connection
            .validate()
            .context("Invalid [connection] configuration")?;
        self.circuit_breaker
            .validate()
            .context("Invalid [circuit_breaker] configuration")?;
        self.tool_cache
            .validate()
            .context("Invalid [tool_cache] configuration")?;
        self.result_style
            .validate()
            .context("Invalid [result_style] configuration")?;
        Ok(())
    }
}

/// How the analysis engine process is launched.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Program to execute (the Python interpreter by default).
    #[serde(default = "EngineConfig::default_command")]
    pub command: String,
    /// Arguments passed to the program.
    #[serde(default = "EngineConfig::default_args")]
    pub args: Vec<String>,
    /// Working directory for the engine process.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Extra environment variables for the engine process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: Self::default_command(),
            args: Self::default_args(),
            working_directory: None,
            env: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    fn default_command() -> String {
        engine::DEFAULT_COMMAND.to_string()
    }

    fn default_args() -> Vec<String> {
        vec!["-m".to_string(), engine::DEFAULT_MODULE.to_string()]
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.command.trim().is_empty(),
            "engine.command must not be empty"
        );
        Ok(())
    }
}

/// Connection lifecycle timeouts.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Handshake timeout in milliseconds.
    #[serde(default = "ConnectionConfig::default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Polling interval used while joining an in-flight connect.
    #[serde(default = "ConnectionConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum time a caller waits for an in-flight connect. Independent of
    /// `connection_timeout_ms`.
    #[serde(default = "ConnectionConfig::default_wait_max_ms")]
    pub wait_max_ms: u64,
    /// Timeout for a single tool call in milliseconds (0 disables).
    #[serde(default = "ConnectionConfig::default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: Self::default_connection_timeout_ms(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            wait_max_ms: Self::default_wait_max_ms(),
            tool_timeout_ms: Self::default_tool_timeout_ms(),
        }
    }
}

impl ConnectionConfig {
    const fn default_connection_timeout_ms() -> u64 {
        connection::DEFAULT_CONNECTION_TIMEOUT_MS
    }

    const fn default_poll_interval_ms() -> u64 {
        connection::DEFAULT_POLL_INTERVAL_MS
    }

    const fn default_wait_max_ms() -> u64 {
        connection::DEFAULT_WAIT_MAX_MS
    }

    const fn default_tool_timeout_ms() -> u64 {
        connection::DEFAULT_TOOL_TIMEOUT_MS
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_max(&self) -> Duration {
        Duration::from_millis(self.wait_max_ms)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        if self.tool_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.tool_timeout_ms))
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.connection_timeout_ms > 0,
            "connection.connection_timeout_ms must be greater than zero"
        );
        ensure!(
            self.poll_interval_ms > 0,
            "connection.poll_interval_ms must be greater than zero"
        );
        ensure!(
            self.wait_max_ms >= self.poll_interval_ms,
            "connection.wait_max_ms ({}) must be at least poll_interval_ms ({})",
            self.wait_max_ms,
            self.poll_interval_ms
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures recorded before the breaker opens.
    #[serde(default = "CircuitBreakerConfig::default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cooldown measured from the most recent failure.
    #[serde(default = "CircuitBreakerConfig::default_reset_window_ms")]
    pub reset_window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: Self::default_failure_threshold(),
            reset_window_ms: Self::default_reset_window_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    const fn default_failure_threshold() -> u32 {
        circuit_breaker::DEFAULT_FAILURE_THRESHOLD
    }

    const fn default_reset_window_ms() -> u64 {
        circuit_breaker::DEFAULT_RESET_WINDOW_MS
    }

    pub fn reset_window(&self) -> Duration {
        Duration::from_millis(self.reset_window_ms)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.failure_threshold >= 1,
            "circuit_breaker.failure_threshold must be at least 1"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ToolCacheConfig {
    /// Lifetime of the cached tool list in milliseconds.
    #[serde(default = "ToolCacheConfig::default_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for ToolCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: Self::default_ttl_ms(),
        }
    }
}

impl ToolCacheConfig {
    const fn default_ttl_ms() -> u64 {
        tool_cache::DEFAULT_TTL_MS
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.ttl_ms > 0, "tool_cache.ttl_ms must be greater than zero");
        Ok(())
    }
}

/// Palette and stacking used for computed result layers.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct ResultStyleConfig {
    /// HSL saturation percentage for stroke and fill.
    #[serde(default = "ResultStyleConfig::default_saturation")]
    pub saturation: u8,
    /// HSL lightness percentage for stroke and fill.
    #[serde(default = "ResultStyleConfig::default_lightness")]
    pub lightness: u8,
    #[serde(default = "ResultStyleConfig::default_stroke_width")]
    pub stroke_width: u32,
    #[serde(default = "ResultStyleConfig::default_fill_opacity")]
    pub fill_opacity: f64,
    /// Z-order band for result layers.
    #[serde(default = "ResultStyleConfig::default_z_index")]
    pub z_index: i32,
}

impl Default for ResultStyleConfig {
    fn default() -> Self {
        Self {
            saturation: Self::default_saturation(),
            lightness: Self::default_lightness(),
            stroke_width: Self::default_stroke_width(),
            fill_opacity: Self::default_fill_opacity(),
            z_index: Self::default_z_index(),
        }
    }
}

impl ResultStyleConfig {
    const fn default_saturation() -> u8 {
        result_style::DEFAULT_SATURATION
    }

    const fn default_lightness() -> u8 {
        result_style::DEFAULT_LIGHTNESS
    }

    const fn default_stroke_width() -> u32 {
        result_style::DEFAULT_STROKE_WIDTH
    }

    const fn default_fill_opacity() -> f64 {
        result_style::DEFAULT_FILL_OPACITY
    }

    const fn default_z_index() -> i32 {
        result_style::DEFAULT_Z_INDEX
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.saturation <= 100,
            "result_style.saturation must be between 0 and 100"
        );
        ensure!(
            self.lightness <= 100,
            "result_style.lightness must be between 0 and 100"
        );
        ensure!(
            self.stroke_width > 0,
            "result_style.stroke_width must be greater than zero"
        );
        ensure!(
            (0.0..=1.0).contains(&self.fill_opacity),
            "result_style.fill_opacity must be between 0.0 and 1.0"
        );
        Ok(())
    }
}
