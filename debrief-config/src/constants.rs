pub mod engine {
    /// Interpreter used to launch the analysis engine.
    pub const DEFAULT_COMMAND: &str = "python";
    /// Module that starts the engine's MCP server on stdio.
    pub const DEFAULT_MODULE: &str = "debrief_calc.mcp.server";
}

pub mod connection {
    /// Handshake timeout in milliseconds.
    pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 5_000;
    /// Interval between state polls while another caller is connecting.
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
    /// Upper bound on how long a caller waits for an in-flight connect.
    pub const DEFAULT_WAIT_MAX_MS: u64 = 5_000;
    /// Per-call timeout for tool execution (0 disables).
    pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 120_000;
}

pub mod circuit_breaker {
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
    pub const DEFAULT_RESET_WINDOW_MS: u64 = 30_000;
}

pub mod tool_cache {
    pub const DEFAULT_TTL_MS: u64 = 60_000;
}

pub mod result_style {
    pub const DEFAULT_SATURATION: u8 = 70;
    pub const DEFAULT_LIGHTNESS: u8 = 50;
    pub const DEFAULT_STROKE_WIDTH: u32 = 2;
    pub const DEFAULT_FILL_OPACITY: f64 = 0.3;
    /// Result layers sit above every source layer.
    pub const DEFAULT_Z_INDEX: i32 = 100;
}

pub mod files {
    /// Name of the configuration file looked up in each layer.
    pub const CONFIG_FILE_NAME: &str = "calc.toml";
    /// Directory (under home and workspace) holding debrief configuration.
    pub const CONFIG_DIR_NAME: &str = ".debrief";
    /// Explicit configuration file override.
    pub const CONFIG_PATH_ENV: &str = "DEBRIEF_CALC_CONFIG_PATH";
    /// Workspace root override.
    pub const WORKSPACE_ENV: &str = "DEBRIEF_WORKSPACE";
}
