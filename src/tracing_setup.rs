//! Subscriber installation for embedding applications.

use debrief_config::DebugConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

/// Install a global `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over the configured level and targets. Returns
/// `false` when tracing is disabled in config or a subscriber already exists.
pub fn init_tracing(config: &DebugConfig) -> bool {
    if !config.enable_tracing && std::env::var_os("RUST_LOG").is_none() {
        return false;
    }

    let filter = build_filter(config);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    match tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                error = %err,
                "tracing already initialized; skipping calc client tracing setup"
            );
            false
        }
    }
}

fn build_filter(config: &DebugConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(config.filter_directives())
            .unwrap_or_else(|_| EnvFilter::new(config.trace_level.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use debrief_config::TraceLevel;
    use serial_test::serial;

    #[test]
    #[serial]
    fn disabled_config_installs_nothing() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(!init_tracing(&DebugConfig::default()));
    }

    #[test]
    #[serial]
    fn second_initialisation_is_tolerated() {
        let config = DebugConfig {
            enable_tracing: true,
            trace_level: TraceLevel::Debug,
            trace_targets: vec!["debrief_calc_client::connection=trace".into()],
        };
        init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}
