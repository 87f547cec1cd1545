use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::errors::{MobisyncError, Result};

static INIT: OnceCell<()> = OnceCell::new();

/// Install the global subscriber once; later calls are no-ops.
///
/// `RUST_LOG` takes precedence over `logging.level`. Output goes to stderr so
/// command output on stdout stays machine-readable.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    INIT.get_or_try_init(|| {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.level).map_err(|err| {
                MobisyncError::Telemetry(format!("invalid log level '{}': {err}", config.level))
            })?,
        };

        let json_layer = config
            .json
            .then(|| {
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_thread_ids(true)
            });
        let plain_layer = (!config.json).then(|| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(json_layer)
            .with(plain_layer)
            .try_init()
            .map_err(|err| MobisyncError::Telemetry(err.to_string()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let config = LoggingConfig::default();
        init_tracing(&config).unwrap();
        init_tracing(&LoggingConfig {
            level: "debug".into(),
            json: true,
        })
        .unwrap();
        tracing::info!(component = "telemetry", "subscriber installed");
    }
}
