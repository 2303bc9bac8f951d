//! Environment variable source: DRIFTSYNC_ prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Add environment variable overlay to builder.
/// `DRIFTSYNC__SYNC__INTERVAL_SECS=5` sets `sync.interval_secs`.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder.add_source(
        Environment::with_prefix("DRIFTSYNC")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    ))
}
