//! Built-in defaults, the lowest layer of every load.

use crate::config::DEFAULT_LISTEN;
use crate::diff::DEFAULT_BLOCK_SIZE;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};

pub(crate) fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("credential", "")?
        .set_default("listen", DEFAULT_LISTEN)?
        .set_default("sync.interval_secs", 10i64)?
        .set_default("sync.block_size", DEFAULT_BLOCK_SIZE as i64)?
        .set_default("sync.temp_max_age_secs", 3600i64)?
        .set_default("lock.attempts", 10i64)?
        .set_default("lock.backoff_ms", 200i64)?
        .set_default("lock.lease_secs", 60i64)?
        .set_default("tombstone_ttl_secs", 86_400i64)?
        .set_default("net.connect_timeout_ms", 5_000i64)?
        .set_default("net.io_timeout_ms", 30_000i64)
}
