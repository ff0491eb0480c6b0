//! The node's `config.toml`: gossip sync and reconnect settings, plus tracing bootstrap.

use core::time::Duration;
use std::fs::{read_to_string, write};

use camino::Utf8Path;
use eyre::{Result as EyreResult, WrapErr};
use serde::{Deserialize, Serialize};
use skein_gossip::SyncConfig;
use skein_reconnect::config as reconnect;
use skein_reconnect::{ReconnectConfig, SigningThreshold};
use tracing::debug;

mod logging;

pub use logging::init_tracing;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[non_exhaustive]
pub struct ConfigFile {
    #[serde(default)]
    pub sync: SyncSection,

    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// `[sync]`, see [`SyncConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct SyncSection {
    #[serde(rename = "rpc_sleep_after_sync_ms", with = "serde_duration")]
    pub rpc_sleep_after_sync: Duration,

    /// `0` lifts the limit.
    pub max_sync_event_count: usize,

    #[serde(rename = "max_sync_time_ms", with = "serde_duration")]
    pub max_sync_time: Duration,

    #[serde(rename = "sync_keepalive_period_ms", with = "serde_duration")]
    pub sync_keepalive_period: Duration,

    pub filter_likely_duplicates: bool,

    #[serde(rename = "non_ancestor_filter_threshold_ms", with = "serde_duration")]
    pub non_ancestor_filter_threshold: Duration,

    pub broadcast: bool,

    #[serde(rename = "rpc_idle_dispatch_poll_timeout_ms", with = "serde_duration")]
    pub rpc_idle_dispatch_poll_timeout: Duration,

    pub fair_max_concurrent_syncs: f64,

    pub fair_minimal_round_robin_size: f64,

    pub sync_protocol_permit_count: usize,
}

impl Default for SyncSection {
    fn default() -> Self {
        SyncConfig::default().into()
    }
}

impl From<SyncConfig> for SyncSection {
    fn from(config: SyncConfig) -> Self {
        Self {
            rpc_sleep_after_sync: config.rpc_sleep_after_sync,
            max_sync_event_count: config.max_sync_event_count,
            max_sync_time: config.max_sync_time,
            sync_keepalive_period: config.sync_keepalive_period,
            filter_likely_duplicates: config.filter_likely_duplicates,
            non_ancestor_filter_threshold: config.non_ancestor_filter_threshold,
            broadcast: config.broadcast,
            rpc_idle_dispatch_poll_timeout: config.rpc_idle_dispatch_poll_timeout,
            fair_max_concurrent_syncs: config.fair_max_concurrent_syncs,
            fair_minimal_round_robin_size: config.fair_minimal_round_robin_size,
            sync_protocol_permit_count: config.sync_protocol_permit_count,
        }
    }
}

impl From<SyncSection> for SyncConfig {
    fn from(section: SyncSection) -> Self {
        Self {
            rpc_sleep_after_sync: section.rpc_sleep_after_sync,
            max_sync_event_count: section.max_sync_event_count,
            max_sync_time: section.max_sync_time,
            sync_keepalive_period: section.sync_keepalive_period,
            filter_likely_duplicates: section.filter_likely_duplicates,
            non_ancestor_filter_threshold: section.non_ancestor_filter_threshold,
            broadcast: section.broadcast,
            rpc_idle_dispatch_poll_timeout: section.rpc_idle_dispatch_poll_timeout,
            fair_max_concurrent_syncs: section.fair_max_concurrent_syncs,
            fair_minimal_round_robin_size: section.fair_minimal_round_robin_size,
            sync_protocol_permit_count: section.sync_protocol_permit_count,
        }
    }
}

/// `[reconnect]`, see [`ReconnectConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ReconnectSection {
    pub active: bool,

    /// Seconds after startup during which reconnect is allowed, negative for no limit.
    pub reconnect_window_seconds: i64,

    pub fallen_behind_threshold: f64,

    #[serde(rename = "async_stream_timeout_ms", with = "serde_duration")]
    pub async_stream_timeout: Duration,

    #[serde(rename = "minimum_time_between_reconnects_ms", with = "serde_duration")]
    pub minimum_time_between_reconnects: Duration,

    pub maximum_reconnect_failures_before_shutdown: u32,

    pub max_concurrent_teachers: usize,

    pub signing_threshold: SigningThreshold,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        ReconnectConfig::default().into()
    }
}

impl From<ReconnectConfig> for ReconnectSection {
    fn from(config: ReconnectConfig) -> Self {
        Self {
            active: config.active,
            reconnect_window_seconds: reconnect::window_to_seconds(config.reconnect_window),
            fallen_behind_threshold: config.fallen_behind_threshold,
            async_stream_timeout: config.async_stream_timeout,
            minimum_time_between_reconnects: config.minimum_time_between_reconnects,
            maximum_reconnect_failures_before_shutdown: config
                .maximum_reconnect_failures_before_shutdown,
            max_concurrent_teachers: config.max_concurrent_teachers,
            signing_threshold: config.signing_threshold,
        }
    }
}

impl From<ReconnectSection> for ReconnectConfig {
    fn from(section: ReconnectSection) -> Self {
        Self {
            active: section.active,
            reconnect_window: reconnect::window_from_seconds(section.reconnect_window_seconds),
            fallen_behind_threshold: section.fallen_behind_threshold,
            async_stream_timeout: section.async_stream_timeout,
            minimum_time_between_reconnects: section.minimum_time_between_reconnects,
            maximum_reconnect_failures_before_shutdown: section
                .maximum_reconnect_failures_before_shutdown,
            max_concurrent_teachers: section.max_concurrent_teachers,
            signing_threshold: section.signing_threshold,
        }
    }
}

impl ConfigFile {
    #[must_use]
    pub fn new(sync: SyncConfig, reconnect: ReconnectConfig) -> Self {
        Self {
            sync: sync.into(),
            reconnect: reconnect.into(),
        }
    }

    #[must_use]
    pub fn sync_config(&self) -> SyncConfig {
        self.sync.into()
    }

    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        self.reconnect.into()
    }

    #[must_use]
    pub fn exists(dir: &Utf8Path) -> bool {
        dir.join(CONFIG_FILE).is_file()
    }

    pub fn load(dir: &Utf8Path) -> EyreResult<Self> {
        let path = dir.join(CONFIG_FILE);
        let content = read_to_string(&path)
            .wrap_err_with(|| format!("failed to read configuration from {path:?}"))?;

        toml::from_str(&content).wrap_err_with(|| format!("failed to parse {path:?}"))
    }

    pub fn save(&self, dir: &Utf8Path) -> EyreResult<()> {
        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)?;

        write(&path, content)
            .wrap_err_with(|| format!("failed to write configuration to {path:?}"))?;

        Ok(())
    }

    /// Only writes the file if its content would change. Returns whether it did.
    pub fn save_if_changed(&self, dir: &Utf8Path) -> EyreResult<bool> {
        let path = dir.join(CONFIG_FILE);
        let new_content = toml::to_string_pretty(self)?;

        let changed = read_to_string(&path).map_or(true, |existing| existing != new_content);

        if changed {
            write(&path, new_content)
                .wrap_err_with(|| format!("failed to write configuration to {path:?}"))?;
        } else {
            debug!(%path, "Configuration unchanged, not writing");
        }

        Ok(changed)
    }
}

/// Durations on disk are whole milliseconds.
mod serde_duration {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
