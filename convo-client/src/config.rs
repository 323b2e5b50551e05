use std::{str::FromStr, time::Duration};

use anyhow::Context;

use crate::api::DEFAULT_PAGE_SIZE;

/// Tunables of a conversation session
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of comments requested per page
    pub page_size: u32,

    /// Reconciliation cycles an orphan reply waits for its parent before being dropped
    pub orphan_max_cycles: u32,

    /// Shortest delay between two realtime fetches, whatever the server asks for
    pub realtime_min_delay_ms: u64,

    /// Realtime fetch attempts per cycle
    pub realtime_attempts: u32,

    /// Wait before retrying a failed realtime fetch, doubled on each further attempt
    pub realtime_backoff_ms: u64,

    /// Delay before the next realtime cycle once all its attempts failed
    pub realtime_retry_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            page_size: DEFAULT_PAGE_SIZE,
            orphan_max_cycles: 5,
            realtime_min_delay_ms: 1000,
            realtime_attempts: 3,
            realtime_backoff_ms: 1000,
            realtime_retry_delay_ms: 5000,
        }
    }
}

fn env_override<T>(name: &str, target: &mut T) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Ok(raw) = std::env::var(name) {
        *target = raw
            .parse()
            .with_context(|| format!("parsing environment variable {name}={raw:?}"))?;
    }
    Ok(())
}

impl Config {
    /// Default configuration, overridden by the `CONVO_*` environment variables that are set
    pub fn from_env() -> anyhow::Result<Config> {
        let mut cfg = Config::default();
        env_override("CONVO_PAGE_SIZE", &mut cfg.page_size)?;
        env_override("CONVO_ORPHAN_MAX_CYCLES", &mut cfg.orphan_max_cycles)?;
        env_override("CONVO_REALTIME_MIN_DELAY_MS", &mut cfg.realtime_min_delay_ms)?;
        env_override("CONVO_REALTIME_ATTEMPTS", &mut cfg.realtime_attempts)?;
        env_override("CONVO_REALTIME_BACKOFF_MS", &mut cfg.realtime_backoff_ms)?;
        env_override("CONVO_REALTIME_RETRY_DELAY_MS", &mut cfg.realtime_retry_delay_ms)?;
        anyhow::ensure!(cfg.page_size > 0, "CONVO_PAGE_SIZE must be positive");
        anyhow::ensure!(cfg.realtime_attempts > 0, "CONVO_REALTIME_ATTEMPTS must be positive");
        Ok(cfg)
    }

    pub fn realtime_min_delay(&self) -> Duration {
        Duration::from_millis(self.realtime_min_delay_ms)
    }

    pub fn realtime_backoff(&self) -> Duration {
        Duration::from_millis(self.realtime_backoff_ms)
    }

    pub fn realtime_retry_delay(&self) -> Duration {
        Duration::from_millis(self.realtime_retry_delay_ms)
    }
}
