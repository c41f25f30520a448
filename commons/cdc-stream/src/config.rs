use std::time::Duration;

use envconfig::Envconfig;

use crate::types::ShardIteratorType;

#[derive(Envconfig, Clone, Debug)]
pub struct ListenerConfig {
    /// Records accumulated before a batch is flushed early.
    #[envconfig(from = "CDC_BATCH_SIZE", default = "100")]
    pub batch_size: usize,

    #[envconfig(from = "CDC_POLL_INTERVAL_MS", default = "5000")]
    pub poll_interval_ms: u64,

    #[envconfig(from = "CDC_SCAN_INTERVAL_MS", default = "30000")]
    pub scan_interval_ms: u64,

    #[envconfig(from = "CDC_EXPIRE_INTERVAL_MS", default = "43200000")]
    pub expire_interval_ms: u64,

    #[envconfig(from = "CDC_COMPLETED_RETENTION_MS", default = "129600000")]
    pub completed_retention_ms: u64,

    #[envconfig(from = "CDC_BACKOFF_BASE_MS", default = "1000")]
    pub backoff_base_ms: u64,

    #[envconfig(from = "CDC_BACKOFF_MAX_MULTIPLIER", default = "16")]
    pub backoff_max_multiplier: u32,

    #[envconfig(from = "CDC_INVOKE_RETRY_MS", default = "3000")]
    pub invoke_retry_ms: u64,

    /// Pause after an empty page from a shard that is still open.
    #[envconfig(from = "CDC_IDLE_DELAY_MS", default = "3000")]
    pub idle_delay_ms: u64,

    #[envconfig(from = "CDC_RECORDS_LIMIT", default = "1000")]
    pub records_limit: usize,

    #[envconfig(from = "CDC_SHARD_PAGE_LIMIT", default = "100")]
    pub shard_page_limit: usize,

    #[envconfig(from = "CDC_SHARD_ITERATOR_TYPE", default = "TRIM_HORIZON")]
    pub iterator_type: ShardIteratorType,

    /// Capacity of the record channel; zero makes every send a hand-off.
    #[envconfig(from = "CDC_CHANNEL_CAPACITY", default = "0")]
    pub channel_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_ms: 5_000,
            scan_interval_ms: 30_000,
            expire_interval_ms: 12 * 60 * 60 * 1000,
            completed_retention_ms: 36 * 60 * 60 * 1000,
            backoff_base_ms: 1_000,
            backoff_max_multiplier: 16,
            invoke_retry_ms: 3_000,
            idle_delay_ms: 3_000,
            records_limit: 1_000,
            shard_page_limit: 100,
            iterator_type: ShardIteratorType::TrimHorizon,
            channel_capacity: 0,
        }
    }
}

/// Upper bound for every configured delay or interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[inline]
fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms).min(MAX_INTERVAL)
}

impl ListenerConfig {
    #[inline]
    pub fn poll_interval(&self) -> Duration {
        millis(self.poll_interval_ms.max(1))
    }

    #[inline]
    pub fn scan_interval(&self) -> Duration {
        millis(self.scan_interval_ms.max(1))
    }

    #[inline]
    pub fn expire_interval(&self) -> Duration {
        millis(self.expire_interval_ms.max(1))
    }

    #[inline]
    pub fn completed_retention(&self) -> Duration {
        millis(self.completed_retention_ms)
    }

    #[inline]
    pub fn backoff_base(&self) -> Duration {
        millis(self.backoff_base_ms)
    }

    #[inline]
    pub fn invoke_retry(&self) -> Duration {
        millis(self.invoke_retry_ms)
    }

    #[inline]
    pub fn idle_delay(&self) -> Duration {
        millis(self.idle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_are_clamped() {
        let config = ListenerConfig {
            poll_interval_ms: 0,
            scan_interval_ms: u64::MAX,
            expire_interval_ms: u64::MAX,
            backoff_base_ms: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.scan_interval(), MAX_INTERVAL);
        assert_eq!(config.expire_interval(), MAX_INTERVAL);
        assert_eq!(config.backoff_base(), MAX_INTERVAL);
        assert_eq!(config.invoke_retry(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn clamped_interval_fits_an_instant() {
        let config = ListenerConfig {
            scan_interval_ms: u64::MAX,
            ..Default::default()
        };
        let now = tokio::time::Instant::now();
        assert!(now.checked_add(config.scan_interval()).is_some());
    }
}
