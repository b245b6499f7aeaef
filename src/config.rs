use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process-wide defaults for timers and retry behavior.
///
/// Individual `subscribe()` calls inherit these unless the caller overrides
/// a specific knob on [`crate::subscription::SubscribeOptions`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RealtimeClientConfig {
    /// How long to wait for a `GQL_START_ACK` before giving up on a pending
    /// subscription.
    #[serde(default = "default_start_ack_timeout", with = "humantime_duration")]
    pub start_ack_timeout: Duration,

    /// How long to wait for `connection_ack` during the handshake before
    /// rejecting the attempt.
    #[serde(default = "default_connection_ack_timeout", with = "humantime_duration")]
    pub connection_ack_timeout: Duration,

    /// Hard keep-alive deadline. Overridden per-connection by the server's
    /// `connection_ack.payload.connectionTimeoutMs` when present.
    #[serde(default = "default_keep_alive_hard_timeout", with = "humantime_duration")]
    pub keep_alive_hard_timeout: Duration,

    /// Soft keep-alive alert threshold; crossing it publishes
    /// `KEEP_ALIVE_MISSED` without closing the socket.
    #[serde(default = "default_keep_alive_soft_timeout", with = "humantime_duration")]
    pub keep_alive_soft_timeout: Duration,

    /// Grace period after the subscription table empties before the socket
    /// is actually closed.
    #[serde(default = "default_idle_close_grace", with = "humantime_duration")]
    pub idle_close_grace: Duration,

    /// Base delay for the jittered exponential retry utility.
    #[serde(default = "default_retry_base_delay", with = "humantime_duration")]
    pub retry_base_delay: Duration,

    /// Exponential growth factor applied to `retry_base_delay` on each attempt.
    #[serde(default = "default_retry_factor")]
    pub retry_factor: f64,

    /// Upper bound on any single retry delay.
    #[serde(default = "default_retry_max_delay", with = "humantime_duration")]
    pub retry_max_delay: Duration,

    /// Maximum number of handshake retry attempts before surfacing the last
    /// error to all pending waiters.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: usize,

    /// AppSync `connection_error` / `errorCode` values that abort retry
    /// immediately.
    #[serde(default = "default_non_retryable_codes")]
    pub non_retryable_handshake_codes: Vec<i64>,
}

impl Default for RealtimeClientConfig {
    fn default() -> Self {
        Self {
            start_ack_timeout: default_start_ack_timeout(),
            connection_ack_timeout: default_connection_ack_timeout(),
            keep_alive_hard_timeout: default_keep_alive_hard_timeout(),
            keep_alive_soft_timeout: default_keep_alive_soft_timeout(),
            idle_close_grace: default_idle_close_grace(),
            retry_base_delay: default_retry_base_delay(),
            retry_factor: default_retry_factor(),
            retry_max_delay: default_retry_max_delay(),
            retry_max_attempts: default_retry_max_attempts(),
            non_retryable_handshake_codes: default_non_retryable_codes(),
        }
    }
}

fn default_start_ack_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_connection_ack_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_keep_alive_hard_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_keep_alive_soft_timeout() -> Duration {
    Duration::from_secs(4 * 60)
}

fn default_idle_close_grace() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_retry_factor() -> f64 {
    1.5
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_max_attempts() -> usize {
    8
}

/// `401`/`403`-class AppSync `connection_error` codes, which abort retry
/// after one attempt rather than being treated as transient.
fn default_non_retryable_codes() -> Vec<i64> {
    vec![400, 401, 403]
}

/// Minimal `serde(with = ...)` shim so config fields can read/write plain
/// millisecond integers instead of requiring callers to hand-roll a
/// `Duration` visitor; kept local since this crate only needs millisecond
/// granularity and doesn't want to pull in `humantime-serde` for one field
/// shape.
mod humantime_duration {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
