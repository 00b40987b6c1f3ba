//! Reconnect timing: a clamped, server-adjustable delay waited out under
//! a cancellation scope.

use crate::types::EventSourceError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Smallest delay a `retry:` field can select.
pub const MIN_RECONNECTION_TIME: Duration = Duration::from_millis(1000);
/// Largest delay a `retry:` field can select.
pub const MAX_RECONNECTION_TIME: Duration = Duration::from_millis(10_000);
/// Delay used when the stream never provided a `retry:` field.
pub const DEFAULT_RECONNECTION_TIME: Duration = Duration::from_millis(2000);

/// Clamp a server-provided `retry:` value (milliseconds) to the allowed
/// window.
pub fn clamp_reconnection_time(ms: u64) -> Duration {
    Duration::from_millis(ms).clamp(MIN_RECONNECTION_TIME, MAX_RECONNECTION_TIME)
}

/// Wait out the reconnection delay. A cancelled wait means the connection
/// was closed (or the scope otherwise torn down) while the timer was
/// pending; the controller treats that as fatal and schedules nothing
/// further.
pub async fn wait(delay: Duration, cancel: &CancellationToken) -> Result<(), EventSourceError> {
    debug!("reconnecting in {}ms", delay.as_millis());
    tokio::select! {
        _ = cancel.cancelled() => Err(EventSourceError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_low_values_up() {
        assert_eq!(clamp_reconnection_time(0), MIN_RECONNECTION_TIME);
        assert_eq!(clamp_reconnection_time(50), MIN_RECONNECTION_TIME);
        assert_eq!(clamp_reconnection_time(999), MIN_RECONNECTION_TIME);
    }

    #[test]
    fn clamps_high_values_down() {
        assert_eq!(clamp_reconnection_time(999_999), MAX_RECONNECTION_TIME);
        assert_eq!(clamp_reconnection_time(10_001), MAX_RECONNECTION_TIME);
    }

    #[test]
    fn passes_in_range_values_through() {
        assert_eq!(clamp_reconnection_time(1000), Duration::from_millis(1000));
        assert_eq!(clamp_reconnection_time(2500), Duration::from_millis(2500));
        assert_eq!(clamp_reconnection_time(10_000), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_completes_after_delay() {
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();
        wait(Duration::from_millis(1500), &cancel).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn cancelled_wait_is_an_error() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = wait(Duration::from_secs(60), &cancel).await;
        assert!(matches!(result, Err(EventSourceError::Cancelled)));
    }
}
