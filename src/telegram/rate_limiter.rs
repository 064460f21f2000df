//! Throttle for outgoing replies.
//!
//! Keeps a minimum gap between two sends and, after Telegram answers with a
//! flood wait, blocks every send until the requested deadline has passed.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::TelegramError;

#[derive(Debug, Default)]
struct ThrottleState {
    last_send: Option<Instant>,
    blocked_until: Option<Instant>,
}

impl ThrottleState {
    fn wait_at(&self, now: Instant, min_interval: Duration) -> Duration {
        let gap = self.last_send.map_or(Duration::ZERO, |last| {
            min_interval.saturating_sub(now.saturating_duration_since(last))
        });
        let flood = self
            .blocked_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now));
        gap.max(flood)
    }
}

/// Send throttle shared by every reply of one client.
#[derive(Debug)]
pub struct SendThrottle {
    min_interval: Duration,
    state: Mutex<ThrottleState>,
}

impl SendThrottle {
    /// Creates a throttle with the given minimum gap between sends.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    /// Waits until a send is allowed, then marks the send as performed.
    ///
    /// Returns the duration waited (0 if no wait was needed).
    pub async fn wait_and_acquire(&self) -> Duration {
        let mut state = self.state.lock().await;

        let wait = state.wait_at(Instant::now(), self.min_interval);
        if !wait.is_zero() {
            debug!("Send throttle: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }

        state.last_send = Some(Instant::now());
        state.blocked_until = None;
        wait
    }

    /// Blocks all sends for `wait_seconds` after a flood wait.
    pub async fn handle_flood_wait(&self, wait_seconds: u32) {
        warn!("Flood wait from Telegram: {} seconds", wait_seconds);
        let until = Instant::now() + Duration::from_secs(u64::from(wait_seconds));

        let mut state = self.state.lock().await;
        if state.blocked_until.is_none_or(|current| current < until) {
            state.blocked_until = Some(until);
        }
    }
}

/// Runs `send` through the throttle up to `attempts` times.
///
/// A flood wait blocks the throttle for the requested time, so the next
/// attempt starts only once it has expired. Any other error sleeps for
/// `backoff` before the next attempt.
///
/// Returns the number of the attempt that succeeded.
///
/// # Errors
///
/// Returns the last error once every attempt has failed.
pub async fn send_with_retries<F, Fut, T, E>(
    throttle: &SendThrottle,
    attempts: u32,
    backoff: Duration,
    mut send: F,
) -> Result<u32, TelegramError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<TelegramError>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        let waited = throttle.wait_and_acquire().await;
        if !waited.is_zero() {
            debug!("Waited {:?} for send throttle", waited);
        }

        let err = match send().await {
            Ok(_) => return Ok(attempt),
            Err(e) => e.into(),
        };

        if let TelegramError::FloodWait(seconds) = err {
            warn!("Flood wait {}s on send (attempt {}/{})", seconds, attempt, attempts);
            throttle.handle_flood_wait(seconds).await;
        } else {
            warn!("Send failed (attempt {}/{}): {}", attempt, attempts, err);
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
            }
        }

        if attempt >= attempts {
            return Err(err);
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_send_is_immediate() {
        let throttle = SendThrottle::new(Duration::from_secs(1));
        assert_eq!(throttle.wait_and_acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_between_sends() {
        let throttle = SendThrottle::new(Duration::from_millis(100));
        throttle.wait_and_acquire().await;

        let waited = throttle.wait_and_acquire().await;
        assert_eq!(waited, Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(throttle.wait_and_acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_wait_keeps_longest_deadline() {
        let throttle = SendThrottle::new(Duration::ZERO);
        throttle.handle_flood_wait(60).await;
        // A shorter flood wait never shortens the deadline.
        throttle.handle_flood_wait(1).await;

        assert_eq!(throttle.wait_and_acquire().await, Duration::from_secs(60));
        assert_eq!(throttle.wait_and_acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let throttle = SendThrottle::new(Duration::ZERO);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = send_with_retries(&throttle, 3, Duration::from_secs(1), || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call < 2 {
                    Err(TelegramError::Connection("reset by peer".to_owned()))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let throttle = SendThrottle::new(Duration::ZERO);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = send_with_retries(&throttle, 3, Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TelegramError::Invocation("CHAT_WRITE_FORBIDDEN".to_owned())) }
        })
        .await;

        assert!(matches!(result, Err(TelegramError::Invocation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Backoff runs between attempts, not after the last one.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_wait_pauses_next_attempt() {
        let throttle = SendThrottle::new(Duration::ZERO);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = send_with_retries(&throttle, 3, Duration::from_secs(1), || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call == 1 {
                    Err(TelegramError::FloodWait(35))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert!(start.elapsed() >= Duration::from_secs(35));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_sends_once() {
        let throttle = SendThrottle::new(Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result = send_with_retries(&throttle, 0, Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TelegramError::FloodWait(5)) }
        })
        .await;

        assert!(matches!(result, Err(TelegramError::FloodWait(5))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
