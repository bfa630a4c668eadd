//! Exponential backoff for `Pending` resolutions.

use futures::StreamExt;
use std::env;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::resolution::{Resolution, ResolveError};
use crate::store::SnapshotStream;

/// Retry schedule for documents that have not replicated yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Total attempts before giving up with `Pending` (0 = infinite).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            max_attempts: 12,
        }
    }
}

impl BackoffConfig {
    /// Read `RESOLVE_BACKOFF_BASE_MS`, `RESOLVE_BACKOFF_MAX_MS` and
    /// `RESOLVE_BACKOFF_MAX_ATTEMPTS`, falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |key: &str, fallback: Duration| {
            env::var(key)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };
        Self {
            base_delay: millis("RESOLVE_BACKOFF_BASE_MS", defaults.base_delay),
            max_delay: millis("RESOLVE_BACKOFF_MAX_MS", defaults.max_delay),
            max_attempts: env::var("RESOLVE_BACKOFF_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.max_attempts),
        }
    }

    /// Delay after the `attempt`-th pending result (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Sum of every delay the schedule can wait. `None` when unbounded.
    pub fn horizon(&self) -> Option<Duration> {
        if self.max_attempts == 0 {
            return None;
        }
        Some((0..self.max_attempts - 1).map(|a| self.delay(a)).sum())
    }
}

enum Wake {
    Cancelled,
    Timer,
    Snapshot,
    StreamEnded,
}

async fn next_snapshot(stream: Option<&mut SnapshotStream>) -> Option<Vec<u8>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Run `attempt` until it stops returning `Pending`.
///
/// Between attempts the task sleeps according to `config`, waking early
/// if `wake` (usually a subscription to the awaited document) yields a new
/// snapshot. Exhausting the schedule returns `Ok(Resolution::Pending)`;
/// only a real error or `cancel` ends the loop with `Err`.
pub async fn retry_pending<T, F, Fut>(
    config: &BackoffConfig,
    mut wake: Option<SnapshotStream>,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<Resolution<T>, ResolveError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Resolution<T>, ResolveError>>,
{
    let mut tries: u32 = 0;
    loop {
        if let Resolution::Ready(value) = attempt().await? {
            return Ok(Resolution::Ready(value));
        }
        tries += 1;
        if config.max_attempts != 0 && tries >= config.max_attempts {
            debug!("Still pending after {} attempts", tries);
            return Ok(Resolution::Pending);
        }

        let delay = config.delay(tries - 1);
        debug!("Pending, retrying in {:?} (attempt {})", delay, tries);

        let woke = tokio::select! {
            biased;
            _ = cancel.cancelled() => Wake::Cancelled,
            snapshot = next_snapshot(wake.as_mut()) => match snapshot {
                Some(_) => Wake::Snapshot,
                None => Wake::StreamEnded,
            },
            _ = tokio::time::sleep(delay) => Wake::Timer,
        };

        match woke {
            Wake::Cancelled => return Err(ResolveError::Cancelled),
            Wake::Snapshot => debug!("New snapshot arrived, retrying early"),
            Wake::StreamEnded => wake = None,
            Wake::Timer => {}
        }
    }
}
