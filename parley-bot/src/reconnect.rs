//! Keep a session connected.

use std::time::Duration;

use parley_sdk::session::{Session, SessionError};
use rand::Rng;
use tracing::{info, warn};

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            failures: 0,
        }
    }

    /// Delay before the next attempt. Each call doubles the following one,
    /// plus up to a quarter of jitter, capped at the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.failures += 1;
        let base = delay.as_millis() as u64;
        let jitter = if base >= 4 {
            rand::thread_rng().gen_range(0..=base / 4)
        } else {
            0
        };
        let next = Duration::from_millis(base.saturating_mul(2).saturating_add(jitter));
        self.current = next.min(self.max);
        delay
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.failures = 0;
    }
}

/// Whether the connection that ended with `error` had got through
/// registration, so that the next attempt starts from the initial delay.
fn was_established(error: &SessionError) -> bool {
    !matches!(
        error,
        SessionError::Connect { .. } | SessionError::RegistrationFailed { .. }
    )
}

/// Run `session` until shutdown is requested, reconnecting after every
/// failure.
pub async fn run(session: &mut Session, mut backoff: Backoff) {
    let handle = session.handle();
    loop {
        let result = session.run().await;
        if handle.is_shutdown() {
            info!("Shut down");
            return;
        }
        let error = match result {
            Ok(()) => {
                info!("Session ended");
                return;
            }
            Err(e) => e,
        };
        if was_established(&error) {
            backoff.reset();
        }
        let delay = backoff.next_delay();
        warn!(
            error = %error,
            attempt = backoff.failures(),
            delay_secs = delay.as_secs(),
            "Disconnected, will reconnect"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = handle.shutdown_requested() => {
                info!("Shutdown requested while waiting to reconnect");
                return;
            }
        }
    }
}
