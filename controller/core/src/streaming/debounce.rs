//! Prose debounce window
//!
//! The first buffered fragment arms the window; later fragments ride along
//! until it closes, so a continuous stream still flushes at least once per
//! window.

use std::time::Duration;

use tokio::time::Instant;

/// Deadline for flushing buffered prose
#[derive(Debug)]
pub struct Debounce {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    /// Create a disarmed debounce with the given window
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Arm the window unless it is already running
    pub fn arm(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.window);
        }
    }

    /// Disarm without waiting
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether a flush is pending
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Configured window
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Resolves when the window closes; pends forever while disarmed.
    ///
    /// Cancel-safe. The caller disarms with [`cancel`](Self::cancel) after
    /// acting on the expiry.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
