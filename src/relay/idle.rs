//! Inactivity timer
//!
//! Cancels a token once a full period passes without any recorded activity.
//! Expiry happens between one and two periods after the last activity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Cancels `token` after a period of inactivity
#[derive(Debug)]
pub struct ActivityTimer {
    activity: AtomicBool,
    timeout: Mutex<Duration>,
    reset: Notify,
    token: CancellationToken,
}

impl ActivityTimer {
    /// Start a timer task watching `token`
    ///
    /// The task ends when the token is cancelled, by this timer or anyone else.
    pub fn spawn(token: CancellationToken, timeout: Duration) -> Arc<Self> {
        let timer = Arc::new(Self {
            activity: AtomicBool::new(true),
            timeout: Mutex::new(timeout),
            reset: Notify::new(),
            token,
        });
        if timeout.is_zero() {
            timer.token.cancel();
        }
        tokio::spawn(Arc::clone(&timer).run());
        timer
    }

    /// Record activity
    pub fn update(&self) {
        self.activity.store(true, Ordering::Release);
    }

    /// Re-arm with a new period; a zero period cancels immediately
    pub fn set_timeout(&self, timeout: Duration) {
        if timeout.is_zero() {
            self.token.cancel();
            return;
        }
        *self.timeout.lock() = timeout;
        self.update();
        self.reset.notify_one();
    }

    /// Current period
    pub fn timeout(&self) -> Duration {
        *self.timeout.lock()
    }

    async fn run(self: Arc<Self>) {
        loop {
            let period = self.timeout();
            tokio::select! {
                () = self.token.cancelled() => return,
                () = self.reset.notified() => continue,
                () = time::sleep(period) => {
                    if !self.activity.swap(false, Ordering::AcqRel) {
                        tracing::trace!(?period, "inactivity timeout");
                        self.token.cancel();
                        return;
                    }
                }
            }
        }
    }
}
