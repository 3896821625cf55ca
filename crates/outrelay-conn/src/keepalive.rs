//! Resettable inactivity timer.
//!
//! A [`KeepaliveTimer`] publishes its deadline through a `watch` channel to
//! a spawned task. The task sleeps until the current deadline; a reset moves
//! the deadline and wakes it to sleep again. If the deadline passes first,
//! the task runs its expiry callback once and exits.
//!
//! The task also exits, without firing, when the timer is dropped or the
//! cancellation token is cancelled, so dropping a session's timer is enough
//! to disarm it.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Stand-in deadline for windows too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Outcome of the timer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerResult {
    /// The deadline passed and the expiry callback ran.
    Expired,
    /// The timer was dropped or cancelled first.
    Cancelled,
}

/// A resettable, fire-once deadline.
pub struct KeepaliveTimer {
    window: Duration,
    deadline: watch::Sender<Instant>,
}

impl KeepaliveTimer {
    /// Arm a timer that calls `on_expire` after `window` without a reset.
    pub fn start<F>(window: Duration, cancel: CancellationToken, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (deadline, rx) = watch::channel(deadline_after(window));
        drop(tokio::spawn(async move {
            let outcome = run_timer(rx, cancel, on_expire).await;
            trace!(?outcome, "keepalive timer finished");
        }));
        Self { window, deadline }
    }

    /// Push the deadline to one full window from now.
    pub fn reset(&self) {
        let _ = self.deadline.send_replace(deadline_after(self.window));
    }

    #[cfg(test)]
    fn deadline(&self) -> Instant {
        *self.deadline.borrow()
    }
}

/// `now + window`, saturating to a far-off deadline instead of overflowing.
fn deadline_after(window: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(window).unwrap_or_else(|| now + FAR_FUTURE)
}

async fn run_timer<F>(
    mut deadline: watch::Receiver<Instant>,
    cancel: CancellationToken,
    on_expire: F,
) -> TimerResult
where
    F: FnOnce(),
{
    loop {
        let at = *deadline.borrow_and_update();
        tokio::select! {
            () = time::sleep_until(at) => {
                // A reset or drop may have raced the wakeup.
                match deadline.has_changed() {
                    Ok(true) => continue,
                    Ok(false) => {
                        on_expire();
                        return TimerResult::Expired;
                    }
                    Err(_) => return TimerResult::Cancelled,
                }
            }
            changed = deadline.changed() => {
                if changed.is_err() {
                    return TimerResult::Cancelled;
                }
            }
            () = cancel.cancelled() => {
                return TimerResult::Cancelled;
            }
        }
    }
}
