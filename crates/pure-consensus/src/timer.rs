//! Round timer.
//!
//! A single re-armable alarm. Every firing carries the `(height, view)` it
//! was armed for so the service can discard firings that outlived their
//! round.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::events::ConsensusEvent;
use crate::ports::TimerScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimerTick {
    pub height: u64,
    pub view: u8,
}

impl TimerTick {
    pub fn new(height: u64, view: u8) -> Self {
        TimerTick { height, view }
    }
}

impl fmt::Display for TimerTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.height, self.view)
    }
}

/// `base << (view + 1)`, saturating at `Duration::MAX`
pub fn backoff(base: Duration, view: u8) -> Duration {
    2u32.checked_pow(u32::from(view) + 1)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// Timer backed by a tokio task that sends [`ConsensusEvent::Timeout`] into
/// the service's event channel. Arming again aborts the previous task.
pub struct TokioTimer {
    event_tx: mpsc::Sender<ConsensusEvent>,
    pending: Option<JoinHandle<()>>,
}

impl TokioTimer {
    pub fn new(event_tx: mpsc::Sender<ConsensusEvent>) -> Self {
        TokioTimer {
            event_tx,
            pending: None,
        }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl TimerScheduler for TokioTimer {
    fn schedule(&mut self, tick: TimerTick, after: Duration) {
        self.cancel();

        let event_tx = self.event_tx.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            trace!(%tick, "Timer fired");
            // The receiver is gone only when the service shut down
            let _ = event_tx.send(ConsensusEvent::Timeout(tick)).await;
        }));
        trace!(%tick, ?after, "Timer armed");
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
