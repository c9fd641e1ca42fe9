//! First-signal-wins settlement for one in-flight call.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::InspectorError;

pub type Outcome<T> = Result<T, InspectorError>;

/// Guard shared by every party that may end a call (protocol events, the
/// timeout watchdog, transport failures). Only the first `settle` is delivered.
#[derive(Debug)]
pub struct Settlement<T> {
    settled: AtomicBool,
    late: AtomicUsize,
    sender: Mutex<Option<oneshot::Sender<Outcome<T>>>>,
}

impl<T> Settlement<T> {
    pub fn new() -> (Self, oneshot::Receiver<Outcome<T>>) {
        let (tx, rx) = oneshot::channel();
        let settlement = Self {
            settled: AtomicBool::new(false),
            late: AtomicUsize::new(0),
            sender: Mutex::new(Some(tx)),
        };
        (settlement, rx)
    }

    /// Returns `true` if this call settled the outcome, `false` if an earlier
    /// signal already did (the outcome is then discarded).
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        if self.settled.swap(true, Ordering::AcqRel) {
            self.late.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(tx) = sender {
            // The caller may have stopped waiting; that still counts as settled.
            let _ = tx.send(outcome);
        }
        true
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Number of signals that arrived after the call was already settled.
    pub fn late_signals(&self) -> usize {
        self.late.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_signal_wins() {
        let (settlement, rx) = Settlement::<u8>::new();
        assert!(settlement.settle(Ok(1)));
        assert!(!settlement.settle(Err(InspectorError::Timeout("late".into()))));
        assert!(!settlement.settle(Ok(2)));

        assert_eq!(rx.await.unwrap(), Ok(1));
        assert!(settlement.is_settled());
        assert_eq!(settlement.late_signals(), 2);
    }

    #[test]
    fn settling_after_receiver_dropped_is_fine() {
        let (settlement, rx) = Settlement::<()>::new();
        drop(rx);
        assert!(settlement.settle(Ok(())));
        assert!(settlement.is_settled());
    }
}
