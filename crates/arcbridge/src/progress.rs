//! Byte counter to percentage conversion.
//!
//! Every stream adapter of an operation shares one [`ProgressAccumulator`].
//! Adapters report bytes as they pass; an event reaches the observer only
//! when the whole percentage strictly increases, so small reads and writes
//! do not flood the host.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::observer::TransferObserver;

/// Emitted when the whole percentage grows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressEvent {
    pub percent: u8,
    /// Growth since the previous event.
    pub delta: u8,
    pub bytes_transferred: u64,
    pub bytes_total: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressState {
    pub bytes_transferred: u64,
    pub bytes_total: u64,
    pub last_emitted_percent: u8,
}

impl ProgressState {
    fn percent(&self) -> Option<u8> {
        if self.bytes_total == 0 {
            return None;
        }
        let percent = u128::from(self.bytes_transferred) * 100 / u128::from(self.bytes_total);
        Some(percent.min(100) as u8)
    }
}

pub struct ProgressAccumulator {
    state: Mutex<ProgressState>,
    observer: Option<Arc<dyn TransferObserver>>,
}

impl ProgressAccumulator {
    pub fn new(observer: Option<Arc<dyn TransferObserver>>) -> Self {
        Self {
            state: Mutex::new(ProgressState::default()),
            observer,
        }
    }

    pub fn set_total(&self, total: u64) {
        self.state.lock().bytes_total = total;
    }

    /// Count `bytes` and notify the observer if the percentage moved.
    ///
    /// The observer runs after the lock is released, so it may itself
    /// trigger further byte counts.
    pub fn advance(&self, bytes: u64) -> Option<ProgressEvent> {
        let event = {
            let mut state = self.state.lock();
            state.bytes_transferred = state.bytes_transferred.saturating_add(bytes);
            match state.percent() {
                Some(percent) if percent > state.last_emitted_percent => {
                    let delta = percent - state.last_emitted_percent;
                    state.last_emitted_percent = percent;
                    Some(ProgressEvent {
                        percent,
                        delta,
                        bytes_transferred: state.bytes_transferred,
                        bytes_total: state.bytes_total,
                    })
                }
                _ => None,
            }
        };

        if let (Some(event), Some(observer)) = (&event, &self.observer) {
            observer.on_progress(event);
        }
        event
    }

    pub fn snapshot(&self) -> ProgressState {
        *self.state.lock()
    }
}

impl Default for ProgressAccumulator {
    fn default() -> Self {
        Self::new(None)
    }
}
