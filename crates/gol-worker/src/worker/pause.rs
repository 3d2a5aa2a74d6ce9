//! Worker-local pause gate
//!
//! Turn computation runs on blocking threads and consults the gate before
//! every cell, so the common (unpaused) path must stay a single atomic load.
//! Only when the flag is set does the caller take the mutex and park on the
//! condvar until [`PauseGate::set`] releases it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct PauseGate {
    paused: Mutex<bool>,
    resumed: Condvar,
    engaged: AtomicBool,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engage or release the gate. Returns `true` if the state changed.
    pub fn set(&self, paused: bool) -> bool {
        let mut state = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = *state != paused;
        *state = paused;
        self.engaged.store(paused, Ordering::Release);
        if !paused {
            self.resumed.notify_all();
        }
        changed
    }

    pub fn is_paused(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    /// Block the calling thread while the gate is engaged.
    pub fn wait_if_paused(&self) {
        if !self.engaged.load(Ordering::Acquire) {
            return;
        }

        let mut state = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        while *state {
            state = self
                .resumed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
