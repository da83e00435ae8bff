//! Process-wide socket subsystem bookkeeping.
//!
//! Every running server holds a [`SubsystemGuard`]. The first acquisition
//! initializes the subsystem and starts a new generation; dropping the last
//! guard tears it down. Acquiring again afterwards re-initializes.
//!
//! On the platforms mio supports the OS networking stack needs no explicit
//! start-up, so initialization only opens a new generation. The reference
//! count still tells whether any server is live.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

struct SubsystemState {
    references: usize,
    generation: u64,
}

static SUBSYSTEM: Mutex<SubsystemState> = Mutex::new(SubsystemState {
    references: 0,
    generation: 0,
});

fn state() -> MutexGuard<'static, SubsystemState> {
    // counters are updated atomically under the lock; poisoning cannot tear them
    SUBSYSTEM.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps the socket subsystem initialized while alive.
#[derive(Debug)]
#[must_use = "the subsystem is released as soon as the guard is dropped"]
pub struct SubsystemGuard {
    generation: u64,
}

impl SubsystemGuard {
    /// Generation this guard was acquired in.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub fn acquire() -> SubsystemGuard {
    let mut state = state();
    if state.references == 0 {
        state.generation += 1;
        debug!(generation = state.generation, "socket subsystem initialized");
    }
    state.references += 1;
    SubsystemGuard {
        generation: state.generation,
    }
}

impl Drop for SubsystemGuard {
    fn drop(&mut self) {
        let mut state = state();
        state.references = state.references.saturating_sub(1);
        if state.references == 0 {
            debug!(generation = state.generation, "socket subsystem torn down");
        }
    }
}

pub fn reference_count() -> usize {
    state().references
}

/// Number of times the subsystem has been initialized.
pub fn generation() -> u64 {
    state().generation
}

pub fn is_initialized() -> bool {
    state().references > 0
}
