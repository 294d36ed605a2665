//! Synchronization gate between the core's state callback and the frontend.
//!
//! The core reports parameter changes from whatever thread it likes; the
//! frontend occasionally needs to block until a specific run-state is
//! reached (e.g. waiting for the core to report Paused before tearing the
//! surface down). A single mutex-guarded listener slot covers both.

use std::sync::{Arc, Condvar, Mutex};

use crate::params::{CoreParam, EmuState};

/// What `notify` does with the listener once it returns.
///
/// One-shot listeners deregister by returning `Remove`; clearing the slot
/// from inside the callback would need a reentrant lock.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    Retain,
    Remove,
}

pub type StateListener = Box<dyn FnMut(CoreParam, i32) -> Disposition + Send>;

#[derive(Default)]
pub struct StateGate {
    listener: Mutex<Option<StateListener>>,
}

impl StateGate {
    pub fn new() -> StateGate {
        StateGate {
            listener: Mutex::new(None),
        }
    }

    /// Replaces the current listener; last writer wins, `None` clears.
    pub fn set_listener(&self, listener: Option<StateListener>) {
        *self.listener.lock().unwrap() = listener;
    }

    /// Dispatches one state-change event to the registered listener, if any.
    /// Safe to call from any thread.
    pub fn notify(&self, param: CoreParam, value: i32) {
        let mut slot = self.listener.lock().unwrap();
        if let Some(listener) = slot.as_mut() {
            if listener(param, value) == Disposition::Remove {
                *slot = None;
            }
        }
    }

    /// Raw-integer entry point for the FFI boundary. Unknown parameter ids
    /// are logged and dropped.
    pub fn notify_raw(&self, param: i32, value: i32) {
        match CoreParam::from_raw(param) {
            Some(param) => self.notify(param, value),
            None => warn!("state callback with unknown parameter id {}", param),
        }
    }

    /// Blocks the calling thread until the core reports `(param, target)`.
    ///
    /// Registers a one-shot listener, then waits on a condvar in a
    /// predicate-checked loop, so spurious wakeups and wakeups for
    /// non-matching events never end the wait early.
    ///
    /// Only one outstanding wait is supported: a concurrent caller replaces
    /// this one's listener and the earlier wait may then never return.
    pub fn wait_for(&self, param: CoreParam, target: i32) {
        let pair = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = pair.clone();
        self.set_listener(Some(Box::new(move |p, v| {
            if p == param && v == target {
                let (done, cvar) = &*signal;
                *done.lock().unwrap() = true;
                cvar.notify_one();
                Disposition::Remove
            } else {
                Disposition::Retain
            }
        })));

        let (done, cvar) = &*pair;
        let mut done = done.lock().unwrap();
        while !*done {
            done = cvar.wait(done).unwrap();
        }
    }

    /// Blocks until the emulator reports the given run-state.
    pub fn wait_for_emu_state(&self, state: EmuState) {
        self.wait_for(CoreParam::EmuState, state as i32);
    }
}
