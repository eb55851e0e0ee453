//! Share-able, poll-or-block completion handle for a value produced by a
//! job (spec §4.2).
//!
//! [`Future::is_ready`] never blocks. [`Future::produce_value`] blocks until
//! the underlying cell is populated, then returns a clone of the value or
//! re-raises the stored error. The cell is share-able: cloning a `Future`
//! gives an independent handle onto the same completion, and every clone
//! observes the same outcome.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use edge_error::OrchestratorError;
use std::sync::{Arc, Condvar, Mutex};

enum Slot<T> {
    Pending,
    Ok(T),
    Err(OrchestratorError),
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// The producer-side half of a [`Future`]/[`Promise`] pair.
///
/// Held privately by the job that will eventually fulfil it; never cloned
/// (only the `Future` side is share-able).
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

/// A share-able handle to a value a job will eventually produce.
#[derive(Clone)]
pub struct Future<T> {
    inner: Arc<Inner<T>>,
}

/// Create a connected `(Promise<T>, Future<T>)` pair.
pub fn channel<T>() -> (Promise<T>, Future<T>) {
    let inner = Arc::new(Inner {
        slot: Mutex::new(Slot::Pending),
        ready: Condvar::new(),
    });
    (
        Promise {
            inner: Arc::clone(&inner),
        },
        Future { inner },
    )
}

impl<T> Promise<T> {
    /// Fulfil the promise with a value. Fulfilling an already-fulfilled
    /// promise is a programmer error and silently does nothing further
    /// (the scheduler only ever calls this once per job, at `COMPLETE`).
    pub fn fulfill(self, value: T) {
        let mut slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Ok(value);
        }
        drop(slot);
        self.inner.ready.notify_all();
    }

    /// Fulfil the promise with an error, to be re-raised by every future
    /// `produce_value()` call (spec §7: "errors inside a job become the
    /// promise's stored error").
    pub fn fail(self, err: OrchestratorError) {
        let mut slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Err(err);
        }
        drop(slot);
        self.inner.ready.notify_all();
    }
}

impl<T: Clone> Future<T> {
    /// Non-blocking poll: true once the promise has been fulfilled (with a
    /// value or an error).
    pub fn is_ready(&self) -> bool {
        !matches!(
            *self.inner.slot.lock().unwrap_or_else(|e| e.into_inner()),
            Slot::Pending
        )
    }

    /// Block until the promise is fulfilled, then return the value or
    /// re-raise the stored error (cloned, so every caller — and every
    /// repeated call — observes the same outcome).
    pub fn produce_value(&self) -> Result<T, OrchestratorError> {
        let mut slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        while matches!(*slot, Slot::Pending) {
            slot = self
                .inner
                .ready
                .wait(slot)
                .unwrap_or_else(|e| e.into_inner());
        }
        match &*slot {
            Slot::Ok(v) => Ok(v.clone()),
            Slot::Err(e) => Err(e.clone_opaque()),
            Slot::Pending => unreachable!("loop only exits once not pending"),
        }
    }
}
