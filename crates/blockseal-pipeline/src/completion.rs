//! One-shot completion futures.
//!
//! All suspension points in the pipeline (end-of-round state hashes, block
//! signatures, the fatal-shutdown latch) are completion-based: a waiter
//! blocks on a condvar until some other thread publishes the value. Nothing
//! spins, and completing twice is a silent no-op (first value wins).

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

struct Inner<T> {
    value: Mutex<Option<T>>,
    cv: Condvar,
}

/// A cloneable handle to a value that will be produced exactly once.
pub struct Completion<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Completion<T> {
    /// A completion with no value yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                value: Mutex::new(None),
                cv: Condvar::new(),
            }),
        }
    }

    /// A completion that already holds `value`.
    #[must_use]
    pub fn completed(value: T) -> Self {
        let c = Self::new();
        c.complete(value);
        c
    }

    /// Publish the value. Returns `false` if a value was already published.
    pub fn complete(&self, value: T) -> bool {
        let mut slot = self.inner.value.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.inner.cv.notify_all();
        true
    }

    /// Whether a value has been published.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.value.lock().is_some()
    }
}

impl<T: Clone> Completion<T> {
    /// The value, if already published.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        self.inner.value.lock().clone()
    }

    /// Block until the value is published.
    #[must_use]
    pub fn wait(&self) -> T {
        let mut slot = self.inner.value.lock();
        loop {
            if let Some(v) = slot.as_ref() {
                return v.clone();
            }
            self.inner.cv.wait(&mut slot);
        }
    }

    /// Block until the value is published or `timeout` elapses.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let mut slot = self.inner.value.lock();
        if let Some(v) = slot.as_ref() {
            return Some(v.clone());
        }
        let _ = self.inner.cv.wait_for(&mut slot, timeout);
        slot.clone()
    }
}
