//! Bounded queue primitives used by the job scheduler (spec §4.1).
//!
//! The source models two variants over one ring: a lock-free SPSC ring, and
//! an MPSC variant that wraps the same ring behind a producer-side lock. In
//! safe Rust we collapse both onto one mutex-guarded [`VecDeque`]-backed
//! [`Queue`] and keep the SPSC/MPSC distinction as a documented usage
//! contract via the [`SpscQueue`] and [`MpscQueue`] newtypes, rather than two
//! different lock strategies — the admission discipline the scheduler cares
//! about (single vs. multiple logical producers) does not depend on it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

/// Errors returned by [`Queue::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity.
    Full {
        /// Configured maximum capacity.
        max: usize,
    },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Full { max } => write!(f, "queue is full (capacity {max})"),
        }
    }
}

impl std::error::Error for QueueError {}

/// A bounded, mutex-guarded FIFO ring.
///
/// `push` never blocks: once the queue is at capacity it returns
/// [`QueueError::Full`] rather than spinning or deadlocking the caller (spec
/// §9 flags the source's "blocks if full" contract as dangerous when the
/// caller is the scheduler thread itself — this crate resolves that
/// ambiguity by never blocking; see `DESIGN.md`).
#[derive(Debug)]
pub struct Queue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> Queue<T> {
    /// Create a new queue bounded at `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Push a value onto the tail of the queue.
    pub fn push(&self, value: T) -> Result<(), QueueError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.len() >= self.capacity {
            return Err(QueueError::Full { max: self.capacity });
        }
        guard.push_back(value);
        Ok(())
    }

    /// Pop a value from the head of the queue, if any.
    pub fn pop(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.pop_front()
    }

    /// Number of elements currently queued. Loosely consistent: by the time
    /// the caller observes the result another thread may have mutated the
    /// queue (spec §4.1: "`size()` is loosely consistent").
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True if the queue currently holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured maximum capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> Queue<T> {
    /// Return a clone of the head element without removing it.
    pub fn peek(&self) -> Option<T> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.front().cloned()
    }
}

/// A queue intended for single-producer/single-consumer use.
///
/// The type only documents the contract; nothing prevents misuse, mirroring
/// the source's choice to make MPSC vs. SPSC a usage discipline rather than
/// a different runtime mechanism when both map onto the same safe
/// primitive.
#[derive(Debug)]
pub struct SpscQueue<T>(Queue<T>);

impl<T> SpscQueue<T> {
    /// Create a new bounded SPSC queue.
    pub fn new(capacity: usize) -> Self {
        Self(Queue::new(capacity))
    }

    /// Push a value (single producer).
    pub fn push(&self, value: T) -> Result<(), QueueError> {
        self.0.push(value)
    }

    /// Pop a value (single consumer).
    pub fn pop(&self) -> Option<T> {
        self.0.pop()
    }

    /// Number of queued elements.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A queue intended for multiple producers and a single consumer.
///
/// Safe to share behind an `Arc` and pushed to concurrently; the consumer is
/// expected to be the job scheduler's worker thread.
#[derive(Debug)]
pub struct MpscQueue<T>(Queue<T>);

impl<T> MpscQueue<T> {
    /// Create a new bounded MPSC queue.
    pub fn new(capacity: usize) -> Self {
        Self(Queue::new(capacity))
    }

    /// Push a value (any producer thread).
    pub fn push(&self, value: T) -> Result<(), QueueError> {
        self.0.push(value)
    }

    /// Pop a value (the single consumer).
    pub fn pop(&self) -> Option<T> {
        self.0.pop()
    }

    /// Number of queued elements.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
