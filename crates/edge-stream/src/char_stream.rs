//! Append-only character buffer with a read cursor and an optional
//! subscriber callback (spec §4.5).

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

/// Errors surfaced by [`CharStream`] mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// A push was attempted after `close()`.
    Closed,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Closed => write!(f, "push on a closed CharStream"),
        }
    }
}

impl std::error::Error for StreamError {}

/// Notified synchronously after every non-empty push and after `close()`.
///
/// Held as a [`Weak`] reference: the redesign note in spec §9 calls for
/// subscriptions that unregister themselves on drop rather than relying on
/// the subscriber's lifetime to outlive the stream by convention.
pub trait CharStreamSubscriber: Send + Sync {
    /// Called after the stream mutated. `stream` is the same instance the
    /// subscriber registered with.
    fn on_update(&self, stream: &CharStream);
}

struct Inner {
    buffer: String,
    cursor: usize,
    closed: bool,
}

/// An append-only character buffer produced by a stream executor on one
/// thread and consumed incrementally (via [`CharStream::pop`] and friends)
/// by a parser on another.
pub struct CharStream {
    inner: Mutex<Inner>,
    subscriber: Mutex<Option<Weak<dyn CharStreamSubscriber>>>,
}

impl CharStream {
    /// Create an empty, open stream with no subscriber.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                buffer: String::new(),
                cursor: 0,
                closed: false,
            }),
            subscriber: Mutex::new(None),
        })
    }

    /// Register (or replace) the subscriber. Only the weak reference is
    /// retained.
    pub fn set_subscriber(&self, subscriber: &Arc<dyn CharStreamSubscriber>) {
        *self.subscriber.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Arc::downgrade(subscriber));
    }

    /// Unregister any current subscriber.
    pub fn clear_subscriber(&self) {
        *self.subscriber.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Append `s` to the buffer. A no-op empty push does not invoke the
    /// subscriber (spec §8 boundary behaviour).
    pub fn push(&self, s: &str) -> Result<(), StreamError> {
        if s.is_empty() {
            return Ok(());
        }
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.closed {
                return Err(StreamError::Closed);
            }
            inner.buffer.push_str(s);
        }
        self.notify_subscriber();
        Ok(())
    }

    /// Append a single character.
    pub fn push_char(&self, c: char) -> Result<(), StreamError> {
        let mut buf = [0u8; 4];
        self.push(c.encode_utf8(&mut buf))
    }

    /// Finalise the stream. Idempotent: closing an already-closed stream is
    /// a no-op (including not re-notifying the subscriber).
    ///
    /// The subscriber is invoked *before* `closed` flips, so a callback that
    /// calls back into the stream still observes `closed() == false` during
    /// its own invocation.
    pub fn close(&self) {
        let already_closed = self.inner.lock().unwrap_or_else(|e| e.into_inner()).closed;
        if already_closed {
            return;
        }
        self.notify_subscriber();
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).closed = true;
    }

    fn notify_subscriber(&self) {
        let maybe_weak = self
            .subscriber
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(weak) = maybe_weak else { return };
        match weak.upgrade() {
            Some(strong) => strong.on_update(self),
            None => self.clear_subscriber(),
        }
    }

    /// Total bytes appended so far.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).buffer.len()
    }

    /// True if nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// True once `close()` has been called.
    pub fn closed(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    /// Current byte offset of the read cursor.
    pub fn cursor(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).cursor
    }

    /// Consume and return the next unread character, advancing the cursor.
    pub fn pop(&self) -> Option<char> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let c = inner.buffer[inner.cursor..].chars().next()?;
        inner.cursor += c.len_utf8();
        Some(c)
    }

    /// Return the next unread character without advancing the cursor.
    pub fn peek(&self) -> Option<char> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.buffer[inner.cursor..].chars().next()
    }

    /// Advance past whitespace and consume the next non-whitespace
    /// character.
    pub fn pop_next_non_ws(&self) -> Option<char> {
        loop {
            let c = self.peek()?;
            if c.is_whitespace() {
                self.pop();
            } else {
                return self.pop();
            }
        }
    }

    /// Advance past whitespace and return (without consuming) the next
    /// payload character.
    pub fn pop_ws_and_peek(&self) -> Option<char> {
        loop {
            let c = self.peek()?;
            if c.is_whitespace() {
                self.pop();
            } else {
                return Some(c);
            }
        }
    }

    /// Snapshot the buffer contents in `[start, end)` as an owned string.
    ///
    /// Materialised eagerly rather than borrowed, since the buffer lives
    /// behind a mutex (see DESIGN.md for this adaptation).
    pub fn get_stream_view(&self, start: usize, end: usize) -> String {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let end = end.min(inner.buffer.len());
        inner.buffer[start..end].to_string()
    }
}
