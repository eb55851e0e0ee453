//! `Task`: owns a parsed script, its module table, and the concurrency
//! discipline a script frame runs under (spec §4.7).
//!
//! The interpreter itself is out of scope (spec §1) — `Task<M>` is generic
//! over whatever opaque, `Clone`-able module representation a
//! [`edge_assets::ScriptLoader`] produces. This crate only supplies the
//! surrounding machinery: `task_lock` exclusivity, the weak-referenced
//! pending-future bookkeeping behind `is_ready()`, and the cooperative pump
//! a script frame runs while blocked on a stream.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use edge_future::Future;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;
use tracing::trace;

/// How long the pump waits on its condition variable between unprompted
/// re-checks of the predicate, bounding the cost of a missed `notify`.
const PUMP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A script-visible handle wrapping an in-flight asset load. `Task` holds
/// only weak references to these so a dropped handle (the script no longer
/// reachable, e.g. after a reload) does not keep `is_ready()` from ever
/// becoming true.
pub trait PendingFuture: Send + Sync {
    /// True once the underlying value (or error) has been produced.
    fn is_ready(&self) -> bool;
}

impl<T: Clone + Send + Sync + 'static> PendingFuture for Future<T> {
    fn is_ready(&self) -> bool {
        Future::is_ready(self)
    }
}

/// A background job that copies bytes from a producer-side queue into a
/// bound `CharStream`, firing its subscriber. Registered with a `Task` so
/// the pump can drain them while a script frame waits (spec §4.7 step 3).
pub trait StreamPushJob: Send + Sync {
    /// Diagnostic name.
    fn name(&self) -> &str;

    /// Copy whatever is currently available. Returns `true` if it made
    /// progress (pushed at least one character or observed close).
    fn pump(&self) -> bool;
}

/// Owns a parsed script (`root`), a name-keyed module table for imports, the
/// `task_lock` discipline serialising calls into the interpreter, and the
/// bookkeeping behind the background pump (spec §4.7).
pub struct Task<M: Clone + Send + Sync + 'static> {
    name: String,
    root: M,
    modules: Mutex<HashMap<String, M>>,
    task_lock: Mutex<()>,
    pending: Mutex<Vec<Weak<dyn PendingFuture>>>,
    stream_push_jobs: Mutex<Vec<Arc<dyn StreamPushJob>>>,
    stream_push_lock: Mutex<()>,
    stream_push_signal: Condvar,
}

impl<M: Clone + Send + Sync + 'static> Task<M> {
    /// Construct a task around its root module.
    pub fn new(name: impl Into<String>, root: M) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            root,
            modules: Mutex::new(HashMap::new()),
            task_lock: Mutex::new(()),
            pending: Mutex::new(Vec::new()),
            stream_push_jobs: Mutex::new(Vec::new()),
            stream_push_lock: Mutex::new(()),
            stream_push_signal: Condvar::new(),
        })
    }

    /// Diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The root module.
    pub fn root_module(&self) -> M {
        self.root.clone()
    }

    /// Register an importable module under `name`.
    pub fn register_module(&self, name: impl Into<String>, module: M) {
        self.modules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), module);
    }

    /// Look up a previously registered module.
    pub fn module(&self, name: &str) -> Option<M> {
        self.modules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Run `f` with `task_lock` held in exclusive mode for the duration of
    /// one script call (spec §4.7: "a single script call takes `task_lock`
    /// in exclusive mode for the duration of the call").
    pub fn with_exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.task_lock.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }

    /// Record a weak reference to a future the script's global scope just
    /// spawned (a model/LLM/document load). Dead references are pruned
    /// lazily by `is_ready()`.
    pub fn track_pending(&self, future: Arc<dyn PendingFuture>) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(&future));
    }

    /// True once every pending future that is still alive has been
    /// fulfilled (spec §4.7).
    pub fn is_ready(&self) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|weak| weak.strong_count() > 0);
        pending.iter().all(|weak| {
            weak.upgrade()
                .map(|f| f.is_ready())
                .unwrap_or(true)
        })
    }

    /// Register a stream-push job the pump should drain on every
    /// iteration.
    pub fn register_stream_push_job(&self, job: Arc<dyn StreamPushJob>) {
        self.stream_push_jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job);
    }

    /// Wake the pump immediately rather than waiting out
    /// [`PUMP_POLL_INTERVAL`]. Producer threads call this after pushing to a
    /// bound `CharStream`.
    pub fn notify_stream_push(&self) {
        self.stream_push_signal.notify_all();
    }

    /// Run the cooperative pump until `predicate` holds (spec §4.7 step 3).
    ///
    /// The caller must have already dropped `task_lock` — asserted in debug
    /// builds via a non-blocking `try_lock` (a held lock fails `try_lock`
    /// regardless of which thread holds it, which is exactly the check we
    /// want: "nobody, including me, still holds this").
    pub fn run_background_jobs_until_condition(&self, predicate: impl Fn() -> bool) {
        debug_assert!(
            self.task_lock.try_lock().is_ok(),
            "task_lock must be released before pumping"
        );
        let mut guard = self
            .stream_push_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        loop {
            let jobs = self
                .stream_push_jobs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            for job in &jobs {
                if job.pump() {
                    trace!(job = job.name(), "stream push job advanced");
                }
            }
            if predicate() {
                return;
            }
            let (next, _timed_out) = self
                .stream_push_signal
                .wait_timeout(guard, PUMP_POLL_INTERVAL)
                .unwrap_or_else(|e| e.into_inner());
            guard = next;
        }
    }
}
