//! `Job<B>` / `BaseJob`: a unit of cooperative work with a typed result
//! promise and parent→child dependency links (spec §4.3).

use edge_error::OrchestratorError;
use edge_future::{Future, Promise, channel};
use std::sync::{Arc, Mutex};

/// Tri-state outcome a scheduler dispatch sees after attempting a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// The job's promise was fulfilled (with a value or an error); retire
    /// it.
    Complete,
    /// Re-admit to the same queue on the next scheduler pass.
    Retry,
    /// Park in the waiting-for-internet list until `notify_online()`.
    RetryWhenOnline,
}

/// What a [`JobBody::process`] call decided, before the scheduler's error
/// handling is applied.
pub enum JobOutcome<T> {
    /// Fulfil the promise with this value and retire the job.
    Complete(T),
    /// Re-admit to the same queue on the next pass.
    Retry,
    /// Park until the next `notify_online()`.
    RetryWhenOnline,
}

/// User-supplied job logic. Implementors provide `process`; [`Job<B>`]
/// supplies the promise, child-dependency bookkeeping, and the
/// `BaseJob` vtable the scheduler dispatches through.
pub trait JobBody: Send {
    /// The type eventually produced by this job's `Future`.
    type Output: Clone + Send + Sync + 'static;

    /// Run one attempt. Errors become the promise's stored error and the
    /// job is treated as `COMPLETE` (spec §4.3 / §4.4 failure model).
    fn process(&mut self) -> Result<JobOutcome<Self::Output>, OrchestratorError>;
}

/// Type-erased handle the scheduler holds regardless of a job's `Output`
/// type.
pub trait BaseJob: Send + Sync {
    /// Diagnostic name, e.g. `"AssetDownloadJob[m:1]"`.
    fn name(&self) -> &str;

    /// True once every child job has reached [`JobStatus::Complete`].
    fn children_complete(&self) -> bool;

    /// True once this job's own promise has been fulfilled (value or
    /// error). Used by a *parent* job to decide `children_complete()`.
    fn is_complete(&self) -> bool;

    /// Attempt the job. The scheduler calls this only when
    /// `children_complete()` is true; a dispatcher that skips the check is
    /// responsible for treating a skipped attempt as `Retry` itself (see
    /// [`crate::scheduler`]).
    fn run(&self) -> JobStatus;
}

/// A job wrapping user logic `B`, a child-dependency list, and a
/// [`Promise`]/[`Future`] pair for `B::Output`.
pub struct Job<B: JobBody> {
    name: String,
    children: Mutex<Vec<Arc<dyn BaseJob>>>,
    body: Mutex<B>,
    promise: Mutex<Option<Promise<B::Output>>>,
    future: Future<B::Output>,
}

impl<B: JobBody> Job<B> {
    /// Construct a new job. Use [`Job::add_child_job`] afterwards to record
    /// dependencies before handing the job to the scheduler.
    pub fn new(name: impl Into<String>, body: B) -> Arc<Self> {
        let (promise, future) = channel();
        Arc::new(Self {
            name: name.into(),
            children: Mutex::new(Vec::new()),
            body: Mutex::new(body),
            promise: Mutex::new(Some(promise)),
            future,
        })
    }

    /// Record a child dependency. The scheduler will not run `process()`
    /// until every recorded child has reached `COMPLETE`.
    pub fn add_child_job(&self, child: Arc<dyn BaseJob>) {
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(child);
    }

    /// Obtain a share-able handle to this job's eventual result. May be
    /// called any number of times, before or after completion.
    pub fn future(&self) -> Future<B::Output> {
        self.future.clone()
    }

    fn restore_promise(&self, promise: Promise<B::Output>) {
        *self.promise.lock().unwrap_or_else(|e| e.into_inner()) = Some(promise);
    }
}

impl<B: JobBody> BaseJob for Job<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn children_complete(&self) -> bool {
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .all(|c| c.is_complete())
    }

    fn is_complete(&self) -> bool {
        self.future.is_ready()
    }

    fn run(&self) -> JobStatus {
        let outcome = self
            .body
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .process();
        let Some(promise) = self
            .promise
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            // Already retired; a well-behaved scheduler never calls run()
            // again after Complete, but guard against misuse defensively.
            return JobStatus::Complete;
        };
        match outcome {
            Ok(JobOutcome::Complete(value)) => {
                promise.fulfill(value);
                JobStatus::Complete
            }
            Ok(JobOutcome::Retry) => {
                self.restore_promise(promise);
                JobStatus::Retry
            }
            Ok(JobOutcome::RetryWhenOnline) => {
                self.restore_promise(promise);
                JobStatus::RetryWhenOnline
            }
            Err(err) => {
                promise.fail(err);
                JobStatus::Complete
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_error::ErrorCode;

    struct Immediate(i32);
    impl JobBody for Immediate {
        type Output = i32;
        fn process(&mut self) -> Result<JobOutcome<i32>, OrchestratorError> {
            Ok(JobOutcome::Complete(self.0))
        }
    }

    struct RetriesThenCompletes {
        attempts_left: u32,
    }
    impl JobBody for RetriesThenCompletes {
        type Output = &'static str;
        fn process(&mut self) -> Result<JobOutcome<&'static str>, OrchestratorError> {
            if self.attempts_left == 0 {
                Ok(JobOutcome::Complete("done"))
            } else {
                self.attempts_left -= 1;
                Ok(JobOutcome::Retry)
            }
        }
    }

    struct AlwaysErrors;
    impl JobBody for AlwaysErrors {
        type Output = ();
        fn process(&mut self) -> Result<JobOutcome<()>, OrchestratorError> {
            Err(OrchestratorError::new(ErrorCode::ScriptError, "boom"))
        }
    }

    #[test]
    fn immediate_completion_fulfils_future() {
        let job = Job::new("imm", Immediate(5));
        assert_eq!(job.run(), JobStatus::Complete);
        assert_eq!(job.future().produce_value().unwrap(), 5);
    }

    #[test]
    fn retry_then_complete() {
        let job = Job::new("retry", RetriesThenCompletes { attempts_left: 2 });
        assert_eq!(job.run(), JobStatus::Retry);
        assert_eq!(job.run(), JobStatus::Retry);
        assert_eq!(job.run(), JobStatus::Complete);
        assert_eq!(job.future().produce_value().unwrap(), "done");
    }

    #[test]
    fn error_becomes_complete_with_stored_error() {
        let job = Job::new("err", AlwaysErrors);
        assert_eq!(job.run(), JobStatus::Complete);
        let err = job.future().produce_value().unwrap_err();
        assert_eq!(err.code, ErrorCode::ScriptError);
    }

    #[test]
    fn children_complete_true_with_no_children() {
        let job = Job::new("leaf", Immediate(1));
        assert!(job.children_complete());
    }

    #[test]
    fn children_complete_false_until_child_runs() {
        let parent = Job::new("parent", Immediate(1));
        let child = Job::new("child", Immediate(2));
        parent.add_child_job(child.clone() as Arc<dyn BaseJob>);
        assert!(!parent.children_complete());
        child.run();
        assert!(parent.children_complete());
    }
}
