//! `JobScheduler` (spec §4.4): a single cooperative consumer draining a
//! priority queue, a normal queue, and a waiting-for-internet list.

use crate::job::{BaseJob, JobStatus};
use edge_queue::MpscQueue;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Default bound on each ready queue. Generous enough that `add_job` never
/// observes `Full` in normal operation; a full queue is treated as a hard
/// error rather than a block, resolving the ambiguity flagged in spec §9
/// ("blocks if the queue is full" would deadlock a caller running on the
/// scheduler thread itself).
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Error returned when a queue is saturated at admission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerFullError {
    /// Which queue rejected the job.
    pub queue: &'static str,
}

impl std::fmt::Display for SchedulerFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} queue is at capacity", self.queue)
    }
}

impl std::error::Error for SchedulerFullError {}

/// Single-consumer cooperative job scheduler.
pub struct JobScheduler {
    priority_ready: MpscQueue<Arc<dyn BaseJob>>,
    normal_ready: MpscQueue<Arc<dyn BaseJob>>,
    waiting_for_internet: Mutex<Vec<Arc<dyn BaseJob>>>,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl JobScheduler {
    /// Create a scheduler whose ready queues are each bounded at `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            priority_ready: MpscQueue::new(capacity),
            normal_ready: MpscQueue::new(capacity),
            waiting_for_internet: Mutex::new(Vec::new()),
        }
    }

    /// Admit a job to the normal queue.
    pub fn add_job(&self, job: Arc<dyn BaseJob>) -> Result<(), SchedulerFullError> {
        self.normal_ready
            .push(job)
            .map_err(|_| SchedulerFullError { queue: "normal" })
    }

    /// Admit a job to the priority queue, drained ahead of normal jobs on
    /// every `do_jobs()` pass.
    pub fn add_priority_job(&self, job: Arc<dyn BaseJob>) -> Result<(), SchedulerFullError> {
        self.priority_ready
            .push(job)
            .map_err(|_| SchedulerFullError { queue: "priority" })
    }

    /// Re-admit every job parked in `waiting_for_internet` onto the normal
    /// queue in one batch. Jobs not yet re-admitted by the time this
    /// returns are not re-attempted again until the next call.
    pub fn notify_online(&self) {
        let mut waiting = self
            .waiting_for_internet
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for job in waiting.drain(..) {
            // Queue is sized generously; a saturated queue here would mean
            // the scheduler is badly backed up. Drop the job back into the
            // waiting list rather than lose it silently.
            if self.normal_ready.push(job.clone()).is_err() {
                trace!(job = job.name(), "normal queue full during notify_online, re-parking");
                self.requeue_waiting(job);
            }
        }
    }

    fn requeue_waiting(&self, job: Arc<dyn BaseJob>) {
        self.waiting_for_internet
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job);
    }

    fn dispatch(&self, job: Arc<dyn BaseJob>) -> JobStatus {
        if !job.children_complete() {
            return JobStatus::Retry;
        }
        job.run()
    }

    /// Drain the priority queue to empty: every popped job is run; a
    /// `Retry` result is pushed back onto the tail of the same queue, so a
    /// job that keeps retrying spins here until it either completes or
    /// transitions to `RetryWhenOnline`.
    fn drain_priority(&self) {
        while let Some(job) = self.priority_ready.pop() {
            match self.dispatch(job.clone()) {
                JobStatus::Complete => {}
                JobStatus::Retry => {
                    let _ = self.priority_ready.push(job);
                }
                JobStatus::RetryWhenOnline => self.requeue_waiting(job),
            }
        }
    }

    /// One pass over the normal queue: snapshot everything currently
    /// queued, then run each exactly once. Returns true if any job
    /// attempted this pass returned `Retry` (used by
    /// `do_all_non_priority_jobs`).
    fn one_normal_pass(&self) -> bool {
        let mut attempted = Vec::new();
        while let Some(job) = self.normal_ready.pop() {
            attempted.push(job);
        }
        let mut any_retry = false;
        for job in attempted {
            match self.dispatch(job.clone()) {
                JobStatus::Complete => {}
                JobStatus::Retry => {
                    any_retry = true;
                    let _ = self.normal_ready.push(job);
                }
                JobStatus::RetryWhenOnline => self.requeue_waiting(job),
            }
        }
        any_retry
    }

    /// One cooperative scheduler tick: drain priority to empty, then make
    /// exactly one attempt at every normal job queued at the start of the
    /// call.
    pub fn do_jobs(&self) {
        self.drain_priority();
        self.one_normal_pass();
    }

    /// Repeatedly drain the normal queue until it is empty and the last
    /// pass produced no `Retry` — used at startup to bring the initial job
    /// graph as far forward as it can go synchronously.
    pub fn do_all_non_priority_jobs(&self) {
        self.drain_priority();
        loop {
            let any_retry = self.one_normal_pass();
            if !any_retry && self.normal_ready.is_empty() {
                break;
            }
        }
    }

    /// Number of jobs currently parked waiting for connectivity.
    pub fn waiting_for_internet_count(&self) -> usize {
        self.waiting_for_internet
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
