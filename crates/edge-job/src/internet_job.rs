//! `InternetJob<T>`: a job specialisation with an offline-first attempt and
//! a bounded-retry online phase (spec §4.3).

use crate::job::{JobBody, JobOutcome};
use edge_error::OrchestratorError;

/// Outcome of [`InternetJobBody::process_offline`].
pub enum OfflineOutcome<T> {
    /// Offline data was available; fulfil and retire.
    Complete(T),
    /// No offline data; fall through to the online phase.
    Retry,
}

/// Outcome of [`InternetJobBody::process_with_internet`].
pub enum InternetOutcome<T> {
    /// The online attempt succeeded.
    Complete(T),
    /// The online attempt failed; counts against the retry budget.
    Retry,
    /// An asynchronous download is still in flight; re-poll without
    /// touching the retry counter.
    Poll,
}

/// User logic for an [`InternetJob`]: one offline attempt, then a bounded
/// number of online attempts before parking until connectivity returns.
pub trait InternetJobBody: Send {
    /// Output type eventually produced.
    type Output: Clone + Send + Sync + 'static;

    /// Run once, before any online attempt.
    fn process_offline(&mut self) -> Result<OfflineOutcome<Self::Output>, OrchestratorError>;

    /// Run for every online attempt after the offline attempt declined.
    fn process_with_internet(
        &mut self,
    ) -> Result<InternetOutcome<Self::Output>, OrchestratorError>;
}

/// Wraps an [`InternetJobBody`] with the offline/online/retry-epoch state
/// machine described in spec §4.3, and implements [`JobBody`] so it can be
/// driven by a plain [`crate::job::Job`].
pub struct InternetJob<B: InternetJobBody> {
    body: B,
    offline_tried: bool,
    retry_count: u32,
    max_retries: u32,
}

impl<B: InternetJobBody> InternetJob<B> {
    /// Wrap `body`, resetting the retry counter to `max_retries` for the
    /// first epoch.
    pub fn new(body: B, max_retries: u32) -> Self {
        Self {
            body,
            offline_tried: false,
            retry_count: max_retries,
            max_retries,
        }
    }
}

impl<B: InternetJobBody> JobBody for InternetJob<B> {
    type Output = B::Output;

    fn process(&mut self) -> Result<JobOutcome<Self::Output>, OrchestratorError> {
        if !self.offline_tried {
            self.offline_tried = true;
            match self.body.process_offline()? {
                OfflineOutcome::Complete(v) => return Ok(JobOutcome::Complete(v)),
                OfflineOutcome::Retry => {}
            }
        }

        match self.body.process_with_internet()? {
            InternetOutcome::Complete(v) => Ok(JobOutcome::Complete(v)),
            InternetOutcome::Poll => Ok(JobOutcome::Retry),
            InternetOutcome::Retry => {
                self.retry_count -= 1;
                if self.retry_count == 0 {
                    self.retry_count = self.max_retries;
                    Ok(JobOutcome::RetryWhenOnline)
                } else {
                    Ok(JobOutcome::Retry)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobStatus};

    struct OfflineHit;
    impl InternetJobBody for OfflineHit {
        type Output = &'static str;
        fn process_offline(&mut self) -> Result<OfflineOutcome<&'static str>, OrchestratorError> {
            Ok(OfflineOutcome::Complete("from-disk"))
        }
        fn process_with_internet(
            &mut self,
        ) -> Result<InternetOutcome<&'static str>, OrchestratorError> {
            panic!("should not be reached when offline hits");
        }
    }

    #[test]
    fn offline_hit_completes_without_online_attempt() {
        let job = Job::new("dl", InternetJob::new(OfflineHit, 3));
        assert_eq!(job.run(), JobStatus::Complete);
        assert_eq!(job.future().produce_value().unwrap(), "from-disk");
    }

    struct AlwaysFailsOnline {
        polls_before_retry: u32,
    }
    impl InternetJobBody for AlwaysFailsOnline {
        type Output = ();
        fn process_offline(&mut self) -> Result<OfflineOutcome<()>, OrchestratorError> {
            Ok(OfflineOutcome::Retry)
        }
        fn process_with_internet(&mut self) -> Result<InternetOutcome<()>, OrchestratorError> {
            if self.polls_before_retry > 0 {
                self.polls_before_retry -= 1;
                Ok(InternetOutcome::Poll)
            } else {
                Ok(InternetOutcome::Retry)
            }
        }
    }

    #[test]
    fn retry_storm_exhausts_budget_then_parks() {
        let job = Job::new(
            "dl",
            InternetJob::new(AlwaysFailsOnline { polls_before_retry: 0 }, 2),
        );
        // retry 1/2
        assert_eq!(job.run(), JobStatus::Retry);
        // retry 2/2 -> exhausted -> park
        assert_eq!(job.run(), JobStatus::RetryWhenOnline);
    }

    #[test]
    fn poll_does_not_consume_retry_budget() {
        let job = Job::new(
            "dl",
            InternetJob::new(AlwaysFailsOnline { polls_before_retry: 5 }, 1),
        );
        for _ in 0..5 {
            assert_eq!(job.run(), JobStatus::Retry);
        }
        // budget of 1 still untouched by polls; first real retry exhausts it
        assert_eq!(job.run(), JobStatus::RetryWhenOnline);
    }

    struct CompletesOnSecondOnlineAttempt {
        attempt: u32,
    }
    impl InternetJobBody for CompletesOnSecondOnlineAttempt {
        type Output = i32;
        fn process_offline(&mut self) -> Result<OfflineOutcome<i32>, OrchestratorError> {
            Ok(OfflineOutcome::Retry)
        }
        fn process_with_internet(&mut self) -> Result<InternetOutcome<i32>, OrchestratorError> {
            self.attempt += 1;
            if self.attempt >= 2 {
                Ok(InternetOutcome::Complete(7))
            } else {
                Ok(InternetOutcome::Retry)
            }
        }
    }

    #[test]
    fn completes_mid_retry_budget() {
        let job = Job::new(
            "dl",
            InternetJob::new(CompletesOnSecondOnlineAttempt { attempt: 0 }, 3),
        );
        assert_eq!(job.run(), JobStatus::Retry);
        assert_eq!(job.run(), JobStatus::Complete);
        assert_eq!(job.future().produce_value().unwrap(), 7);
    }
}
