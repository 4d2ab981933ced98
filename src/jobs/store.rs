use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::api::health::HealthState;
use crate::error::Result;
use crate::types::{JobKey, ReportRow};

/// Lifecycle of one report computation. A key with no entry is `Absent`.
#[derive(Debug, Clone)]
enum JobState {
    Computing,
    Ready {
        rows: Vec<ReportRow>,
        expires_at: Instant,
    },
    Failed {
        reason: String,
        expires_at: Instant,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// A fresh computation was started in the background.
    Accepted,
    /// A computation is running or an unconsumed result is waiting.
    AlreadyQueued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPoll {
    Ready(Vec<ReportRow>),
    NotReady,
}

/// Non-consuming view of a job, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Absent,
    Computing,
    Ready { rows: usize },
    Failed { reason: String },
}

/// Background report jobs keyed by (account, tax year).
///
/// Results are handed out at most once: a successful `consume` removes the
/// entry. Ready results and failures expire after `ttl`.
pub struct JobStore {
    jobs: DashMap<JobKey, JobState>,
    ttl: Duration,
    health: Arc<HealthState>,
}

impl JobStore {
    pub fn new(ttl: Duration, health: Arc<HealthState>) -> Arc<Self> {
        Arc::new(Self {
            jobs: DashMap::new(),
            ttl,
            health,
        })
    }

    /// Start `compute` in a detached task unless the key is already computing
    /// or holds an unexpired result. Never waits for the computation.
    pub fn enqueue<F>(self: &Arc<Self>, key: JobKey, compute: F) -> EnqueueOutcome
    where
        F: Future<Output = Result<Vec<ReportRow>>> + Send + 'static,
    {
        let now = Instant::now();
        match self.jobs.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let busy = match entry.get() {
                    JobState::Computing => true,
                    JobState::Ready { expires_at, .. } => *expires_at > now,
                    JobState::Failed { .. } => false,
                };
                if busy {
                    debug!(%key, "[JOBS] already queued");
                    return EnqueueOutcome::AlreadyQueued;
                }
                entry.insert(JobState::Computing);
            }
            Entry::Vacant(entry) => {
                entry.insert(JobState::Computing);
            }
        }

        self.health.job_started();
        info!(%key, "[JOBS] computing");

        let store = Arc::clone(self);
        tokio::spawn(async move {
            // Run the compute in its own task so a panic still settles the job.
            let outcome = match tokio::spawn(compute).await {
                Ok(Ok(rows)) => Ok(rows),
                Ok(Err(e)) => Err(e.to_string()),
                Err(join) => Err(format!("compute task aborted: {join}")),
            };
            store.settle(key, outcome);
        });

        EnqueueOutcome::Accepted
    }

    fn settle(&self, key: JobKey, outcome: std::result::Result<Vec<ReportRow>, String>) {
        let expires_at = Instant::now() + self.ttl;
        let state = match outcome {
            Ok(rows) => {
                info!(%key, rows = rows.len(), "[JOBS] ready");
                self.health.job_finished(true);
                JobState::Ready { rows, expires_at }
            }
            Err(reason) => {
                error!(%key, "[JOBS] compute failed: {reason}");
                self.health.job_finished(false);
                JobState::Failed { reason, expires_at }
            }
        };
        self.jobs.insert(key, state);
    }

    /// Hand out a ready result once. Anything else reads as not ready.
    pub fn consume(&self, key: &JobKey) -> JobPoll {
        let now = Instant::now();
        let taken = self.jobs.remove_if(key, |_, state| {
            matches!(state, JobState::Ready { expires_at, .. } if *expires_at > now)
        });
        if let Some((_, JobState::Ready { rows, .. })) = taken {
            debug!(%key, "[JOBS] consumed");
            return JobPoll::Ready(rows);
        }

        // A result that outlived its TTL is gone for good.
        self.jobs.remove_if(key, |_, state| {
            matches!(state, JobState::Ready { expires_at, .. } if *expires_at <= now)
        });
        JobPoll::NotReady
    }

    pub fn status(&self, key: &JobKey) -> JobStatus {
        let now = Instant::now();
        match self.jobs.get(key).as_deref() {
            None => JobStatus::Absent,
            Some(JobState::Computing) => JobStatus::Computing,
            Some(JobState::Ready { rows, expires_at }) if *expires_at > now => {
                JobStatus::Ready { rows: rows.len() }
            }
            Some(JobState::Ready { .. }) => JobStatus::Absent,
            Some(JobState::Failed { reason, .. }) => JobStatus::Failed {
                reason: reason.clone(),
            },
        }
    }

    /// Drop expired results and failures. Running jobs are never touched.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.jobs.len();
        self.jobs.retain(|_, state| match state {
            JobState::Computing => true,
            JobState::Ready { expires_at, .. } | JobState::Failed { expires_at, .. } => {
                *expires_at > now
            }
        });
        before.saturating_sub(self.jobs.len())
    }

    pub async fn run_sweeper(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // consume immediate first tick

        loop {
            interval.tick().await;
            let removed = self.purge_expired();
            if removed > 0 {
                debug!(removed, remaining = self.jobs.len(), "[JOBS] swept expired jobs");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rust_decimal::Decimal;
    use tokio::sync::oneshot;

    use crate::error::AppError;

    fn key() -> JobKey {
        JobKey {
            account: "acc".to_string(),
            year: 2020,
        }
    }

    fn rows() -> Vec<ReportRow> {
        vec![ReportRow {
            date: "2020-04-10".to_string(),
            earnings_fiat: Decimal::from(20),
            tokens_earned: Decimal::from(8),
            price_that_day: Decimal::new(25, 1),
        }]
    }

    fn store(ttl: Duration) -> Arc<JobStore> {
        JobStore::new(ttl, Arc::new(HealthState::new()))
    }

    async fn wait_settled(store: &JobStore, key: &JobKey) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.status(key) == JobStatus::Computing {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not settle");
    }

    #[tokio::test]
    async fn result_is_delivered_exactly_once() {
        let jobs = store(Duration::from_secs(60));
        let (release, gate) = oneshot::channel::<()>();

        let outcome = jobs.enqueue(key(), async move {
            let _ = gate.await;
            Ok(rows())
        });
        assert_eq!(outcome, EnqueueOutcome::Accepted);
        assert_eq!(jobs.consume(&key()), JobPoll::NotReady);

        release.send(()).unwrap();
        wait_settled(&jobs, &key()).await;

        assert_eq!(jobs.consume(&key()), JobPoll::Ready(rows()));
        assert_eq!(jobs.consume(&key()), JobPoll::NotReady);
        assert_eq!(jobs.status(&key()), JobStatus::Absent);
    }

    #[tokio::test]
    async fn duplicate_enqueue_does_not_recompute() {
        let jobs = store(Duration::from_secs(60));
        let runs = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();

        let counter = Arc::clone(&runs);
        jobs.enqueue(key(), async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = gate.await;
            Ok(rows())
        });
        let counter = Arc::clone(&runs);
        let second = jobs.enqueue(key(), async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(rows())
        });
        assert_eq!(second, EnqueueOutcome::AlreadyQueued);

        release.send(()).unwrap();
        wait_settled(&jobs, &key()).await;

        // Unconsumed result also blocks recomputation.
        let counter = Arc::clone(&runs);
        let third = jobs.enqueue(key(), async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(rows())
        });
        assert_eq!(third, EnqueueOutcome::AlreadyQueued);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_compute_is_never_ready_and_can_be_retried() {
        let jobs = store(Duration::from_secs(60));
        jobs.enqueue(key(), async { Err(AppError::Decode("bad page".to_string())) });
        wait_settled(&jobs, &key()).await;

        assert!(matches!(jobs.status(&key()), JobStatus::Failed { .. }));
        assert_eq!(jobs.consume(&key()), JobPoll::NotReady);
        assert_eq!(jobs.consume(&key()), JobPoll::NotReady);

        let retry = jobs.enqueue(key(), async { Ok(rows()) });
        assert_eq!(retry, EnqueueOutcome::Accepted);
        wait_settled(&jobs, &key()).await;
        assert_eq!(jobs.consume(&key()), JobPoll::Ready(rows()));
    }

    #[tokio::test]
    async fn panicking_compute_settles_as_failed() {
        let jobs = store(Duration::from_secs(60));
        jobs.enqueue(key(), async {
            if key().year == 2020 {
                panic!("boom");
            }
            Ok(rows())
        });
        wait_settled(&jobs, &key()).await;
        assert!(matches!(jobs.status(&key()), JobStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn expired_result_reads_as_not_ready() {
        let jobs = store(Duration::ZERO);
        jobs.enqueue(key(), async { Ok(rows()) });
        wait_settled(&jobs, &key()).await;

        assert_eq!(jobs.consume(&key()), JobPoll::NotReady);
        assert_eq!(jobs.status(&key()), JobStatus::Absent);
        assert_eq!(jobs.enqueue(key(), async { Ok(rows()) }), EnqueueOutcome::Accepted);
    }

    #[tokio::test]
    async fn purge_keeps_running_jobs() {
        let jobs = store(Duration::ZERO);
        let (_release, gate) = oneshot::channel::<()>();
        jobs.enqueue(key(), async move {
            let _ = gate.await;
            Ok(rows())
        });
        let other = JobKey {
            account: "other".to_string(),
            year: 2021,
        };
        jobs.enqueue(other.clone(), async { Ok(rows()) });
        wait_settled(&jobs, &other).await;

        assert_eq!(jobs.purge_expired(), 1);
        assert_eq!(jobs.status(&key()), JobStatus::Computing);
    }
}
