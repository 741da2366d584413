// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::sync::SyncResult;

/// Identity of a job, used for deduplication
///
/// For subscription jobs this is the feed URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of work for the queue: one channel sync
pub struct Job {
    id: JobId,
    work: BoxFuture<'static, Result<SyncResult, SyncError>>,
}

impl Job {
    pub fn new<F>(id: JobId, work: F) -> Self
    where
        F: Future<Output = Result<SyncResult, SyncError>> + Send + 'static,
    {
        Self {
            id,
            work: Box::pin(work),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Totals over the lifetime of a queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSummary {
    /// Jobs that returned a result
    pub completed: usize,
    /// Jobs that returned an error or panicked
    pub failed: usize,
    /// Jobs rejected because their identity was already queued or running
    pub deduplicated: usize,
    /// Jobs still pending when the queue was cancelled
    pub abandoned: usize,
}

/// Bounded job queue with LIFO dequeue
///
/// At most `max_active_jobs` jobs run at once. Pending jobs are started on
/// each scheduling tick, most recently enqueued first.
pub struct JobQueue {
    max_active_jobs: usize,
    tick: Duration,
    pending: Vec<Job>,
    running: JoinSet<Result<SyncResult, SyncError>>,
    active: HashMap<task::Id, JobId>,
    reporter: SharedProgressReporter,
    summary: QueueSummary,
}

impl JobQueue {
    pub fn new(max_active_jobs: usize, tick: Duration, reporter: SharedProgressReporter) -> Self {
        Self {
            max_active_jobs: max_active_jobs.max(1),
            tick: tick.max(Duration::from_millis(1)),
            pending: Vec::new(),
            running: JoinSet::new(),
            active: HashMap::new(),
            reporter,
            summary: QueueSummary::default(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Identities of the jobs currently running
    pub fn active_ids(&self) -> impl Iterator<Item = &JobId> {
        self.active.values()
    }

    /// Add a job unless one with the same identity is pending or active
    ///
    /// Returns whether the job was queued.
    pub fn enqueue(&mut self, job: Job) -> bool {
        let known = self.pending.iter().any(|pending| pending.id == job.id)
            || self.active.values().any(|id| *id == job.id);

        if known {
            debug!(job = %job.id, "Job already queued or running, dropping duplicate");
            self.summary.deduplicated += 1;
            return false;
        }

        debug!(job = %job.id, pending = self.pending.len() + 1, "Job queued");
        self.pending.push(job);
        true
    }

    /// Start pending jobs until every slot is taken
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&mut self) {
        while self.active.len() < self.max_active_jobs {
            let Some(job) = self.pending.pop() else {
                break;
            };

            info!(job = %job.id, active = self.active.len() + 1, "Starting job");
            self.reporter.report(ProgressEvent::JobStarted {
                id: job.id.to_string(),
            });

            let handle = self.running.spawn(job.work);
            self.active.insert(handle.id(), job.id);
        }
    }

    fn finish(&mut self, joined: Result<(task::Id, Result<SyncResult, SyncError>), JoinError>) {
        let (task_id, succeeded) = match joined {
            Ok((task_id, Ok(result))) => {
                self.summary.completed += 1;
                debug!(
                    downloaded = result.downloaded,
                    failed = result.failed,
                    "Job returned"
                );
                (task_id, true)
            }
            Ok((task_id, Err(e))) => {
                self.summary.failed += 1;
                warn!(job = ?self.active.get(&task_id).map(JobId::as_str), error = %e, "Job failed");
                (task_id, false)
            }
            Err(e) => {
                self.summary.failed += 1;
                warn!(job = ?self.active.get(&e.id()).map(JobId::as_str), error = %e, "Job aborted");
                (e.id(), false)
            }
        };

        if let Some(id) = self.active.remove(&task_id) {
            self.reporter.report(ProgressEvent::JobFinished {
                id: id.to_string(),
                succeeded,
            });
        }
    }

    /// Drive the queue until the job channel closes and all work is done,
    /// or until `cancel` fires
    ///
    /// After cancellation no further jobs are started; the call still waits
    /// for every active job to settle before returning.
    pub async fn run(
        mut self,
        mut jobs: mpsc::Receiver<Job>,
        cancel: CancellationToken,
    ) -> QueueSummary {
        let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut receiving = true;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(active = self.active.len(), pending = self.pending.len(), "Queue cancelled");
                    break;
                }

                job = jobs.recv(), if receiving => match job {
                    Some(job) => {
                        self.enqueue(job);
                    }
                    None => receiving = false,
                },

                Some(joined) = self.running.join_next_with_id(), if !self.running.is_empty() => {
                    self.finish(joined);
                }

                _ = ticker.tick() => self.schedule(),
            }

            if !receiving && self.pending.is_empty() && self.running.is_empty() {
                debug!("Queue drained");
                break;
            }
        }

        self.summary.abandoned = self.pending.len();
        self.pending.clear();

        while let Some(joined) = self.running.join_next_with_id().await {
            self.finish(joined);
        }

        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::progress::NoopReporter;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue(max_active_jobs: usize) -> JobQueue {
        JobQueue::new(max_active_jobs, Duration::from_millis(10), NoopReporter::shared())
    }

    fn idle_job(id: &str) -> Job {
        Job::new(JobId::new(id), futures::future::pending())
    }

    fn ids(queue: &JobQueue) -> BTreeSet<String> {
        queue.active_ids().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn enqueue_drops_duplicate_pending_job() {
        let mut queue = queue(5);

        assert!(queue.enqueue(idle_job("https://example.com/feed")));
        assert!(!queue.enqueue(idle_job("https://example.com/feed")));
        assert!(queue.enqueue(idle_job("https://example.com/other")));

        assert_eq!(queue.pending_len(), 2);
    }

    #[tokio::test]
    async fn enqueue_drops_duplicate_active_job() {
        let mut queue = queue(5);
        queue.enqueue(idle_job("https://example.com/feed"));
        queue.schedule();

        assert!(!queue.enqueue(idle_job("https://example.com/feed")));
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.active_len(), 1);
    }

    #[tokio::test]
    async fn schedule_starts_most_recent_jobs_first() {
        let mut queue = queue(5);
        for n in 1..=8 {
            queue.enqueue(idle_job(&format!("job-{n}")));
        }

        queue.schedule();

        let expected: BTreeSet<String> = (4..=8).map(|n| format!("job-{n}")).collect();
        assert_eq!(ids(&queue), expected);
        assert_eq!(queue.pending_len(), 3);
    }

    #[tokio::test]
    async fn run_never_exceeds_active_limit() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(16);

        for n in 0..8 {
            let current = current.clone();
            let peak = peak.clone();
            let job = Job::new(JobId::new(format!("feed-{n}")), async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(SyncResult::default())
            });
            tx.send(job).await.unwrap();
        }
        drop(tx);

        let summary = queue(5).run(rx, CancellationToken::new()).await;

        assert_eq!(summary.completed, 8);
        assert_eq!(peak.load(Ordering::SeqCst), 5);
        assert_eq!(current.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_job_frees_its_slot() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Job::new(JobId::new("broken"), async {
            Err(SyncError::CreateDirectoryFailed {
                path: "/nowhere".into(),
                source: std::io::Error::other("boom"),
            })
        }))
        .await
        .unwrap();
        tx.send(Job::new(JobId::new("fine"), async { Ok(SyncResult::default()) }))
            .await
            .unwrap();
        drop(tx);

        let summary = queue(1).run(rx, CancellationToken::new()).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 1);
    }

    #[tokio::test]
    async fn cancel_waits_for_active_jobs() {
        let cancel = CancellationToken::new();
        let settled = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(4);

        for id in ["first", "second"] {
            let cancel = cancel.clone();
            let settled = settled.clone();
            tx.send(Job::new(JobId::new(id), async move {
                cancel.cancelled().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                settled.fetch_add(1, Ordering::SeqCst);
                Ok(SyncResult {
                    cancelled: true,
                    ..Default::default()
                })
            }))
            .await
            .unwrap();
        }

        let running = tokio::spawn(queue(1).run(rx, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let summary = running.await.unwrap();

        assert_eq!(settled.load(Ordering::SeqCst), 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.abandoned, 1);
        drop(tx);
    }
}
