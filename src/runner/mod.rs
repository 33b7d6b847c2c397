/*
 * Copyright 2024 ArpNetworking
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Collection runs and their wall-clock trigger
//!
//! Every tick fires all collection jobs as independent tasks. Nothing waits
//! on them: each task reports its own outcome and a failure in one never
//! touches the others.

use crate::aggregation::Aggregator;
use crate::model::CollectionJob;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Fires every collection job on demand
pub struct CollectionRunner {
    aggregator: Arc<Aggregator>,
    in_flight: Option<Arc<DashSet<CollectionJob>>>,
}

/// Marks a job as running until dropped
struct InFlight {
    jobs: Arc<DashSet<CollectionJob>>,
    job: CollectionJob,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.jobs.remove(&self.job);
    }
}

impl CollectionRunner {
    /// Create a runner that lets runs of the same job overlap
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self {
            aggregator,
            in_flight: None,
        }
    }

    /// Skip a job on a tick while an earlier run of it is still going
    pub fn skip_overlapping(mut self, skip: bool) -> Self {
        self.in_flight = skip.then(|| Arc::new(DashSet::new()));
        self
    }

    /// Launch every job without waiting for any of them
    ///
    /// The handles are returned for callers that want to observe completion;
    /// dropping them leaves the runs going.
    pub fn trigger(&self) -> Vec<JoinHandle<()>> {
        info!("Collection triggered");
        CollectionJob::ALL
            .into_iter()
            .filter_map(|job| self.spawn(job))
            .collect()
    }

    fn spawn(&self, job: CollectionJob) -> Option<JoinHandle<()>> {
        let guard = match &self.in_flight {
            Some(jobs) => {
                if !jobs.insert(job) {
                    warn!(job = %job, "Previous run still in flight, skipping");
                    return None;
                }
                Some(InFlight {
                    jobs: Arc::clone(jobs),
                    job,
                })
            }
            None => None,
        };

        let aggregator = Arc::clone(&self.aggregator);
        Some(tokio::spawn(async move {
            let _guard = guard;
            match aggregator.run(job).await {
                Ok(report) => info!(
                    job = %job,
                    submissions = report.tally.submissions,
                    vouchees = report.tally.vouchees,
                    pages = report.tally.pages,
                    committed = report.committed.len(),
                    failed = report.failed.len(),
                    "Collection run finished"
                ),
                Err(err) => error!(job = %job, error = %err, "Collection run aborted"),
            }
        }))
    }
}

/// Parse a cron expression, accepting the classic five-field form
///
/// The `cron` crate expects a leading seconds field; five-field expressions
/// get a `0` seconds field prepended.
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let expression = expression.trim();
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    };

    normalized
        .parse::<Schedule>()
        .map_err(|e| anyhow!("Invalid cron expression '{}': {}", expression, e))
}

/// Invokes a runner at every upcoming time of a cron schedule
pub struct Scheduler {
    schedule: Schedule,
    runner: Arc<CollectionRunner>,
}

impl Scheduler {
    pub fn new(schedule: Schedule, runner: Arc<CollectionRunner>) -> Self {
        Self { schedule, runner }
    }

    /// Fire time following `last`, strictly after it
    pub fn next_after(&self, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&last).next()
    }

    /// Start the schedule loop; abort the handle to stop it
    ///
    /// Each fire time is derived from the previous one rather than from the
    /// wall clock on wake-up, so an early wake never fires the same slot twice.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last = Utc::now();
            loop {
                let next = match self.next_after(last) {
                    Some(next) => next,
                    None => {
                        warn!("No upcoming collection time, stopping scheduler");
                        break;
                    }
                };

                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                debug!(next_run = %next, wait_secs = wait.as_secs(), "Waiting for next collection");
                tokio::time::sleep(wait).await;

                self.runner.trigger();
                last = next;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::tests::{page, ScriptedFetcher};
    use crate::error::FetchError;
    use crate::model::{MetricKind, Submission, SubmissionFilter};
    use crate::sources::PageFetcher;
    use crate::store::{MemorySampleStore, SampleStore};
    use async_trait::async_trait;
    use chrono::{TimeZone, Timelike};
    use tokio::sync::Semaphore;

    /// Fails one filter, returns a short page for the rest
    struct FailingFilter(SubmissionFilter);

    #[async_trait]
    impl PageFetcher for FailingFilter {
        async fn fetch(
            &self,
            filter: SubmissionFilter,
            _offset: usize,
            _page_size: usize,
        ) -> Result<Vec<Submission>, FetchError> {
            if filter == self.0 {
                return Err(FetchError::Query("indexer unavailable".to_string()));
            }
            Ok(page(2))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    /// Holds every fetch until permits are released
    struct GatedFetcher(Semaphore);

    #[async_trait]
    impl PageFetcher for GatedFetcher {
        async fn fetch(
            &self,
            _filter: SubmissionFilter,
            _offset: usize,
            _page_size: usize,
        ) -> Result<Vec<Submission>, FetchError> {
            let _permit = self.0.acquire().await.expect("semaphore closed");
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    async fn join_all(handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_trigger_runs_every_job() {
        let store = Arc::new(MemorySampleStore::new());
        let aggregator = Aggregator::new(Arc::new(ScriptedFetcher::default()), store.clone(), 1000);
        let runner = CollectionRunner::new(Arc::new(aggregator));

        let handles = runner.trigger();
        assert_eq!(handles.len(), 4);
        join_all(handles).await;

        for kind in MetricKind::ALL {
            assert_eq!(store.recent(kind, 24).await.unwrap().len(), 1, "{kind}");
        }
    }

    #[tokio::test]
    async fn test_failed_job_does_not_affect_siblings() {
        let store = Arc::new(MemorySampleStore::new());
        let fetcher = Arc::new(FailingFilter(SubmissionFilter::Vouching));
        let runner = CollectionRunner::new(Arc::new(Aggregator::new(fetcher, store.clone(), 1000)));

        join_all(runner.trigger()).await;

        assert!(store
            .recent(MetricKind::VouchingPhase, 24)
            .await
            .unwrap()
            .is_empty());
        for kind in [
            MetricKind::AllSubmissions,
            MetricKind::Registered,
            MetricKind::PendingRegistration,
            MetricKind::Vouched,
        ] {
            assert_eq!(store.recent(kind, 24).await.unwrap().len(), 1, "{kind}");
        }
    }

    #[tokio::test]
    async fn test_overlapping_runs_allowed_by_default() {
        let fetcher = Arc::new(GatedFetcher(Semaphore::new(0)));
        let store = Arc::new(MemorySampleStore::new());
        let runner = CollectionRunner::new(Arc::new(Aggregator::new(
            fetcher.clone(),
            store.clone(),
            1000,
        )));

        let first = runner.trigger();
        let second = runner.trigger();
        assert_eq!(first.len() + second.len(), 8);

        fetcher.0.add_permits(8);
        join_all(first).await;
        join_all(second).await;
        assert_eq!(store.recent(MetricKind::AllSubmissions, 24).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_guard_skips_running_jobs() {
        let fetcher = Arc::new(GatedFetcher(Semaphore::new(0)));
        let store = Arc::new(MemorySampleStore::new());
        let runner = CollectionRunner::new(Arc::new(Aggregator::new(
            fetcher.clone(),
            store.clone(),
            1000,
        )))
        .skip_overlapping(true);

        let first = runner.trigger();
        assert_eq!(first.len(), 4);
        assert!(runner.trigger().is_empty());

        fetcher.0.add_permits(4);
        join_all(first).await;
        assert_eq!(store.recent(MetricKind::AllSubmissions, 24).await.unwrap().len(), 1);

        fetcher.0.add_permits(4);
        let third = runner.trigger();
        assert_eq!(third.len(), 4);
        join_all(third).await;
        assert_eq!(store.recent(MetricKind::AllSubmissions, 24).await.unwrap().len(), 2);
    }

    #[test]
    fn test_five_field_schedule_fires_on_the_hour() {
        let schedule = parse_schedule("0 * * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.minute(), 0);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_six_field_schedule_is_kept() {
        let schedule = parse_schedule("30 15 * * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!((next.minute(), next.second()), (15, 30));
    }

    #[test]
    fn test_next_fire_follows_last_fire_not_wall_clock() {
        let runner = Arc::new(CollectionRunner::new(Arc::new(Aggregator::new(
            Arc::new(ScriptedFetcher::default()),
            Arc::new(MemorySampleStore::new()),
            1000,
        ))));
        let scheduler = Scheduler::new(parse_schedule("0 * * * *").unwrap(), runner);

        let fired = Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap();
        let early_wake = fired - chrono::Duration::milliseconds(100);

        // Computed from an early wake-up, the slot that just fired comes back.
        assert_eq!(scheduler.next_after(early_wake), Some(fired));
        // Computed from the slot itself, the next slot is an hour later.
        assert_eq!(
            scheduler.next_after(fired),
            Some(fired + chrono::Duration::hours(1))
        );
    }

    #[test]
    fn test_invalid_schedule_is_rejected() {
        assert!(parse_schedule("every hour").is_err());
    }
}
