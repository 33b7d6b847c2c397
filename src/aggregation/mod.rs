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

//! Paginated collection and aggregation engine
//!
//! Walks every page of a filtered submissions query, accumulating counters in
//! a single pass, and commits one sample per counter once the traversal is
//! exhausted. A page shorter than the page size marks the end of the data.

use crate::error::FetchError;
use crate::model::{CollectionJob, MetricKind, Sample, Submission, SubmissionFilter};
use crate::sources::PageFetcher;
use crate::store::SampleStore;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Page size used when none is configured
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Counters accumulated over one traversal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Records seen across all pages
    pub submissions: u64,

    /// Nested vouchee relations seen across all pages
    pub vouchees: u64,

    /// Fetch calls made
    pub pages: usize,
}

impl Tally {
    fn absorb(&mut self, page: &[Submission]) {
        self.submissions += page.len() as u64;
        self.vouchees += page
            .iter()
            .map(|submission| submission.vouchees.len() as u64)
            .sum::<u64>();
        self.pages += 1;
    }

    /// Counter value committed for `kind`
    pub fn value_for(&self, kind: MetricKind) -> u64 {
        match kind {
            MetricKind::Vouched => self.vouchees,
            MetricKind::AllSubmissions
            | MetricKind::Registered
            | MetricKind::VouchingPhase
            | MetricKind::PendingRegistration => self.submissions,
        }
    }
}

/// Outcome of one completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub job: CollectionJob,
    pub tally: Tally,

    /// Samples that reached the store
    pub committed: Vec<Sample>,

    /// Kinds whose sample could not be stored
    pub failed: Vec<MetricKind>,
}

/// Drives a page source to exhaustion and commits the resulting counters
pub struct Aggregator {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn SampleStore>,
    page_size: usize,
}

impl Aggregator {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn SampleStore>,
        page_size: usize,
    ) -> Self {
        Self {
            fetcher,
            store,
            // A zero page size would never advance the offset.
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Walk every page matching `filter`, without committing anything
    pub async fn traverse(&self, filter: SubmissionFilter) -> Result<Tally, FetchError> {
        let mut tally = Tally::default();
        let mut offset = 0;

        loop {
            let page = self.fetcher.fetch(filter, offset, self.page_size).await?;
            tally.absorb(&page);
            debug!(
                source = self.fetcher.name(),
                ?filter,
                offset,
                records = page.len(),
                total = tally.submissions,
                "Processed page"
            );

            if page.len() < self.page_size {
                return Ok(tally);
            }
            offset += self.page_size;
        }
    }

    /// Run `job` to completion and store one sample per counter it tracks
    ///
    /// A fetch error aborts the run before anything is stored. Counter
    /// commits are independent: a failed write is logged and the remaining
    /// counters are still written.
    pub async fn run(&self, job: CollectionJob) -> Result<RunReport, FetchError> {
        let tally = self.traverse(job.filter()).await.map_err(|err| {
            warn!(job = %job, source = self.fetcher.name(), error = %err, "Traversal aborted");
            err
        })?;

        let mut committed = Vec::with_capacity(job.kinds().len());
        let mut failed = Vec::new();
        for &kind in job.kinds() {
            let value = tally.value_for(kind);
            match self.store.append(kind, value).await {
                Ok(sample) => committed.push(sample),
                Err(err) => {
                    error!(job = %job, kind = %kind, value, error = %err, "Failed to store sample");
                    failed.push(kind);
                }
            }
        }

        Ok(RunReport {
            job,
            tally,
            committed,
            failed,
        })
    }
}
