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

//! Append-only time-series storage for collected samples
//!
//! Samples are only ever inserted and queried. Each kind's series is kept in
//! its own lock so writers of one kind never wait on another.

use crate::error::StoreError;
use crate::model::{MetricKind, Sample};
use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

pub mod journal;

pub use journal::JournalSampleStore;

/// Trait for all sample stores
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Insert a new sample stamped with the current time
    async fn append(&self, kind: MetricKind, value: u64) -> Result<Sample, StoreError>;

    /// Up to `limit` newest samples of `kind`, newest first
    async fn recent(&self, kind: MetricKind, limit: usize) -> Result<Vec<Sample>, StoreError>;

    /// Up to `limit` newest samples of `kind` created at UTC hour `hour`, newest first
    async fn recent_at_hour(
        &self,
        kind: MetricKind,
        hour: u32,
        limit: usize,
    ) -> Result<Vec<Sample>, StoreError>;
}

/// In-memory store holding one time-ordered series per kind
pub struct MemorySampleStore {
    series: HashMap<MetricKind, RwLock<Vec<Sample>>>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        let mut series = HashMap::with_capacity(MetricKind::ALL.len());
        for kind in MetricKind::ALL {
            series.insert(kind, RwLock::new(Vec::new()));
        }
        Self { series }
    }

    fn series(&self, kind: MetricKind) -> &RwLock<Vec<Sample>> {
        // Every kind is inserted at construction and the map is never mutated.
        &self.series[&kind]
    }

    /// Insert an already-stamped sample, keeping the series ordered by time
    ///
    /// Samples sharing a timestamp keep their insertion order, so the later
    /// insert reads as the newer one.
    pub(crate) fn insert(&self, sample: Sample) {
        let mut series = self.series(sample.kind).write();
        let position = series.partition_point(|existing| existing.created_at <= sample.created_at);
        series.insert(position, sample);
    }

    /// Number of samples held for `kind`
    pub fn len(&self, kind: MetricKind) -> usize {
        self.series(kind).read().len()
    }

    pub fn is_empty(&self) -> bool {
        MetricKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }

    fn newest(&self, kind: MetricKind, limit: usize) -> Vec<Sample> {
        self.series(kind)
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    fn newest_at_hour(&self, kind: MetricKind, hour: u32, limit: usize) -> Vec<Sample> {
        self.series(kind)
            .read()
            .iter()
            .rev()
            .filter(|sample| sample.hour() == hour)
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for MemorySampleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleStore for MemorySampleStore {
    async fn append(&self, kind: MetricKind, value: u64) -> Result<Sample, StoreError> {
        let sample = Sample::new(kind, value, Utc::now());
        self.insert(sample.clone());
        Ok(sample)
    }

    async fn recent(&self, kind: MetricKind, limit: usize) -> Result<Vec<Sample>, StoreError> {
        Ok(self.newest(kind, limit))
    }

    async fn recent_at_hour(
        &self,
        kind: MetricKind,
        hour: u32,
        limit: usize,
    ) -> Result<Vec<Sample>, StoreError> {
        Ok(self.newest_at_hour(kind, hour, limit))
    }
}
