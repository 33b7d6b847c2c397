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

//! Read-side series assembly
//!
//! Both views query every kind concurrently and fail as a whole if any one
//! kind's query fails.

use crate::error::StoreError;
use crate::model::{MetricKind, Sample, StatisticsSeries};
use crate::store::SampleStore;
use futures::future::try_join_all;
use std::sync::Arc;

/// Number of samples returned per series when none is configured
pub const DEFAULT_SERIES_LIMIT: usize = 24;

/// Hour of day (UTC) standing in for a whole day in the daily view
pub const DEFAULT_REFERENCE_HOUR: u32 = 12;

pub struct QueryService {
    store: Arc<dyn SampleStore>,
    limit: usize,
}

impl QueryService {
    pub fn new(store: Arc<dyn SampleStore>, limit: usize) -> Self {
        Self { store, limit }
    }

    /// The newest samples of every kind
    pub async fn hourly_series(&self) -> Result<StatisticsSeries, StoreError> {
        let per_kind = try_join_all(
            MetricKind::ALL
                .into_iter()
                .map(|kind| self.store.recent(kind, self.limit)),
        )
        .await?;
        Ok(assemble(per_kind))
    }

    /// The newest samples of every kind taken at `reference_hour`
    ///
    /// One sample per day is approximated by the hour filter alone; several
    /// samples in the same hour of one day are all returned.
    pub async fn daily_series(&self, reference_hour: u32) -> Result<StatisticsSeries, StoreError> {
        let per_kind = try_join_all(
            MetricKind::ALL
                .into_iter()
                .map(|kind| self.store.recent_at_hour(kind, reference_hour, self.limit)),
        )
        .await?;
        Ok(assemble(per_kind))
    }
}

fn assemble(per_kind: Vec<Vec<Sample>>) -> StatisticsSeries {
    let mut series = StatisticsSeries::default();
    for (kind, samples) in MetricKind::ALL.into_iter().zip(per_kind) {
        series
            .series_mut(kind)
            .extend(samples.into_iter().map(Into::into));
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySampleStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, day, hour, 0, 0).unwrap()
    }

    struct BrokenReads;

    #[async_trait]
    impl SampleStore for BrokenReads {
        async fn append(&self, _kind: MetricKind, _value: u64) -> Result<Sample, StoreError> {
            Err(StoreError::Unavailable("read only".to_string()))
        }

        async fn recent(&self, kind: MetricKind, _limit: usize) -> Result<Vec<Sample>, StoreError> {
            if kind == MetricKind::Vouched {
                return Err(StoreError::Unavailable("connection lost".to_string()));
            }
            Ok(Vec::new())
        }

        async fn recent_at_hour(
            &self,
            _kind: MetricKind,
            _hour: u32,
            _limit: usize,
        ) -> Result<Vec<Sample>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_hourly_series_limits_every_kind() {
        let store = Arc::new(MemorySampleStore::new());
        for hour in 0..24 {
            for day in 1..=2 {
                for kind in MetricKind::ALL {
                    store.insert(Sample::new(kind, (day * 100 + hour) as u64, at(day, hour)));
                }
            }
        }
        let query = QueryService::new(store, DEFAULT_SERIES_LIMIT);

        let series = query.hourly_series().await.unwrap();

        for kind in MetricKind::ALL {
            let points = series.series(kind);
            assert_eq!(points.len(), 24);
            assert_eq!(points[0].value, 223);
            assert_eq!(points[23].value, 200);
        }
    }

    #[tokio::test]
    async fn test_daily_series_keeps_reference_hour_only() {
        let store = Arc::new(MemorySampleStore::new());
        store.insert(Sample::new(MetricKind::AllSubmissions, 10, at(1, 12)));
        store.insert(Sample::new(MetricKind::AllSubmissions, 20, at(2, 12)));
        store.insert(Sample::new(MetricKind::AllSubmissions, 30, at(2, 15)));
        let query = QueryService::new(store, DEFAULT_SERIES_LIMIT);

        let series = query.daily_series(DEFAULT_REFERENCE_HOUR).await.unwrap();

        let values: Vec<u64> = series.all.iter().map(|point| point.value).collect();
        assert_eq!(values, vec![20, 10]);
        assert_eq!(series.all[0].created_at, at(2, 12));
        assert!(series.registered.is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_kind_fails_the_request() {
        let query = QueryService::new(Arc::new(BrokenReads), DEFAULT_SERIES_LIMIT);

        assert!(matches!(
            query.hourly_series().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(query.daily_series(12).await.is_ok());
    }
}
