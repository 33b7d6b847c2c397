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

//! Core data model for submission statistics
//!
//! Defines the metric kinds, stored samples, remote submission records and the
//! series shapes returned by the read API.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a stored metric series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    /// Every submission ever made
    AllSubmissions,
    /// Submissions currently registered
    Registered,
    /// Submissions in the vouching phase
    VouchingPhase,
    /// Submissions pending registration
    PendingRegistration,
    /// Vouches given by registered submissions
    Vouched,
}

impl MetricKind {
    /// All kinds, in series output order
    pub const ALL: [MetricKind; 5] = [
        MetricKind::AllSubmissions,
        MetricKind::Registered,
        MetricKind::VouchingPhase,
        MetricKind::PendingRegistration,
        MetricKind::Vouched,
    ];

    /// Name of the series this kind is published under
    pub fn series_name(self) -> &'static str {
        match self {
            MetricKind::AllSubmissions => "all",
            MetricKind::Registered => "registered",
            MetricKind::VouchingPhase => "vouchingPhase",
            MetricKind::PendingRegistration => "pendingRegistration",
            MetricKind::Vouched => "vouched",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.series_name())
    }
}

/// One immutable observation of a metric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Which series this sample belongs to
    pub kind: MetricKind,

    /// Observed count
    pub value: u64,

    /// Assigned by the store when the sample is appended
    pub created_at: DateTime<Utc>,
}

impl Sample {
    pub fn new(kind: MetricKind, value: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            value,
            created_at,
        }
    }

    /// UTC hour-of-day of the creation timestamp
    pub fn hour(&self) -> u32 {
        self.created_at.hour()
    }
}

/// Predicate applied to the remote submissions query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmissionFilter {
    /// No filter
    All,
    /// `registered: true`
    Registered,
    /// `status: "Vouching"`
    Vouching,
    /// `status: "PendingRegistration"`
    PendingRegistration,
}

impl SubmissionFilter {
    /// GraphQL `where` argument for this filter, if any
    pub fn where_clause(self) -> Option<&'static str> {
        match self {
            SubmissionFilter::All => None,
            SubmissionFilter::Registered => Some("{ registered: true }"),
            SubmissionFilter::Vouching => Some("{ status: \"Vouching\" }"),
            SubmissionFilter::PendingRegistration => {
                Some("{ status: \"PendingRegistration\" }")
            }
        }
    }

    /// Whether records fetched under this filter carry their vouchees
    pub fn includes_vouchees(self) -> bool {
        matches!(self, SubmissionFilter::Registered)
    }
}

/// A remote submission record, used only for counting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Opaque identity assigned by the provider
    pub id: String,

    /// Submissions this one has vouched for
    #[serde(default)]
    pub vouchees: Vec<Vouchee>,
}

impl Submission {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vouchees: Vec::new(),
        }
    }

    pub fn with_vouchees(mut self, vouchees: Vec<Vouchee>) -> Self {
        self.vouchees = vouchees;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vouchee {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A unit of collection work: one filter traversal and the kinds it commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionJob {
    /// Counts every submission
    All,
    /// Counts registered submissions and the vouches they gave
    Registered,
    /// Counts submissions in the vouching phase
    VouchingPhase,
    /// Counts submissions pending registration
    PendingRegistration,
}

impl CollectionJob {
    /// Every job fired on a collection tick
    pub const ALL: [CollectionJob; 4] = [
        CollectionJob::All,
        CollectionJob::Registered,
        CollectionJob::VouchingPhase,
        CollectionJob::PendingRegistration,
    ];

    pub fn filter(self) -> SubmissionFilter {
        match self {
            CollectionJob::All => SubmissionFilter::All,
            CollectionJob::Registered => SubmissionFilter::Registered,
            CollectionJob::VouchingPhase => SubmissionFilter::Vouching,
            CollectionJob::PendingRegistration => SubmissionFilter::PendingRegistration,
        }
    }

    /// Kinds committed by a completed run, in commit order
    pub fn kinds(self) -> &'static [MetricKind] {
        match self {
            CollectionJob::All => &[MetricKind::AllSubmissions],
            CollectionJob::Registered => &[MetricKind::Registered, MetricKind::Vouched],
            CollectionJob::VouchingPhase => &[MetricKind::VouchingPhase],
            CollectionJob::PendingRegistration => &[MetricKind::PendingRegistration],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CollectionJob::All => "all",
            CollectionJob::Registered => "registered",
            CollectionJob::VouchingPhase => "vouching_phase",
            CollectionJob::PendingRegistration => "pending_registration",
        }
    }
}

impl fmt::Display for CollectionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A sample as published by the read API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub value: u64,
    pub created_at: DateTime<Utc>,
}

impl From<Sample> for SeriesPoint {
    fn from(sample: Sample) -> Self {
        Self {
            value: sample.value,
            created_at: sample.created_at,
        }
    }
}

/// Recent samples for every kind, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSeries {
    pub all: Vec<SeriesPoint>,
    pub registered: Vec<SeriesPoint>,
    pub vouching_phase: Vec<SeriesPoint>,
    pub pending_registration: Vec<SeriesPoint>,
    pub vouched: Vec<SeriesPoint>,
}

impl StatisticsSeries {
    /// Mutable access to the series of a kind
    pub fn series_mut(&mut self, kind: MetricKind) -> &mut Vec<SeriesPoint> {
        match kind {
            MetricKind::AllSubmissions => &mut self.all,
            MetricKind::Registered => &mut self.registered,
            MetricKind::VouchingPhase => &mut self.vouching_phase,
            MetricKind::PendingRegistration => &mut self.pending_registration,
            MetricKind::Vouched => &mut self.vouched,
        }
    }

    pub fn series(&self, kind: MetricKind) -> &[SeriesPoint] {
        match kind {
            MetricKind::AllSubmissions => &self.all,
            MetricKind::Registered => &self.registered,
            MetricKind::VouchingPhase => &self.vouching_phase,
            MetricKind::PendingRegistration => &self.pending_registration,
            MetricKind::Vouched => &self.vouched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_jobs_cover_every_kind_once() {
        let mut kinds: Vec<MetricKind> = CollectionJob::ALL
            .iter()
            .flat_map(|job| job.kinds().iter().copied())
            .collect();
        kinds.sort();
        assert_eq!(kinds, MetricKind::ALL.to_vec());
    }

    #[test]
    fn test_only_registered_filter_fetches_vouchees() {
        assert!(SubmissionFilter::Registered.includes_vouchees());
        assert!(!SubmissionFilter::All.includes_vouchees());
        assert!(!SubmissionFilter::Vouching.includes_vouchees());
        assert_eq!(SubmissionFilter::All.where_clause(), None);
    }

    #[test]
    fn test_submission_without_vouchees_deserializes() {
        let submission: Submission = serde_json::from_str(r#"{"id":"0xabc"}"#).unwrap();
        assert_eq!(submission, Submission::new("0xabc"));
    }

    #[test]
    fn test_series_serialization_shape() {
        let created_at = Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap();
        let mut series = StatisticsSeries::default();
        series
            .series_mut(MetricKind::VouchingPhase)
            .push(Sample::new(MetricKind::VouchingPhase, 7, created_at).into());

        let json = serde_json::to_value(&series).unwrap();
        assert_eq!(json["vouchingPhase"][0]["value"], 7);
        assert_eq!(json["vouchingPhase"][0]["createdAt"], "2021-06-01T12:00:00Z");
        assert!(json["pendingRegistration"].as_array().unwrap().is_empty());
    }
}
