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

//! Page sources for walking the remote submissions dataset
//!
//! A source returns one bounded page of submissions per call and keeps no
//! state between calls; traversal is driven by the aggregator.

use crate::error::FetchError;
use crate::model::{Submission, SubmissionFilter};
use async_trait::async_trait;

pub mod graph;

pub use graph::GraphPageFetcher;

/// Trait for all page sources
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch at most `page_size` submissions matching `filter`, skipping the
    /// first `offset`, ordered newest first
    async fn fetch(
        &self,
        filter: SubmissionFilter,
        offset: usize,
        page_size: usize,
    ) -> Result<Vec<Submission>, FetchError>;

    /// Get the name of this source
    fn name(&self) -> &str;
}
