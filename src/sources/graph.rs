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

//! GraphQL page source for a subgraph endpoint

use super::PageFetcher;
use crate::error::FetchError;
use crate::model::{Submission, SubmissionFilter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Serialize)]
struct GraphRequest {
    query: String,
}

#[derive(Deserialize)]
struct GraphResponse {
    data: Option<SubmissionsData>,
    #[serde(default)]
    errors: Vec<GraphError>,
}

#[derive(Deserialize)]
struct SubmissionsData {
    submissions: Option<Vec<Submission>>,
}

#[derive(Deserialize)]
struct GraphError {
    message: String,
}

/// Fetches submission pages from a subgraph over HTTP
pub struct GraphPageFetcher {
    endpoint: String,
    client: reqwest::Client,
}

impl GraphPageFetcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::default()
            });

        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Build the `submissions` query for one page
pub fn build_query(filter: SubmissionFilter, offset: usize, page_size: usize) -> String {
    let mut arguments = format!(
        "first: {} skip: {} orderBy: creationTime orderDirection: desc",
        page_size, offset
    );
    if let Some(clause) = filter.where_clause() {
        arguments.push_str(" where: ");
        arguments.push_str(clause);
    }

    let fields = if filter.includes_vouchees() {
        "id vouchees { id name }"
    } else {
        "id"
    };

    format!("{{ submissions({}) {{ {} }} }}", arguments, fields)
}

/// Decode a GraphQL response body into the page's submissions
pub fn parse_response(body: &[u8]) -> Result<Vec<Submission>, FetchError> {
    let response: GraphResponse = serde_json::from_slice(body)?;

    if !response.errors.is_empty() {
        let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
        return Err(FetchError::Query(messages.join("; ")));
    }

    response
        .data
        .and_then(|data| data.submissions)
        .ok_or(FetchError::MissingData)
}

#[async_trait]
impl PageFetcher for GraphPageFetcher {
    async fn fetch(
        &self,
        filter: SubmissionFilter,
        offset: usize,
        page_size: usize,
    ) -> Result<Vec<Submission>, FetchError> {
        let request = GraphRequest {
            query: build_query(filter, offset, page_size),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let page = parse_response(&body)?;
        debug!(?filter, offset, records = page.len(), "Fetched submissions page");
        Ok(page)
    }

    fn name(&self) -> &str {
        "subgraph"
    }
}
