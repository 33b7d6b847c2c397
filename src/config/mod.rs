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

//! Configuration loading
//!
//! Configuration is a camelCase JSON document; every field has a default so
//! an empty object (or no file at all) yields a working setup.

use crate::aggregation::DEFAULT_PAGE_SIZE;
use crate::query::{DEFAULT_REFERENCE_HOUR, DEFAULT_SERIES_LIMIT};
use crate::runner::parse_schedule;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsConfig {
    /// Subgraph GraphQL endpoint
    #[serde(default = "default_subgraph_url")]
    pub subgraph_url: String,

    /// Records requested per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Cron expression for collection runs (five or six fields)
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Run one collection immediately at startup
    #[serde(default)]
    pub collect_on_startup: bool,

    /// Skip a job on a tick while its previous run is still in flight
    #[serde(default)]
    pub skip_overlapping_runs: bool,

    /// HTTP server bind address
    #[serde(default = "default_http_host")]
    pub http_host: IpAddr,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Directory for sample journals; samples are kept in memory only if unset
    pub data_directory: Option<PathBuf>,

    /// Samples returned per series
    #[serde(default = "default_series_limit")]
    pub series_limit: usize,

    /// UTC hour used for the daily series
    #[serde(default = "default_reference_hour")]
    pub daily_reference_hour: u32,

    /// Timeout for a single page request
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl StatsConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&contents)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the collection and query paths cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            bail!("pageSize must be greater than zero");
        }
        if self.series_limit == 0 {
            bail!("seriesLimit must be greater than zero");
        }
        if self.daily_reference_hour >= 24 {
            bail!(
                "dailyReferenceHour must be between 0 and 23, got {}",
                self.daily_reference_hour
            );
        }
        parse_schedule(&self.schedule)?;
        Ok(())
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            subgraph_url: default_subgraph_url(),
            page_size: default_page_size(),
            schedule: default_schedule(),
            collect_on_startup: false,
            skip_overlapping_runs: false,
            http_host: default_http_host(),
            http_port: default_http_port(),
            data_directory: None,
            series_limit: default_series_limit(),
            daily_reference_hour: default_reference_hour(),
            request_timeout: default_request_timeout(),
        }
    }
}

// Default value functions
fn default_subgraph_url() -> String {
    "https://api.thegraph.com/subgraphs/name/kleros/proof-of-humanity-mainnet".to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_schedule() -> String {
    "0 * * * *".to_string()
}

fn default_http_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_http_port() -> u16 {
    3333
}

fn default_series_limit() -> usize {
    DEFAULT_SERIES_LIMIT
}

fn default_reference_hour() -> u32 {
    DEFAULT_REFERENCE_HOUR
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helpers
mod duration_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // ISO-8601 seconds form (PT30S)
        let seconds = duration.as_secs_f64();
        serializer.serialize_str(&format!("PT{}S", seconds))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        match s.strip_prefix("PT").and_then(|rest| rest.strip_suffix('S')) {
            Some(seconds) => {
                let seconds: f64 = seconds.parse().map_err(serde::de::Error::custom)?;
                Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
            }
            None => Err(serde::de::Error::custom(format!(
                "Invalid duration format: {}",
                s
            ))),
        }
    }
}
