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

//! # pohstats
//!
//! Periodically counts Proof of Humanity submissions from a paginated
//! subgraph, stores the counts as timestamped samples and serves them back as
//! hourly and daily series.
//!
//! ## Features
//!
//! - **Paginated Collection**: Walks each filtered query to exhaustion, counting in a single pass
//! - **Append-Only Storage**: In-memory series with an optional JSON-lines journal
//! - **Scheduled Runs**: Cron-driven, fire-and-forget collection jobs
//! - **Read API**: `/api/statistics_hour` and `/api/statistics_days`
//!
//! ## Example
//!
//! ```rust,no_run
//! use pohstats::{StatsDaemon, config::StatsConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = StatsConfig::from_file("config.json")?;
//!     let daemon = StatsDaemon::new(config).await?;
//!     daemon.start().await?;
//!     daemon.wait_for_shutdown().await?;
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub mod aggregation;
pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod query;
pub mod runner;
pub mod sources;
pub mod store;

use aggregation::Aggregator;
use config::StatsConfig;
use query::QueryService;
use runner::{parse_schedule, CollectionRunner, Scheduler};
use sources::{GraphPageFetcher, PageFetcher};
use store::{JournalSampleStore, MemorySampleStore, SampleStore};

/// Main application instance
pub struct StatsDaemon {
    config: StatsConfig,
    runner: Arc<CollectionRunner>,
    query: Arc<QueryService>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_notify: Arc<Notify>,
}

impl StatsDaemon {
    /// Create a new instance, opening the sample store
    pub async fn new(config: StatsConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn SampleStore> = match &config.data_directory {
            Some(directory) => Arc::new(
                JournalSampleStore::open(directory)
                    .await
                    .with_context(|| {
                        format!("Failed to open sample journal in {}", directory.display())
                    })?,
            ),
            None => {
                warn!("No dataDirectory configured, samples will not survive a restart");
                Arc::new(MemorySampleStore::new())
            }
        };

        let fetcher = Arc::new(GraphPageFetcher::new(
            config.subgraph_url.clone(),
            config.request_timeout,
        ));
        info!(source = fetcher.name(), endpoint = fetcher.endpoint(), "Collecting from subgraph");
        let aggregator = Arc::new(Aggregator::new(fetcher, Arc::clone(&store), config.page_size));
        let runner = Arc::new(
            CollectionRunner::new(aggregator).skip_overlapping(config.skip_overlapping_runs),
        );
        let query = Arc::new(QueryService::new(store, config.series_limit));

        Ok(Self {
            config,
            runner,
            query,
            tasks: Mutex::new(Vec::new()),
            shutdown_notify: Arc::new(Notify::new()),
        })
    }

    /// Start the HTTP API and the collection schedule
    pub async fn start(&self) -> Result<()> {
        info!("Starting pohstats services");

        let addr = SocketAddr::new(self.config.http_host, self.config.http_port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind HTTP listener on {}", addr))?;
        let router = http::router(Arc::clone(&self.query), self.config.daily_reference_hour);
        let server = tokio::spawn(async move {
            info!("Statistics API listening on {}", addr);
            if let Err(err) = http::serve(listener, router).await {
                error!(error = %err, "HTTP server stopped");
            }
        });

        let schedule = parse_schedule(&self.config.schedule)?;
        info!(schedule = %self.config.schedule, "Collection scheduled");
        let scheduler = Scheduler::new(schedule, Arc::clone(&self.runner)).spawn();

        self.tasks.lock().extend([server, scheduler]);

        if self.config.collect_on_startup {
            self.runner.trigger();
        }

        self.setup_signal_handlers().await;

        info!("All services started successfully");
        Ok(())
    }

    /// Wait for shutdown signal
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        self.shutdown_notify.notified().await;
        info!("Shutdown signal received, stopping services...");

        // In-flight collection runs are dropped with the runtime; the next
        // start collects again on schedule.
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        Ok(())
    }

    async fn setup_signal_handlers(&self) {
        let shutdown_notify = Arc::clone(&self.shutdown_notify);

        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received SIGINT, initiating shutdown");
                    shutdown_notify.notify_one();
                }
                Err(err) => {
                    warn!("Failed to listen for SIGINT: {}", err);
                }
            }
        });

        #[cfg(unix)]
        {
            let shutdown_notify = Arc::clone(&self.shutdown_notify);
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        info!("Received SIGTERM, initiating shutdown");
                        shutdown_notify.notify_one();
                    }
                    Err(err) => warn!("Failed to register SIGTERM handler: {}", err),
                }
            });
        }
    }
}
