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

//! HTTP read API for the collected series

use crate::error::StoreError;
use crate::model::StatisticsSeries;
use crate::query::QueryService;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::error;

#[derive(Clone)]
struct ApiState {
    query: Arc<QueryService>,
    reference_hour: u32,
}

/// Storage failure surfaced to a client
struct ApiError(StoreError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Failed to read statistics");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

/// Build the statistics router
pub fn router(query: Arc<QueryService>, reference_hour: u32) -> Router {
    Router::new()
        .route("/api/statistics_hour", get(statistics_hour))
        .route("/api/statistics_days", get(statistics_days))
        .with_state(ApiState {
            query,
            reference_hour,
        })
}

/// Serve `router` on `listener` until the task is dropped or aborted
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(listener, router).await
}

async fn statistics_hour(
    State(state): State<ApiState>,
) -> Result<Json<StatisticsSeries>, ApiError> {
    state.query.hourly_series().await.map(Json).map_err(ApiError)
}

async fn statistics_days(
    State(state): State<ApiState>,
) -> Result<Json<StatisticsSeries>, ApiError> {
    state
        .query
        .daily_series(state.reference_hour)
        .await
        .map(Json)
        .map_err(ApiError)
}
