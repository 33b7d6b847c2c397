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

//! Error types for the collection and storage paths

use std::io;
use thiserror::Error;

/// Failure to fetch or decode a page from the remote provider
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to provider failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider rejected query: {0}")]
    Query(String),
    #[error("malformed provider response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("provider response has no submissions field")]
    MissingData,
}

/// Failure to persist or read samples
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("corrupt journal entry at line {line}: {source}")]
    Codec {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode sample: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("sample store unavailable: {0}")]
    Unavailable(String),
}
