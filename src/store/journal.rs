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

//! Durable sample store backed by per-kind JSON-lines journals
//!
//! Each kind is journaled to `<directory>/<series name>.jsonl`. On open every
//! journal is replayed into a [`MemorySampleStore`]; afterwards every append
//! is written and flushed to its journal before it becomes visible to readers.

use super::{MemorySampleStore, SampleStore};
use crate::error::StoreError;
use crate::model::{MetricKind, Sample};
use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub struct JournalSampleStore {
    directory: PathBuf,
    memory: MemorySampleStore,
    journals: HashMap<MetricKind, Mutex<File>>,
}

impl JournalSampleStore {
    /// Open (or create) the journals under `directory` and replay them
    pub async fn open<P: AsRef<Path>>(directory: P) -> Result<Self, StoreError> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory).await?;

        let memory = MemorySampleStore::new();
        let mut journals = HashMap::with_capacity(MetricKind::ALL.len());

        for kind in MetricKind::ALL {
            let path = journal_path(&directory, kind);
            let replay = replay(&path, &memory).await?;
            debug!(kind = %kind, path = %path.display(), replayed = replay.replayed, "Replayed journal");

            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            match replay.tail {
                Tail::Clean => {}
                Tail::Unterminated => {
                    file.write_all(b"\n").await?;
                    file.flush().await?;
                }
                Tail::Torn { keep } => {
                    warn!(
                        kind = %kind,
                        path = %path.display(),
                        keep,
                        "Dropping incomplete last journal entry"
                    );
                    file.set_len(keep).await?;
                }
            }
            journals.insert(kind, Mutex::new(file));
        }

        info!(
            directory = %directory.display(),
            samples = MetricKind::ALL.iter().map(|kind| memory.len(*kind)).sum::<usize>(),
            "Opened sample journal"
        );

        Ok(Self {
            directory,
            memory,
            journals,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

fn journal_path(directory: &Path, kind: MetricKind) -> PathBuf {
    directory.join(format!("{}.jsonl", kind.series_name()))
}

/// State of a journal's last line after replay
#[derive(Debug, PartialEq, Eq)]
enum Tail {
    /// Empty, or ends with a newline
    Clean,
    /// Last entry is valid but lacks its newline
    Unterminated,
    /// Last entry was cut short; the file must be cut back to `keep` bytes
    Torn { keep: u64 },
}

struct Replay {
    replayed: usize,
    tail: Tail,
}

/// Replay a journal into `memory`
///
/// Only the final, newline-less entry may be incomplete (an interrupted
/// append); a malformed entry anywhere else fails the replay.
async fn replay(path: &Path, memory: &MemorySampleStore) -> Result<Replay, StoreError> {
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Replay {
                replayed: 0,
                tail: Tail::Clean,
            })
        }
        Err(err) => return Err(err.into()),
    };

    let complete_len = contents
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |position| position + 1);
    let (complete, tail) = contents.split_at(complete_len);

    let mut replayed = 0;
    let mut lines = 0;
    for line in complete.split(|byte| *byte == b'\n') {
        lines += 1;
        if is_blank(line) {
            continue;
        }
        let sample: Sample = serde_json::from_slice(line).map_err(|source| StoreError::Codec {
            line: lines,
            source,
        })?;
        memory.insert(sample);
        replayed += 1;
    }

    let tail = if is_blank(tail) {
        if tail.is_empty() {
            Tail::Clean
        } else {
            Tail::Torn {
                keep: complete_len as u64,
            }
        }
    } else {
        match serde_json::from_slice::<Sample>(tail) {
            Ok(sample) => {
                memory.insert(sample);
                replayed += 1;
                Tail::Unterminated
            }
            Err(_) => Tail::Torn {
                keep: complete_len as u64,
            },
        }
    };

    Ok(Replay { replayed, tail })
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

async fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await
}

#[async_trait]
impl SampleStore for JournalSampleStore {
    async fn append(&self, kind: MetricKind, value: u64) -> Result<Sample, StoreError> {
        let journal = self
            .journals
            .get(&kind)
            .ok_or_else(|| StoreError::Unavailable(format!("no journal for {}", kind)))?;
        let mut file = journal.lock().await;

        // Stamped under the journal lock so file order matches time order.
        let sample = Sample::new(kind, value, Utc::now());
        let mut line = serde_json::to_vec(&sample)?;
        line.push(b'\n');
        let len = file.metadata().await?.len();
        if let Err(err) = write_line(&mut file, &line).await {
            // Cut off whatever part of the line made it to disk.
            if let Err(truncate_err) = file.set_len(len).await {
                error!(kind = %kind, error = %truncate_err, "Failed to roll back partial journal write");
            }
            return Err(err.into());
        }

        self.memory.insert(sample.clone());
        Ok(sample)
    }

    async fn recent(&self, kind: MetricKind, limit: usize) -> Result<Vec<Sample>, StoreError> {
        self.memory.recent(kind, limit).await
    }

    async fn recent_at_hour(
        &self,
        kind: MetricKind,
        hour: u32,
        limit: usize,
    ) -> Result<Vec<Sample>, StoreError> {
        self.memory.recent_at_hour(kind, hour, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_samples_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let written = {
            let store = JournalSampleStore::open(dir.path()).await.unwrap();
            store.append(MetricKind::Registered, 1500).await.unwrap();
            store.append(MetricKind::Vouched, 2).await.unwrap()
        };

        let reopened = JournalSampleStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.recent(MetricKind::Vouched, 1).await.unwrap(),
            vec![written]
        );
        assert_eq!(
            reopened.recent(MetricKind::Registered, 24).await.unwrap()[0].value,
            1500
        );
        assert!(reopened
            .recent(MetricKind::AllSubmissions, 24)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("samples");

        let store = JournalSampleStore::open(&nested).await.unwrap();
        store.append(MetricKind::AllSubmissions, 3).await.unwrap();

        assert!(nested.join("all.jsonl").exists());
        assert_eq!(store.directory(), nested.as_path());
    }

    const VALID_ALL: &str =
        "{\"kind\":\"allSubmissions\",\"value\":3,\"createdAt\":\"2021-06-01T12:00:00Z\"}";

    #[tokio::test]
    async fn test_torn_last_entry_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.jsonl");
        std::fs::write(
            &path,
            format!("{VALID_ALL}\n{{\"kind\":\"allSubmissions\",\"val"),
        )
        .unwrap();

        let store = JournalSampleStore::open(dir.path()).await.unwrap();
        assert_eq!(store.recent(MetricKind::AllSubmissions, 24).await.unwrap().len(), 1);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            format!("{VALID_ALL}\n")
        );

        let appended = store.append(MetricKind::AllSubmissions, 4).await.unwrap();
        drop(store);

        let reopened = JournalSampleStore::open(dir.path()).await.unwrap();
        let recent = reopened.recent(MetricKind::AllSubmissions, 24).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0], appended);
    }

    #[tokio::test]
    async fn test_unterminated_valid_entry_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("all.jsonl"), VALID_ALL).unwrap();

        let store = JournalSampleStore::open(dir.path()).await.unwrap();
        store.append(MetricKind::AllSubmissions, 4).await.unwrap();
        drop(store);

        let reopened = JournalSampleStore::open(dir.path()).await.unwrap();
        let values: Vec<u64> = reopened
            .recent(MetricKind::AllSubmissions, 24)
            .await
            .unwrap()
            .into_iter()
            .map(|sample| sample.value)
            .collect();
        assert_eq!(values, vec![4, 3]);
    }

    #[tokio::test]
    async fn test_corrupt_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("registered.jsonl"),
            "{\"kind\":\"registered\",\"value\":1,\"createdAt\":\"2021-06-01T12:00:00Z\"}\nnot json\n",
        )
        .unwrap();

        match JournalSampleStore::open(dir.path()).await {
            Err(StoreError::Codec { line, .. }) => assert_eq!(line, 2),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("corrupt journal was accepted"),
        }
    }
}
