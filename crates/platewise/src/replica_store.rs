//! File-backed local replica.
//!
//! Each root identity gets its own directory; every document is one file
//! named after the URL-safe base64 of its reference. The replication engine
//! (or `platewise replica put`) writes snapshots there and resolution reads
//! them back through [`DocumentStore`].

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::StreamExt;
use platewise_core::{DocRef, DocumentStore, SnapshotStream, StoreError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct ReplicaStore {
    dir: PathBuf,
    poll_interval: Duration,
}

impl ReplicaStore {
    /// Replica of `root` under `base`.
    pub fn for_root(base: &Path, root: &DocRef) -> Self {
        Self {
            dir: base.join(encode_ref(root)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often subscriptions look for new snapshots.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &DocRef) -> PathBuf {
        self.dir.join(format!("{}.json", encode_ref(id)))
    }

    /// Delete every document in this replica. Returns how many were removed.
    pub async fn discard(&self) -> Result<usize, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        tokio::fs::remove_dir(&self.dir).await?;
        Ok(removed)
    }
}

fn encode_ref(id: &DocRef) -> String {
    URL_SAFE_NO_PAD.encode(id.as_str())
}

async fn read_snapshot(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl DocumentStore for ReplicaStore {
    async fn get(&self, id: &DocRef) -> Result<Option<Vec<u8>>, StoreError> {
        read_snapshot(&self.path_for(id)).await
    }

    fn subscribe(&self, id: &DocRef) -> SnapshotStream {
        let interval = self.poll_interval;
        let state = (self.path_for(id), None::<Vec<u8>>);
        futures::stream::unfold(state, move |(path, last)| async move {
            loop {
                match read_snapshot(&path).await {
                    Ok(Some(bytes)) if last.as_ref() != Some(&bytes) => {
                        return Some((bytes.clone(), (path, Some(bytes))));
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Polling {} failed: {}", path.display(), e),
                }
                tokio::time::sleep(interval).await;
            }
        })
        .boxed()
    }

    async fn put(&self, id: &DocRef, bytes: Vec<u8>) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(id);
        // Write then rename so pollers never see a torn snapshot.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Stored {} ({} bytes) at {}", id, bytes.len(), path.display());
        Ok(())
    }
}
