//! Last-read page per document.
//!
//! Saving happens on every page turn, so it must never block the reader.
//! [`BookmarkStore::save_async`] updates an in-memory LRU at once and queues
//! the durable write for a single writer task. Saves not yet on disk are also
//! held in a pending map that is never evicted, so a value pushed out of the
//! LRU is still what [`BookmarkStore::load`] returns. One writer fed by a FIFO
//! channel means writes land in the order they were made and the last save
//! for a document always wins.

use crate::error::ReaderError;
use crate::identity::{DocumentIdentity, Fingerprint};
use crate::persist::write_atomic;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Persisted reading position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub identity: DocumentIdentity,
    /// 1-based.
    pub page_number: u32,
    pub last_accessed: DateTime<Utc>,
}

/// Zero-based page index for a 1-based `page_number` on a document of
/// `page_count` pages: `clamp(page_number - 1, 0, page_count - 1)`.
pub fn clamp_page(page_number: u32, page_count: usize) -> usize {
    let wanted = (page_number as usize).saturating_sub(1);
    wanted.min(page_count.saturating_sub(1))
}

enum WriterCommand {
    Save(Bookmark),
    Flush(oneshot::Sender<()>),
}

/// Bookmark records in a directory, with a bounded memory of recent values.
#[derive(Clone)]
pub struct BookmarkStore {
    dir: PathBuf,
    recent: Arc<Mutex<LruCache<Fingerprint, u32>>>,
    /// Saves queued but not yet written.
    pending: Arc<Mutex<HashMap<Fingerprint, u32>>>,
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl BookmarkStore {
    /// Create the store and start its writer task. Must be called inside a
    /// Tokio runtime.
    pub fn new(dir: impl Into<PathBuf>, memory: usize) -> Self {
        let dir = dir.into();
        let capacity = NonZeroUsize::new(memory).unwrap_or(NonZeroUsize::MIN);
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(run_writer(dir.clone(), rx, Arc::clone(&pending)));
        Self {
            dir,
            recent: Arc::new(Mutex::new(LruCache::new(capacity))),
            pending,
            tx,
        }
    }

    pub fn record_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        record_path(&self.dir, fingerprint)
    }

    /// Saved page for `identity`, 1 when there is none.
    pub fn load(&self, identity: &DocumentIdentity) -> u32 {
        if let Some(&page) = self.pending.lock().get(&identity.fingerprint) {
            return page;
        }
        if let Some(&page) = self.recent.lock().get(&identity.fingerprint) {
            return page;
        }

        let path = self.record_path(&identity.fingerprint);
        let page = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Bookmark>(&bytes) {
                Ok(b) if b.identity.fingerprint == identity.fingerprint => b.page_number.max(1),
                Ok(_) => {
                    warn!("Bookmark {} belongs to another document", path.display());
                    1
                }
                Err(e) => {
                    warn!("Bookmark {} unreadable: {e}", path.display());
                    1
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => 1,
            Err(e) => {
                warn!("Bookmark {} unreadable: {e}", path.display());
                1
            }
        };

        // A save that raced this read is newer than the disk value.
        let mut recent = self.recent.lock();
        if !recent.contains(&identity.fingerprint) {
            recent.put(identity.fingerprint.clone(), page);
        }
        page
    }

    /// Remember `page_number` now and write it in the background.
    pub fn save_async(&self, identity: &DocumentIdentity, page_number: u32) {
        let page_number = page_number.max(1);
        self.pending.lock().insert(identity.fingerprint.clone(), page_number);
        self.recent.lock().put(identity.fingerprint.clone(), page_number);

        let bookmark = Bookmark {
            identity: identity.clone(),
            page_number,
            last_accessed: Utc::now(),
        };
        if self.tx.send(WriterCommand::Save(bookmark)).is_err() {
            warn!("Bookmark writer stopped; page {page_number} not persisted");
        }
    }

    /// Wait up to `grace` for every save queued so far to reach disk.
    /// Returns `false` if the grace period ran out.
    pub async fn flush(&self, grace: Duration) -> bool {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriterCommand::Flush(ack)).is_err() {
            return false;
        }
        matches!(tokio::time::timeout(grace, done).await, Ok(Ok(())))
    }
}

fn record_path(dir: &Path, fingerprint: &Fingerprint) -> PathBuf {
    dir.join(format!("bookmark_{fingerprint}.json"))
}

async fn run_writer(
    dir: PathBuf,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    pending: Arc<Mutex<HashMap<Fingerprint, u32>>>,
) {
    while let Some(first) = rx.recv().await {
        // Drain whatever else is already queued so bursts of page turns cost
        // one write per document.
        let mut batch = vec![first];
        while let Ok(cmd) = rx.try_recv() {
            batch.push(cmd);
        }

        let mut batch_saves: Vec<Bookmark> = Vec::new();
        for cmd in batch {
            match cmd {
                WriterCommand::Save(b) => {
                    batch_saves.retain(|p| p.identity.fingerprint != b.identity.fingerprint);
                    batch_saves.push(b);
                }
                WriterCommand::Flush(ack) => {
                    write_all(&dir, std::mem::take(&mut batch_saves), &pending).await;
                    let _ = ack.send(());
                }
            }
        }
        write_all(&dir, batch_saves, &pending).await;
    }
    debug!("Bookmark writer stopped");
}

async fn write_all(
    dir: &Path,
    bookmarks: Vec<Bookmark>,
    pending: &Arc<Mutex<HashMap<Fingerprint, u32>>>,
) {
    if bookmarks.is_empty() {
        return;
    }
    let dir = dir.to_path_buf();
    let pending = Arc::clone(pending);
    let written = tokio::task::spawn_blocking(move || {
        for b in &bookmarks {
            match write_record(&dir, b) {
                Ok(()) => {
                    // Keep the entry if a newer save replaced it meanwhile.
                    let mut pending = pending.lock();
                    if pending.get(&b.identity.fingerprint) == Some(&b.page_number) {
                        pending.remove(&b.identity.fingerprint);
                    }
                }
                Err(e) => warn!("{e}"),
            }
        }
    })
    .await;
    if let Err(e) = written {
        warn!("Bookmark write task failed: {e}");
    }
}

fn write_record(dir: &Path, bookmark: &Bookmark) -> Result<(), ReaderError> {
    write_atomic(&record_path(dir, &bookmark.identity.fingerprint), |file| {
        serde_json::to_writer_pretty(file, bookmark).map_err(io::Error::other)
    })?;
    debug!(
        "Bookmark saved: {} page {}",
        bookmark.identity.display_name(),
        bookmark.page_number
    );
    Ok(())
}
