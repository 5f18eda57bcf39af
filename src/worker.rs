//! Background execution of full passes and delivery of their results.
//!
//! ```text
//! foreground ──spawn──▶ tokio task ──spawn_blocking──▶ full pass ──store──▶ cache
//!     ▲                                                     │
//!     └──────── try_next ◀── CompletionChannel ◀── publish ─┘
//! ```
//!
//! A completion is published only after the Full artifact has been stored.
//! A pass that fails (container unreadable, store failed, panic) publishes
//! nothing and the artifact already on screen stays authoritative.

use crate::cache::CachedArtifact;
use crate::error::ReaderError;
use crate::identity::DocumentIdentity;
use crate::pipeline::layout::Page;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Result of one full pass, for the document named by `identity`.
#[derive(Debug, Clone)]
pub struct Completion {
    pub identity: DocumentIdentity,
    pub artifact: Arc<CachedArtifact>,
}

impl Completion {
    pub fn pages(&self) -> &[Page] {
        &self.artifact.pages
    }

    pub fn chapters(&self) -> &[String] {
        &self.artifact.chapters
    }
}

/// Receives completions on the worker task instead of the queue.
pub trait CompletionCallback: Send + Sync {
    fn on_completion(&self, completion: Completion);
}

/// Publishing half of a [`CompletionChannel`]. Cheap to clone.
#[derive(Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<Completion>,
    callback: Option<Arc<dyn CompletionCallback>>,
}

impl fmt::Debug for CompletionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSender")
            .field("callback", &self.callback.as_ref().map(|_| "<dyn CompletionCallback>"))
            .finish()
    }
}

impl CompletionSender {
    /// Deliver `completion` to the callback if one is registered, otherwise
    /// queue it for the foreground.
    pub fn publish(&self, completion: Completion) {
        debug!("Publishing completion for {}", completion.identity.display_name());
        match &self.callback {
            Some(cb) => cb.on_completion(completion),
            None => {
                if self.tx.send(completion).is_err() {
                    debug!("Completion dropped: channel closed");
                }
            }
        }
    }
}

/// FIFO of completions for the foreground to poll.
pub struct CompletionChannel {
    sender: CompletionSender,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl Default for CompletionChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionChannel {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Completions go to `callback`; the queue stays empty.
    pub fn with_callback(callback: Arc<dyn CompletionCallback>) -> Self {
        Self::build(Some(callback))
    }

    fn build(callback: Option<Arc<dyn CompletionCallback>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: CompletionSender { tx, callback },
            rx,
        }
    }

    pub fn sender(&self) -> CompletionSender {
        self.sender.clone()
    }

    /// Take the oldest pending completion without waiting.
    pub fn try_next(&mut self) -> Option<Completion> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next completion.
    pub async fn next(&mut self) -> Option<Completion> {
        self.rx.recv().await
    }
}

/// How a background job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Published,
    Failed,
}

/// Handle to one in-flight full pass.
pub struct BackgroundJob {
    identity: DocumentIdentity,
    handle: JoinHandle<JobOutcome>,
}

impl fmt::Debug for BackgroundJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundJob")
            .field("identity", &self.identity)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl BackgroundJob {
    pub fn identity(&self) -> &DocumentIdentity {
        &self.identity
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the job, at most `grace` if given.
    ///
    /// Returns `None` when the grace period ran out; the job keeps running
    /// detached and will still publish.
    pub async fn wait(self, grace: Option<Duration>) -> Option<JobOutcome> {
        let joined = match grace {
            Some(grace) => tokio::time::timeout(grace, self.handle).await.ok()?,
            None => self.handle.await,
        };
        Some(joined.unwrap_or(JobOutcome::Failed))
    }
}

/// Runs blocking jobs and publishes their artifacts.
#[derive(Debug, Clone)]
pub struct BackgroundWorker {
    completions: CompletionSender,
}

impl BackgroundWorker {
    pub fn new(completions: CompletionSender) -> Self {
        Self { completions }
    }

    /// Run `job` on the blocking pool. On success its artifact is published
    /// as the completion for `identity`. Must be called inside a Tokio runtime.
    ///
    /// Every call starts a new task; nothing is deduplicated here.
    pub fn spawn<F>(&self, identity: DocumentIdentity, job: F) -> BackgroundJob
    where
        F: FnOnce() -> Result<Arc<CachedArtifact>, ReaderError> + Send + 'static,
    {
        let sender = self.completions.clone();
        let job_identity = identity.clone();

        let handle = tokio::spawn(async move {
            match tokio::task::spawn_blocking(job).await {
                Ok(Ok(artifact)) => {
                    sender.publish(Completion {
                        identity: job_identity,
                        artifact,
                    });
                    JobOutcome::Published
                }
                Ok(Err(e)) => {
                    warn!("Background pass for {} failed: {e}", job_identity.display_name());
                    JobOutcome::Failed
                }
                Err(e) => {
                    warn!(
                        "Background pass for {} panicked: {e}",
                        job_identity.display_name()
                    );
                    JobOutcome::Failed
                }
            }
        });

        BackgroundJob { identity, handle }
    }
}
