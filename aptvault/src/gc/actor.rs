//! The garbage collector task.
//!
//! Writers disable collection while they hold blobs that no reference
//! points to yet, and enable it again once their reference is updated.
//! Collection requests made while any writer is active are deferred
//! until the last one finishes.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::{collect, GcReport};
use crate::archive::ArchiveStore;
use crate::error::{VaultError, VaultResult};

/// Depth of the request queue.
const QUEUE_DEPTH: usize = 16;

/// The outcome of a request to the garbage collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum GcResponse {
    /// The request was applied.
    Done,

    /// Collection is disabled. It will run once it is enabled again.
    Deferred,

    /// Collection ran.
    Collected(GcReport),
}

#[derive(Debug, Clone, Copy)]
enum GcRequest {
    Enable,
    Disable,
    Run,
}

struct Message {
    request: GcRequest,
    reply: oneshot::Sender<VaultResult<GcResponse>>,
}

/// A handle to the garbage collector task.
#[derive(Debug, Clone)]
pub struct GarbageCollector {
    sender: mpsc::Sender<Message>,
}

struct Actor {
    store: Arc<ArchiveStore>,

    /// Number of active writers.
    locks: u32,

    /// Whether a collection was requested while disabled.
    pending: bool,
}

impl GarbageCollector {
    /// Spawns the garbage collector task.
    ///
    /// The task exits once every handle is dropped.
    pub fn spawn(store: Arc<ArchiveStore>) -> Self {
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);

        let actor = Actor {
            store,
            locks: 0,
            pending: false,
        };
        tokio::spawn(actor.run(receiver));

        Self { sender }
    }

    /// Releases one writer lock.
    ///
    /// If a collection was deferred and this was the last lock, the
    /// collection runs before this returns.
    pub async fn enable(&self) -> VaultResult<GcResponse> {
        self.request(GcRequest::Enable).await
    }

    /// Acquires a writer lock, preventing collection until released.
    pub async fn disable(&self) -> VaultResult<GcResponse> {
        self.request(GcRequest::Disable).await
    }

    /// Requests a collection.
    pub async fn run(&self) -> VaultResult<GcResponse> {
        self.request(GcRequest::Run).await
    }

    async fn request(&self, request: GcRequest) -> VaultResult<GcResponse> {
        let (reply, response) = oneshot::channel();

        self.sender
            .send(Message { request, reply })
            .await
            .map_err(|_| VaultError::GcUnavailable)?;

        response.await.map_err(|_| VaultError::GcUnavailable)?
    }
}

impl Actor {
    async fn run(mut self, mut receiver: mpsc::Receiver<Message>) {
        while let Some(Message { request, reply }) = receiver.recv().await {
            let result = self.handle(request).await;

            // The requester may have gone away
            let _ = reply.send(result);
        }

        tracing::debug!("Garbage collector stopped");
    }

    async fn handle(&mut self, request: GcRequest) -> VaultResult<GcResponse> {
        match request {
            GcRequest::Disable => {
                self.locks += 1;
                Ok(GcResponse::Done)
            }
            GcRequest::Enable => {
                if self.locks == 0 {
                    return Err(VaultError::GcLockUnderflow);
                }

                self.locks -= 1;
                if self.locks == 0 && self.pending {
                    self.pending = false;
                    tracing::info!("Running deferred garbage collection");

                    if let Err(e) = collect(&self.store).await {
                        tracing::warn!("Deferred garbage collection failed: {}", e);
                    }
                }

                Ok(GcResponse::Done)
            }
            GcRequest::Run => {
                if self.locks > 0 {
                    tracing::debug!("Garbage collection deferred, {} writers active", self.locks);
                    self.pending = true;
                    Ok(GcResponse::Deferred)
                } else {
                    collect(&self.store).await.map(GcResponse::Collected)
                }
            }
        }
    }
}
