//! Request/response correlation by numeric id.
//!
//! Every operation that expects a response registers its id with
//! [`OperationCorrelator::start`] before the message leaves the process.
//! Whichever transport receives the matching response hands it to
//! [`OperationCorrelator::handle`], which completes the waiter exactly once.
//!
//! # Examples
//!
//! ```rust
//! use mcp_http_transport::correlator::OperationCorrelator;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let correlator = OperationCorrelator::new(None);
//! let pending = correlator.start(1).unwrap();
//!
//! correlator.handle(json!({"jsonrpc": "2.0", "id": 1, "result": "ok"}));
//! assert_eq!(pending.await.unwrap()["result"], "ok");
//! # });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{McpError, McpResult, ProtocolError};
use crate::messages::IncomingMessage;

/// Receiver of server-initiated traffic: notifications and server requests.
pub trait MessageHandler: Send + Sync {
    /// Called on the transport's reader task; must not block.
    fn on_message(&self, message: Value);
}

impl MessageHandler for mpsc::UnboundedSender<Value> {
    fn on_message(&self, message: Value) {
        if self.send(message).is_err() {
            debug!("Message handler channel closed, dropping server message");
        }
    }
}

struct Entry {
    generation: u64,
    completion: oneshot::Sender<McpResult<Value>>,
}

#[derive(Default)]
struct Table {
    next_generation: u64,
    entries: HashMap<i64, Entry>,
}

type SharedTable = Arc<Mutex<Table>>;

fn lock(table: &Mutex<Table>) -> MutexGuard<'_, Table> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Table of operations awaiting a response.
pub struct OperationCorrelator {
    table: SharedTable,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl OperationCorrelator {
    /// Create a correlator; server-initiated messages go to `handler` when set.
    pub fn new(handler: Option<Arc<dyn MessageHandler>>) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            handler,
        }
    }

    /// Register `id` and return the future that completes with its response.
    pub fn start(&self, id: i64) -> McpResult<PendingOperation> {
        let (completion, receiver) = oneshot::channel();

        let mut table = lock(&self.table);
        if table.entries.contains_key(&id) {
            return Err(ProtocolError::DuplicateOperation { id }.into());
        }
        let generation = table.next_generation;
        table.next_generation += 1;
        table.entries.insert(
            id,
            Entry {
                generation,
                completion,
            },
        );

        Ok(PendingOperation {
            id,
            generation,
            receiver,
            table: Arc::downgrade(&self.table),
        })
    }

    /// Complete the operation `id` with a response document.
    ///
    /// Returns `false` when no such operation is pending; the response is
    /// then discarded.
    pub fn resolve(&self, id: i64, response: Value) -> bool {
        match self.take(id) {
            Some(completion) => {
                // the waiter may already be gone
                let _ = completion.send(Ok(response));
                true
            }
            None => {
                warn!("Discarding response for operation {} (late or duplicate)", id);
                false
            }
        }
    }

    /// Fail the operation `id`. Unknown ids are ignored.
    pub fn fail(&self, id: i64, error: McpError) -> bool {
        match self.take(id) {
            Some(completion) => {
                let _ = completion.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail every pending operation and clear the table.
    pub fn fail_all(&self, error: McpError) {
        let entries: Vec<_> = lock(&self.table).entries.drain().collect();
        if !entries.is_empty() {
            debug!("Failing {} pending operations: {}", entries.len(), error);
        }
        for (_, entry) in entries {
            let _ = entry.completion.send(Err(error.clone()));
        }
    }

    /// Route one incoming message.
    pub fn handle(&self, message: Value) {
        match IncomingMessage::classify(&message) {
            IncomingMessage::Response { id } => {
                self.resolve(id, message);
            }
            IncomingMessage::Notification | IncomingMessage::ServerRequest { .. } => {
                match &self.handler {
                    Some(handler) => handler.on_message(message),
                    None => debug!("No message handler registered, dropping {}", message),
                }
            }
            IncomingMessage::Unroutable => {
                warn!("Dropping unroutable server message: {}", message);
            }
        }
    }

    /// Number of operations still awaiting a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.table).entries.len()
    }

    /// Whether `id` is currently registered.
    pub fn is_pending(&self, id: i64) -> bool {
        lock(&self.table).entries.contains_key(&id)
    }

    fn take(&self, id: i64) -> Option<oneshot::Sender<McpResult<Value>>> {
        lock(&self.table)
            .entries
            .remove(&id)
            .map(|entry| entry.completion)
    }
}

impl std::fmt::Debug for OperationCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationCorrelator")
            .field("pending", &self.pending_count())
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// The waiting side of a registered operation.
///
/// Dropping it before completion unregisters the id.
#[derive(Debug)]
pub struct PendingOperation {
    id: i64,
    generation: u64,
    receiver: oneshot::Receiver<McpResult<Value>>,
    table: Weak<Mutex<Table>>,
}

impl PendingOperation {
    /// The correlation id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Wait for the response, giving up after `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> McpResult<Value> {
        match tokio::time::timeout(timeout, &mut self).await {
            Ok(result) => result,
            Err(_) => Err(McpError::timeout(
                format!("waiting for response to operation {}", self.id),
                timeout,
            )),
        }
    }
}

impl Future for PendingOperation {
    type Output = McpResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(McpError::internal(format!(
                    "completion for operation {} was dropped",
                    id
                )))
            })
        })
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = lock(&table);
        // the id may have been reused by a newer operation
        if table
            .entries
            .get(&self.id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            table.entries.remove(&self.id);
        }
    }
}
