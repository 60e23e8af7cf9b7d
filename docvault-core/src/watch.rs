// src/watch.rs
// Change notification
//
// Commits publish events to every subscriber of the touched collection over
// an unbounded crossbeam channel while the commit lock is held, so each
// subscriber sees events in commit order and publishing never blocks a
// writer. Every subscription owns one worker thread that evaluates the
// filter and hands matches to a callback or an output channel.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::database::Database;
use crate::document::DocumentId;
use crate::error::{DocVaultError, Result};
use crate::metrics::Metrics;
use crate::query::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// One committed change to one document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub operation: ChangeOperation,
    pub doc_id: DocumentId,
    /// New document body; `None` for deletes
    pub document: Option<Value>,
    /// Commit version that produced the change
    pub version: u64,
}

/// Event plus the version it replaced, used to filter deletes
#[derive(Debug, Clone)]
pub(crate) struct WatchMessage {
    pub event: Arc<ChangeEvent>,
    pub previous: Option<Arc<Value>>,
}

#[derive(Debug)]
struct Subscriber {
    collection: String,
    sender: Sender<WatchMessage>,
}

/// Live subscriptions of one database
#[derive(Debug, Default)]
pub(crate) struct WatchRegistry {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<u64, Subscriber>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, collection: &str) -> (u64, Receiver<WatchMessage>) {
        let (sender, receiver) = channel::unbounded();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().insert(
            id,
            Subscriber {
                collection: collection.to_string(),
                sender,
            },
        );
        (id, receiver)
    }

    /// Drop the sender so the worker drains and exits
    fn unregister(&self, id: u64) -> bool {
        self.subscribers.write().remove(&id).is_some()
    }

    pub fn has_subscribers(&self, collection: &str) -> bool {
        self.subscribers
            .read()
            .values()
            .any(|s| s.collection == collection)
    }

    /// Fan out committed changes; must be called under the commit lock
    pub fn publish(&self, messages: &[WatchMessage]) {
        let subscribers = self.subscribers.read();
        if subscribers.is_empty() {
            return;
        }
        for message in messages {
            for subscriber in subscribers.values() {
                if subscriber.collection == message.event.collection {
                    // a disconnected receiver means the worker is exiting
                    let _ = subscriber.sender.send(message.clone());
                }
            }
        }
    }

    /// Disconnect every subscriber (database close)
    pub fn close_all(&self) {
        self.subscribers.write().clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }
}

/// Configures a subscription before it starts
///
/// Obtained from `Collection::watch()`.
pub struct WatchBuilder {
    db: Database,
    collection: String,
    filter: Option<String>,
}

impl WatchBuilder {
    pub(crate) fn new(db: Database, collection: String) -> Self {
        WatchBuilder {
            db,
            collection,
            filter: None,
        }
    }

    /// Only deliver changes whose document matches `filter`
    pub fn filter(mut self, filter: &str) -> Self {
        self.filter = Some(filter.to_string());
        self
    }

    /// Run `callback` on a background worker for each matching change.
    ///
    /// A callback error or panic is logged and counted in metrics; the
    /// worker keeps running.
    pub fn subscribe<F>(self, callback: F) -> Result<WatchHandle>
    where
        F: FnMut(&ChangeEvent) -> anyhow::Result<()> + Send + 'static,
    {
        self.start(Sink::Callback(Box::new(callback)))
    }

    /// Deliver matching changes to the returned receiver
    pub fn subscribe_channel(self) -> Result<(WatchHandle, Receiver<ChangeEvent>)> {
        let (sender, receiver) = channel::unbounded();
        let handle = self.start(Sink::Channel(sender))?;
        Ok((handle, receiver))
    }

    fn start(self, sink: Sink) -> Result<WatchHandle> {
        self.db.ensure_open()?;
        let filter = match &self.filter {
            Some(src) => Some(self.db.compile_filter(src)?),
            None => None,
        };

        let registry = self.db.watch_registry();
        let metrics = self.db.metrics_handle();
        let (id, receiver) = registry.register(&self.collection);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            receiver,
            filter,
            sink,
            stop: Arc::clone(&stop),
            metrics,
        };
        let spawned = thread::Builder::new()
            .name(format!("docvault-watch-{}", id))
            .spawn(move || worker.run());
        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                registry.unregister(id);
                return Err(e.into());
            }
        };

        debug!(collection = %self.collection, subscription = id, "watch started");
        Ok(WatchHandle {
            id,
            collection: self.collection,
            registry,
            stop,
            worker: Some(join),
        })
    }
}

type Callback = Box<dyn FnMut(&ChangeEvent) -> anyhow::Result<()> + Send>;

enum Sink {
    Callback(Callback),
    Channel(Sender<ChangeEvent>),
}

struct Worker {
    receiver: Receiver<WatchMessage>,
    filter: Option<Arc<Filter>>,
    sink: Sink,
    stop: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
}

impl Worker {
    fn run(mut self) {
        while let Ok(message) = self.receiver.recv() {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            if !self.accepts(&message) {
                continue;
            }
            self.deliver(&message.event);
        }
    }

    /// Deletes are matched against the version they removed
    fn accepts(&self, message: &WatchMessage) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        match (&message.event.document, &message.previous) {
            (Some(doc), _) => filter.matches(doc),
            (None, Some(previous)) => filter.matches(previous),
            (None, None) => false,
        }
    }

    fn deliver(&mut self, event: &ChangeEvent) {
        match &mut self.sink {
            Sink::Callback(callback) => {
                match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                    Ok(Ok(())) => self.metrics.record_watch_delivery(),
                    Ok(Err(e)) => {
                        self.metrics.record_watch_failure();
                        warn!(collection = %event.collection, doc_id = %event.doc_id, error = %e, "watch callback failed");
                    }
                    Err(_) => {
                        self.metrics.record_watch_failure();
                        warn!(collection = %event.collection, doc_id = %event.doc_id, "watch callback panicked");
                    }
                }
            }
            Sink::Channel(sender) => {
                if sender.send(event.clone()).is_ok() {
                    self.metrics.record_watch_delivery();
                }
            }
        }
    }
}

/// An active subscription; stopping joins the worker
#[derive(Debug)]
pub struct WatchHandle {
    id: u64,
    collection: String,
    registry: Arc<WatchRegistry>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Fails with `WatchStopped` when called a second time.
    pub fn stop(&mut self) -> Result<()> {
        let worker = self.worker.take().ok_or(DocVaultError::WatchStopped)?;
        self.stop.store(true, Ordering::Release);
        self.registry.unregister(self.id);

        // a callback stopping its own subscription cannot join itself
        if worker.thread().id() != thread::current().id() && worker.join().is_err() {
            warn!(subscription = self.id, "watch worker panicked");
        }
        debug!(collection = %self.collection, subscription = self.id, "watch stopped");
        Ok(())
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}
