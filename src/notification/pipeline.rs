//! Event pipeline - bounded asynchronous bus between producers and handlers
//!
//! Producers publish without blocking; a full buffer is a dropped, logged
//! event, not backpressure. A single dispatch task drains the queue and
//! invokes every registered handler in registration order. Handler failures
//! are isolated per handler per event - at-most-once, best-effort delivery.

use super::event::Event;
use anyhow::{bail, Result};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// A pluggable consumer of pipeline events with its own delivery target and
/// failure domain.
pub trait Handler: Send + Sync {
    /// Name used in dispatch logs.
    fn name(&self) -> &str;

    /// Process one event. Expected to be fast; errors are logged by the
    /// dispatch loop and do not affect other handlers.
    fn handle(&self, event: &Event) -> Result<()>;
}

/// Bounded-buffer event bus with fan-out to registered handlers.
pub struct Pipeline {
    handlers: Arc<RwLock<Vec<Arc<dyn Handler>>>>,
    sender: Mutex<Option<mpsc::Sender<Event>>>,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            dispatch_task: Mutex::new(None),
        }
    }

    /// Register a handler. Handlers run in registration order for each event.
    pub fn register_handler(&self, handler: Arc<dyn Handler>) {
        self.handlers.write().unwrap().push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    /// Spawn the dispatch loop. Has no effect if already started.
    pub fn start(&self) {
        let receiver = self.receiver.lock().unwrap().take();
        let Some(mut receiver) = receiver else {
            return;
        };

        let handlers = Arc::clone(&self.handlers);
        let task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let snapshot = handlers.read().unwrap().clone();
                for handler in snapshot {
                    if let Err(e) = handler.handle(&event) {
                        warn!(
                            handler = handler.name(),
                            service = %event.service_name,
                            error = %e,
                            "notification handler failed"
                        );
                    }
                }
            }
        });
        *self.dispatch_task.lock().unwrap() = Some(task);
    }

    /// Queue an event for dispatch. Never blocks: fails immediately when the
    /// buffer is full or the pipeline has been stopped. Producers treat a
    /// full buffer as a dropped event, not a retryable condition.
    pub fn publish(&self, event: Event) -> Result<()> {
        let sender = self.sender.lock().unwrap();
        let Some(sender) = sender.as_ref() else {
            bail!("pipeline stopped");
        };
        match sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => bail!("event buffer full"),
            Err(mpsc::error::TrySendError::Closed(_)) => bail!("pipeline stopped"),
        }
    }

    /// Close the queue, drain everything already buffered, and wait for the
    /// dispatch loop to exit. Safe to call multiple times; `publish` fails
    /// after the first call.
    pub async fn stop(&self) {
        // Dropping the sender closes the channel; recv drains whatever is
        // left and then returns None.
        self.sender.lock().unwrap().take();
        let task = self.dispatch_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
