//! History handler - persists every event to the SQLite history store

use crate::notification::event::Event;
use crate::notification::history::HistoryStore;
use crate::notification::pipeline::Handler;
use anyhow::Result;
use std::sync::Arc;

pub struct HistoryHandler {
    store: Arc<HistoryStore>,
}

impl HistoryHandler {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }
}

impl Handler for HistoryHandler {
    fn name(&self) -> &str {
        "history"
    }

    fn handle(&self, event: &Event) -> Result<()> {
        self.store.save(event)
    }
}
