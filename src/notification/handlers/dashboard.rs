//! Dashboard handler - forwards every event to an injected broadcast hook
//!
//! The dashboard shows its own timeline and does its own filtering, so no
//! preference or rate-limit gating happens here.

use crate::notification::event::Event;
use crate::notification::pipeline::Handler;
use anyhow::Result;
use std::sync::Arc;

/// Callback that pushes an event to connected dashboard clients.
pub type BroadcastFn = Arc<dyn Fn(&Event) + Send + Sync>;

pub struct DashboardHandler {
    broadcast: BroadcastFn,
}

impl DashboardHandler {
    pub fn new(broadcast: BroadcastFn) -> Self {
        Self { broadcast }
    }
}

impl Handler for DashboardHandler {
    fn name(&self) -> &str {
        "dashboard"
    }

    fn handle(&self, event: &Event) -> Result<()> {
        (self.broadcast)(event);
        Ok(())
    }
}
