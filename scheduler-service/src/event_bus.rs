//! # Event bus
//!
//! The scheduler's output is an `execute` event per due schedule; the
//! function runtime that consumes it is an external collaborator, so
//! `EventBus` is the seam a caller plugs a real dispatcher into.

use async_trait::async_trait;
use serde_json::Value;
use shared::errors::AlyxResult;

/// Payload published for each schedule the poll loop decides to run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteEvent {
    pub schedule_id: String,
    pub function_id: String,
    pub input: Value,
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: ExecuteEvent) -> AlyxResult<()>;
}
