use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::TurnId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStage {
    Turn,
    Classification,
    ToolCall,
    Composition,
    Streaming,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    Success,
    Degraded,
    Rejected,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub event_id: String,
    pub turn_id: TurnId,
    pub event_type: String,
    pub stage: TraceStage,
    pub outcome: TraceOutcome,
    pub latency_ms: Option<u64>,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl TraceEvent {
    pub fn new(
        turn_id: TurnId,
        event_type: impl Into<String>,
        stage: TraceStage,
        outcome: TraceOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            turn_id,
            event_type: event_type.into(),
            stage,
            outcome,
            latency_ms: None,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Receiver for observability records.
///
/// Emission is fire-and-forget: implementations must return promptly and must
/// swallow their own delivery failures.
pub trait TraceSink: Send + Sync {
    fn emit(&self, event: TraceEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn emit(&self, _event: TraceEvent) {}
}

/// Writes every record through `tracing` at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn emit(&self, event: TraceEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        tracing::debug!(
            event_name = "trace.record",
            correlation_id = %event.turn_id,
            trace_event = %event.event_type,
            stage = ?event.stage,
            outcome = ?event.outcome,
            latency_ms = event.latency_ms,
            metadata = %metadata,
            "trace record"
        );
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTraceSink {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl InMemoryTraceSink {
    pub fn events(&self) -> Vec<TraceEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<TraceEvent> {
        self.events().into_iter().filter(|event| event.event_type == event_type).collect()
    }
}

impl TraceSink for InMemoryTraceSink {
    fn emit(&self, event: TraceEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
