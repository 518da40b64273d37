//! Drives one conversation turn from the raw user text to streamed chunks.
//!
//! Every turn walks the [`TurnFlow`] state machine: classification, then
//! either tool dispatch or a direct reply, composition, and streaming. Output
//! goes into an unbounded channel; a closed channel means the caller went
//! away and the turn stops at the next stage or chunk boundary.
//!
//! Only failures that leave nothing useful to say end the turn in `Errored`,
//! and those produce a single [`OutputEvent::Failed`] instead of chunks.

use std::sync::Arc;

use futures::future::join_all;
use futures::Stream;
use serde::{Deserialize, Serialize};
use supportline_core::domain::chunk::ResponseChunk;
use supportline_core::domain::conversation::{ConversationTurn, TurnId};
use supportline_core::domain::intent::IntentResult;
use supportline_core::domain::tool::{FailureKind, Operation, ToolInvocation, ToolResult};
use supportline_core::errors::{ApplicationError, DomainError, InterfaceError};
use supportline_core::flows::{FlowTransitionError, TurnEvent, TurnFlow, TurnState};
use supportline_core::trace::{TraceEvent, TraceOutcome, TraceSink, TraceStage};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::capability::{CapabilityClient, CapabilityError};
use crate::classifier::IntentClassifier;
use crate::composer::{CallOutcome, Composer};
use crate::planner::{with_customer, Planner, Strategy, ToolPlan};
use crate::streaming::StreamEmitter;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub error_class: String,
    pub message: String,
    pub correlation_id: String,
}

/// What a caller receives for one turn: chunks in sequence order, or a single
/// failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    Chunk(ResponseChunk),
    Failed(TurnFailure),
}

impl OutputEvent {
    pub fn failed(error: &InterfaceError) -> Self {
        Self::Failed(TurnFailure {
            error_class: error.error_class().to_string(),
            message: error.user_message().to_string(),
            correlation_id: error.correlation_id().to_string(),
        })
    }
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Transition(#[from] FlowTransitionError),
    #[error("capability provider unreachable: {0}")]
    ProviderUnreachable(String),
}

impl From<OrchestrationError> for ApplicationError {
    fn from(value: OrchestrationError) -> Self {
        match value {
            OrchestrationError::Capability(CapabilityError::UnknownOperation(name)) => {
                ApplicationError::Domain(DomainError::UnknownOperation(name))
            }
            OrchestrationError::Transition(error) => ApplicationError::Domain(error.into()),
            OrchestrationError::ProviderUnreachable(message) => {
                ApplicationError::ProviderUnreachable(message)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnReport {
    pub turn_id: TurnId,
    pub final_state: TurnState,
    pub intent: Option<IntentResult>,
    pub chunks_sent: u64,
    pub tool_calls: usize,
}

impl TurnReport {
    fn new(turn_id: TurnId) -> Self {
        Self {
            turn_id,
            final_state: TurnState::Received,
            intent: None,
            chunks_sent: 0,
            tool_calls: 0,
        }
    }
}

/// Current position of one turn in the state machine.
struct Progress<'a> {
    flow: TurnFlow,
    trace: &'a dyn TraceSink,
    turn_id: &'a TurnId,
    state: TurnState,
}

impl Progress<'_> {
    fn advance(&mut self, event: TurnEvent) -> Result<(), FlowTransitionError> {
        let outcome = self.flow.apply_with_trace(self.state, event, self.trace, self.turn_id)?;
        self.state = outcome.to;
        Ok(())
    }
}

pub struct Orchestrator {
    classifier: Arc<dyn IntentClassifier>,
    capabilities: Arc<dyn CapabilityClient>,
    planner: Planner,
    composer: Composer,
    emitter: StreamEmitter,
    trace: Arc<dyn TraceSink>,
    confidence_threshold: f32,
    flow: TurnFlow,
}

impl Orchestrator {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        capabilities: Arc<dyn CapabilityClient>,
        trace: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            classifier,
            capabilities,
            planner: Planner::default(),
            composer: Composer::new(),
            emitter: StreamEmitter::default(),
            trace,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            flow: TurnFlow,
        }
    }

    pub fn with_planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_emitter(mut self, emitter: StreamEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Runs the turn on the runtime and hands back its events as a stream.
    /// Dropping the stream cancels the turn.
    pub fn stream_turn(
        self: Arc<Self>,
        turn: ConversationTurn,
    ) -> impl Stream<Item = OutputEvent> + Send + 'static {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            self.respond(&turn, &sender).await;
        });

        async_stream::stream! {
            while let Some(event) = receiver.recv().await {
                yield event;
            }
        }
    }

    pub async fn respond(
        &self,
        turn: &ConversationTurn,
        events: &UnboundedSender<OutputEvent>,
    ) -> TurnReport {
        let turn_id = turn.turn_id();
        let started = Instant::now();
        let mut report = TurnReport::new(turn_id.clone());
        let mut progress = Progress {
            flow: self.flow,
            trace: self.trace.as_ref(),
            turn_id,
            state: self.flow.initial_state(),
        };

        info!(
            event_name = "turn.received",
            correlation_id = %turn_id,
            history_len = turn.history().len(),
            identified = turn.customer().is_some(),
            "conversation turn received"
        );
        self.trace.emit(
            TraceEvent::new(
                turn_id.clone(),
                "turn.received",
                TraceStage::Turn,
                TraceOutcome::Success,
            )
            .with_metadata("history_len", turn.history().len().to_string()),
        );

        if let Err(failure) = self.drive(turn, events, &mut progress, &mut report).await {
            let interface = ApplicationError::from(failure).into_interface(turn_id.as_str());
            error!(
                event_name = "turn.failed",
                correlation_id = %turn_id,
                error_class = interface.error_class(),
                error = %interface,
                "conversation turn failed"
            );
            self.trace.emit(
                TraceEvent::new(
                    turn_id.clone(),
                    "turn.failed",
                    TraceStage::Turn,
                    TraceOutcome::Failed,
                )
                .with_latency(started.elapsed())
                .with_metadata("error_class", interface.error_class())
                .with_metadata("error", interface.to_string()),
            );
            if !progress.state.is_terminal() {
                let _ = progress.advance(TurnEvent::Fatal);
            }
            let _ = events.send(OutputEvent::failed(&interface));
        }

        report.final_state = progress.state;
        debug!(
            event_name = "turn.finished",
            correlation_id = %turn_id,
            final_state = ?report.final_state,
            chunks_sent = report.chunks_sent,
            tool_calls = report.tool_calls,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "conversation turn finished"
        );
        report
    }

    async fn drive(
        &self,
        turn: &ConversationTurn,
        events: &UnboundedSender<OutputEvent>,
        progress: &mut Progress<'_>,
        report: &mut TurnReport,
    ) -> Result<(), OrchestrationError> {
        progress.advance(TurnEvent::Start)?;
        if events.is_closed() {
            return self.cancel(progress, "before_classification");
        }

        let intent = self.classify(turn).await;
        report.intent = Some(intent.clone());
        if events.is_closed() {
            return self.cancel(progress, "after_classification");
        }

        let composing = Instant::now();
        let (text, note) = match self.planner.plan(&intent, turn) {
            Strategy::Direct(reply) => {
                progress.advance(TurnEvent::NoToolsRequired)?;
                let text = self.composer.direct(&reply);
                progress.advance(TurnEvent::DirectResponseReady)?;
                (text, "direct")
            }
            Strategy::Tools(plan) => {
                progress.advance(TurnEvent::ToolsRequired)?;
                let Some(outcomes) = self.dispatch(&plan, turn.turn_id(), events).await? else {
                    return self.cancel(progress, "tool_dispatch");
                };
                report.tool_calls = outcomes.len();
                ensure_provider_reachable(&outcomes)?;

                let text = self.composer.tools(&outcomes, plan.note.as_deref());
                progress.advance(TurnEvent::ToolsResolved)?;
                let degraded = outcomes.iter().any(|outcome| !outcome.result.is_success());
                (text, if degraded { "degraded" } else { "tools" })
            }
        };

        self.trace.emit(
            TraceEvent::new(
                turn.turn_id().clone(),
                "turn.composed",
                TraceStage::Composition,
                if note == "degraded" { TraceOutcome::Degraded } else { TraceOutcome::Success },
            )
            .with_latency(composing.elapsed())
            .with_metadata("path", note)
            .with_metadata("length", text.chars().count().to_string()),
        );

        progress.advance(TurnEvent::ResponseFinalized)?;
        self.stream(&text, turn.turn_id(), events, progress, report).await
    }

    async fn classify(&self, turn: &ConversationTurn) -> IntentResult {
        let started = Instant::now();
        let (raw, failure) = match self.classifier.classify(turn).await {
            Ok(result) => (result, None),
            Err(classification_error) => {
                warn!(
                    event_name = "classification.fallback",
                    correlation_id = %turn.turn_id(),
                    classifier = self.classifier.name(),
                    error = %classification_error,
                    "classification failed; falling back to general inquiry"
                );
                (IntentResult::general_inquiry_fallback(), Some(classification_error.to_string()))
            }
        };

        let raw_label = raw.label;
        let intent = raw.gate(self.confidence_threshold);
        debug!(
            event_name = "classification.completed",
            correlation_id = %turn.turn_id(),
            intent = intent.label.label(),
            raw_intent = raw_label.label(),
            confidence = intent.confidence,
            "intent resolved"
        );

        let outcome =
            if failure.is_some() { TraceOutcome::Degraded } else { TraceOutcome::Success };
        let mut event = TraceEvent::new(
            turn.turn_id().clone(),
            "classification.completed",
            TraceStage::Classification,
            outcome,
        )
        .with_latency(started.elapsed())
        .with_metadata("classifier", self.classifier.name())
        .with_metadata("intent", intent.label.label())
        .with_metadata("raw_intent", raw_label.label())
        .with_metadata("confidence", format!("{:.2}", intent.confidence))
        .with_metadata("entity_count", intent.entities.len().to_string());
        if let Some(message) = failure {
            event = event.with_metadata("error", message);
        }
        self.trace.emit(event);

        intent
    }

    /// Verification first, then every remaining call concurrently. `None`
    /// when the caller disconnected before the next stage could start.
    async fn dispatch(
        &self,
        plan: &ToolPlan,
        turn_id: &TurnId,
        events: &UnboundedSender<OutputEvent>,
    ) -> Result<Option<Vec<CallOutcome>>, OrchestrationError> {
        let mut outcomes = Vec::with_capacity(plan.call_count());
        let mut customer_id = None;

        if let Some(verify) = &plan.verify {
            if events.is_closed() {
                return Ok(None);
            }
            let mut outcome = self.call(verify.clone(), turn_id).await?;
            if let ToolResult::Success(payload) = &outcome.result {
                customer_id = payload.customer_id();
                if customer_id.is_none() {
                    outcome.result = ToolResult::failure(
                        FailureKind::InvalidCredentials,
                        "verification reply carried no customer id",
                    );
                }
            }
            outcomes.push(outcome);
        }

        if events.is_closed() {
            return Ok(None);
        }

        let customer_id = customer_id.as_ref();
        let calls = plan.calls.iter().map(|call| async move {
            match (call.needs_customer, customer_id) {
                (true, None) => skipped(&call.invocation),
                (true, Some(customer_id)) => {
                    self.call(with_customer(call.invocation.clone(), customer_id), turn_id).await
                }
                (false, _) => self.call(call.invocation.clone(), turn_id).await,
            }
        });
        for outcome in join_all(calls).await {
            outcomes.push(outcome?);
        }

        Ok(Some(outcomes))
    }

    async fn call(
        &self,
        invocation: ToolInvocation,
        turn_id: &TurnId,
    ) -> Result<CallOutcome, OrchestrationError> {
        let operation = resolve(&invocation)?;
        let started = Instant::now();
        let result = self.capabilities.invoke(invocation).await?;
        let latency = started.elapsed();

        let (outcome, failure_kind) = match result.failure_kind() {
            None => (TraceOutcome::Success, None),
            Some(kind) => (TraceOutcome::Degraded, Some(kind.as_str())),
        };
        debug!(
            event_name = "tool.call_completed",
            correlation_id = %turn_id,
            operation = operation.name(),
            failure_kind,
            latency_ms = latency.as_millis() as u64,
            "capability call resolved"
        );

        let mut event =
            TraceEvent::new(turn_id.clone(), "tool.call_completed", TraceStage::ToolCall, outcome)
                .with_latency(latency)
                .with_metadata("operation", operation.name());
        if let Some(kind) = failure_kind {
            event = event.with_metadata("failure_kind", kind);
        }
        self.trace.emit(event);

        Ok(CallOutcome::new(operation, result, latency))
    }

    async fn stream(
        &self,
        text: &str,
        turn_id: &TurnId,
        events: &UnboundedSender<OutputEvent>,
        progress: &mut Progress<'_>,
        report: &mut TurnReport,
    ) -> Result<(), OrchestrationError> {
        let started = Instant::now();
        let chunks = self.emitter.emit(text);
        let granularity = chunks.granularity();
        let pacing = self.emitter.pacing(granularity);

        for chunk in chunks {
            if report.chunks_sent > 0 && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
            if events.send(OutputEvent::Chunk(chunk)).is_err() {
                return self.cancel(progress, "streaming");
            }
            report.chunks_sent += 1;
        }

        progress.advance(TurnEvent::FinalChunkEmitted)?;
        info!(
            event_name = "turn.streamed",
            correlation_id = %turn_id,
            granularity = granularity.as_str(),
            chunks = report.chunks_sent,
            "response streamed"
        );
        self.trace.emit(
            TraceEvent::new(
                turn_id.clone(),
                "turn.streamed",
                TraceStage::Streaming,
                TraceOutcome::Success,
            )
            .with_latency(started.elapsed())
            .with_metadata("granularity", granularity.as_str())
            .with_metadata("chunks", report.chunks_sent.to_string()),
        );
        Ok(())
    }

    fn cancel(
        &self,
        progress: &mut Progress<'_>,
        stage: &'static str,
    ) -> Result<(), OrchestrationError> {
        info!(
            event_name = "turn.cancelled",
            correlation_id = %progress.turn_id,
            stage,
            "caller disconnected; abandoning turn"
        );
        self.trace.emit(
            TraceEvent::new(
                progress.turn_id.clone(),
                "turn.cancelled",
                TraceStage::Turn,
                TraceOutcome::Cancelled,
            )
            .with_metadata("stage", stage),
        );
        progress.advance(TurnEvent::CallerDisconnected)?;
        Ok(())
    }
}

fn resolve(invocation: &ToolInvocation) -> Result<Operation, CapabilityError> {
    invocation
        .resolve()
        .ok_or_else(|| CapabilityError::UnknownOperation(invocation.operation.clone()))
}

fn skipped(invocation: &ToolInvocation) -> Result<CallOutcome, OrchestrationError> {
    let operation = resolve(invocation)?;
    Ok(CallOutcome::new(
        operation,
        ToolResult::failure(FailureKind::PrerequisiteFailed, "customer verification failed"),
        Duration::ZERO,
    ))
}

/// Every call that actually went out failed as unreachable: there is no data
/// and no provider to explain anything with.
fn ensure_provider_reachable(outcomes: &[CallOutcome]) -> Result<(), OrchestrationError> {
    let mut dispatched = outcomes
        .iter()
        .filter(|outcome| outcome.result.failure_kind() != Some(FailureKind::PrerequisiteFailed))
        .peekable();
    if dispatched.peek().is_none() {
        return Ok(());
    }
    if dispatched.all(|outcome| outcome.result.failure_kind() == Some(FailureKind::Unreachable)) {
        let operations =
            outcomes.iter().map(|outcome| outcome.operation.name()).collect::<Vec<_>>().join(", ");
        return Err(OrchestrationError::ProviderUnreachable(format!(
            "every dispatched call failed to connect ({operations})"
        )));
    }
    Ok(())
}
