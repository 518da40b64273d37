use thiserror::Error;

use crate::domain::conversation::TurnId;
use crate::flows::states::{TransitionOutcome, TurnEvent, TurnState};
use crate::trace::{TraceEvent, TraceOutcome, TraceSink, TraceStage};

/// Transition table for a single conversation turn.
#[derive(Clone, Copy, Debug, Default)]
pub struct TurnFlow;

impl TurnFlow {
    pub fn initial_state(&self) -> TurnState {
        TurnState::Received
    }

    pub fn apply(
        &self,
        current: TurnState,
        event: TurnEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_turn(current, event)
    }

    pub fn apply_with_trace<S>(
        &self,
        current: TurnState,
        event: TurnEvent,
        sink: &S,
        turn_id: &TurnId,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: TraceSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    TraceEvent::new(
                        turn_id.clone(),
                        "flow.transition_applied",
                        TraceStage::Turn,
                        TraceOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    TraceEvent::new(
                        turn_id.clone(),
                        "flow.transition_rejected",
                        TraceStage::Turn,
                        TraceOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("turn already finished in {state:?}; cannot apply {event:?}")]
    AlreadyTerminal { state: TurnState, event: TurnEvent },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: TurnState, event: TurnEvent },
}

fn transition_turn(
    current: TurnState,
    event: TurnEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use TurnEvent::{
        CallerDisconnected, DirectResponseReady, Fatal, FinalChunkEmitted, NoToolsRequired,
        ResponseFinalized, Start, ToolsRequired, ToolsResolved,
    };
    use TurnState::{
        Cancelled, Classifying, Composing, DirectRespond, Done, Errored, Received, Streaming,
        ToolDispatch,
    };

    if current.is_terminal() {
        return Err(FlowTransitionError::AlreadyTerminal { state: current, event });
    }

    let to = match (current, event) {
        (Received, Start) => Classifying,
        (Classifying, ToolsRequired) => ToolDispatch,
        (Classifying, NoToolsRequired) => DirectRespond,
        (ToolDispatch, ToolsResolved) => Composing,
        (DirectRespond, DirectResponseReady) => Composing,
        (Composing, ResponseFinalized) => Streaming,
        (Streaming, FinalChunkEmitted) => Done,
        (_, CallerDisconnected) => Cancelled,
        (_, Fatal) => Errored,
        _ => return Err(FlowTransitionError::InvalidTransition { state: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event })
}
