use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Received,
    Classifying,
    ToolDispatch,
    DirectRespond,
    Composing,
    Streaming,
    Done,
    Cancelled,
    Errored,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Errored)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEvent {
    Start,
    ToolsRequired,
    NoToolsRequired,
    ToolsResolved,
    DirectResponseReady,
    ResponseFinalized,
    FinalChunkEmitted,
    CallerDisconnected,
    Fatal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TurnState,
    pub to: TurnState,
    pub event: TurnEvent,
}
