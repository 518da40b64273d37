pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod trace;

pub use config::{AppConfig, ConfigError, LoadOptions};
pub use domain::chunk::{Granularity, ResponseChunk};
pub use domain::conversation::{
    ConversationMessage, ConversationTurn, CustomerId, CustomerIdentity, Role, TurnId,
};
pub use domain::intent::{Entities, Intent, IntentResult};
pub use domain::tool::{
    FailureKind, Idempotency, Operation, Params, ToolFailure, ToolInvocation, ToolPayload,
    ToolResult,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowTransitionError, TransitionOutcome, TurnEvent, TurnFlow, TurnState};
pub use trace::{TraceEvent, TraceOutcome, TraceSink, TraceStage};
