use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown capability operation `{0}`")]
    UnknownOperation(String),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("capability provider unreachable: {0}")]
    ProviderUnreachable(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "I couldn't process that request. Please rephrase it and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "I'm sorry, I can't reach our support systems right now. Please try again in a few minutes."
            }
            Self::Internal { .. } => {
                "I'm sorry, something went wrong on our side while handling your message."
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "bad_request",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Internal { .. } => "internal",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
                Self::BadRequest { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Domain(error @ DomainError::UnknownOperation(_))
            | ApplicationError::Domain(error @ DomainError::FlowTransition(_)) => Self::Internal {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::ProviderUnreachable(message)
            | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError};
    use crate::flows::{FlowTransitionError, TurnEvent, TurnState};

    #[test]
    fn invariant_violation_maps_to_bad_request_interface_error() {
        let interface =
            ApplicationError::from(DomainError::InvariantViolation("empty message".to_owned()))
                .into_interface("turn-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "turn-1"
        ));
        assert_eq!(interface.error_class(), "bad_request");
    }

    #[test]
    fn unreachable_provider_yields_single_apology() {
        let interface = ApplicationError::ProviderUnreachable("connection refused".to_owned())
            .into_interface("turn-2");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "turn-2");
        assert!(interface.user_message().starts_with("I'm sorry"));
        assert!(!interface.user_message().contains("connection refused"));
    }

    #[test]
    fn contract_violations_map_to_internal() {
        let unknown = ApplicationError::from(DomainError::UnknownOperation("delete_all".into()))
            .into_interface("turn-3");
        assert!(matches!(unknown, InterfaceError::Internal { ref message, .. }
            if message.contains("delete_all")));

        let transition = ApplicationError::from(DomainError::from(
            FlowTransitionError::InvalidTransition {
                state: TurnState::Received,
                event: TurnEvent::FinalChunkEmitted,
            },
        ))
        .into_interface("turn-4");
        assert!(matches!(transition, InterfaceError::Internal { .. }));
        assert_eq!(
            transition.user_message(),
            "I'm sorry, something went wrong on our side while handling your message."
        );
    }
}
