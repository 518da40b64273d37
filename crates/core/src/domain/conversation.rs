use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

impl CustomerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub text: String,
}

impl ConversationMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self { role, text: text.into() }
    }
}

/// Who is talking, as far as the current turn knows.
///
/// A `customer_id` means the caller was verified earlier and the turn can go
/// straight to customer-scoped lookups. Otherwise `email` and `pin` are used
/// to verify the customer through the capability provider before any
/// customer-scoped call. Nothing resolved here outlives the turn.
#[derive(Clone, Debug, Default)]
pub struct CustomerIdentity {
    pub email: Option<String>,
    pub pin: Option<SecretString>,
    pub customer_id: Option<CustomerId>,
}

impl CustomerIdentity {
    pub fn verified(customer_id: impl Into<String>) -> Self {
        Self { customer_id: Some(CustomerId(customer_id.into())), ..Self::default() }
    }

    pub fn with_credentials(email: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            pin: Some(SecretString::from(pin.into())),
            customer_id: None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.email.as_deref().is_some_and(|email| !email.trim().is_empty()) && self.pin.is_some()
    }

    pub fn can_be_resolved(&self) -> bool {
        self.customer_id.is_some() || self.has_credentials()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.email.as_deref().filter(|email| !email.trim().is_empty())
    }
}

/// One user turn plus the conversation that led to it.
///
/// Fields are private so a turn cannot change once it has been handed to the
/// orchestrator.
#[derive(Clone, Debug)]
pub struct ConversationTurn {
    turn_id: TurnId,
    history: Vec<ConversationMessage>,
    user_text: String,
    customer: Option<CustomerIdentity>,
}

impl ConversationTurn {
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            turn_id: TurnId::generate(),
            history: Vec::new(),
            user_text: user_text.into(),
            customer: None,
        }
    }

    pub fn with_history(mut self, history: Vec<ConversationMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_customer(mut self, customer: CustomerIdentity) -> Self {
        self.customer = Some(customer);
        self
    }

    pub fn with_turn_id(mut self, turn_id: TurnId) -> Self {
        self.turn_id = turn_id;
        self
    }

    pub fn turn_id(&self) -> &TurnId {
        &self.turn_id
    }

    pub fn history(&self) -> &[ConversationMessage] {
        &self.history
    }

    pub fn user_text(&self) -> &str {
        &self.user_text
    }

    pub fn customer(&self) -> Option<&CustomerIdentity> {
        self.customer.as_ref()
    }

    pub fn recent_history(&self, limit: usize) -> &[ConversationMessage] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }
}
