use std::sync::Arc;

use supportline_agent::orchestrator::OutputEvent;
use supportline_agent::runtime::{ClassifierMode, SupportRuntime};
use supportline_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use supportline_core::domain::conversation::{ConversationTurn, CustomerIdentity};
use supportline_core::trace::NoopTraceSink;
use tokio::sync::mpsc;

use crate::commands::CommandResult;

const COMMAND: &str = "chat";

#[derive(Debug, Default)]
pub struct ChatArgs {
    pub message: String,
    pub email: Option<String>,
    pub pin: Option<String>,
    pub customer_id: Option<String>,
    pub offline: bool,
}

impl ChatArgs {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Self::default() }
    }

    fn customer(&self) -> Option<CustomerIdentity> {
        if let Some(customer_id) = self.customer_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return Some(CustomerIdentity::verified(customer_id.trim()));
        }
        match (&self.email, &self.pin) {
            (Some(email), Some(pin)) => Some(CustomerIdentity::with_credentials(email, pin)),
            (Some(email), None) => {
                Some(CustomerIdentity { email: Some(email.clone()), ..CustomerIdentity::default() })
            }
            _ => None,
        }
    }
}

/// Runs one turn end to end and prints the assembled reply.
pub fn run(args: ChatArgs) -> CommandResult {
    if args.message.trim().is_empty() {
        return CommandResult::failure(COMMAND, "bad_request", "message must not be empty", 2);
    }

    let mode = if args.offline { ClassifierMode::RuleBased } else { ClassifierMode::Llm };
    let mut overrides = ConfigOverrides::default();
    if args.offline {
        // The rule-based classifier never calls the model.
        overrides.llm_api_key = Some("offline".to_string());
    }

    let mut config = match AppConfig::load(LoadOptions { overrides, ..LoadOptions::default() }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2)
        }
    };
    config.streaming.char_delay_ms = 0;
    config.streaming.word_delay_ms = 0;
    config.streaming.line_delay_ms = 0;

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        }
    };

    let support = match SupportRuntime::from_config(&config, mode, Arc::new(NoopTraceSink)) {
        Ok(support) => support,
        Err(error) => return CommandResult::failure(COMMAND, "runtime_init", error.to_string(), 3),
    };

    let mut turn = ConversationTurn::new(args.message.trim());
    if let Some(customer) = args.customer() {
        turn = turn.with_customer(customer);
    }

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let orchestrator = support.orchestrator();
    runtime.block_on(orchestrator.respond(&turn, &sender));
    drop(sender);

    let mut reply = String::new();
    while let Ok(event) = receiver.try_recv() {
        match event {
            OutputEvent::Chunk(chunk) => reply.push_str(&chunk.text),
            OutputEvent::Failed(failure) => {
                return CommandResult::failure(COMMAND, &failure.error_class, failure.message, 4)
            }
        }
    }

    CommandResult::success(COMMAND, reply)
}
