//! Wires configuration into a ready-to-use orchestrator.

use std::sync::Arc;

use supportline_core::config::AppConfig;
use supportline_core::trace::TraceSink;
use thiserror::Error;
use tracing::info;

use crate::capability::{CapabilityClient, JsonRpcTransport, ResilientCapabilityClient};
use crate::classifier::{IntentClassifier, LlmIntentClassifier, RuleBasedClassifier};
use crate::guardrails::GuardrailPolicy;
use crate::llm::{LlmError, OpenAiCompatibleClient};
use crate::orchestrator::Orchestrator;
use crate::planner::Planner;
use crate::streaming::{StreamEmitter, StreamSettings};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("language model client setup failed: {0}")]
    Llm(#[from] LlmError),
    #[error("capability transport setup failed: {0}")]
    Transport(String),
}

/// Which classifier backs the runtime. The rule-based one needs no model
/// credentials.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassifierMode {
    Llm,
    RuleBased,
}

impl ClassifierMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::RuleBased => "rules",
        }
    }
}

pub struct SupportRuntime {
    orchestrator: Arc<Orchestrator>,
    capabilities: Arc<dyn CapabilityClient>,
    transport: Arc<JsonRpcTransport>,
    classifier_mode: ClassifierMode,
}

impl SupportRuntime {
    pub fn from_config(
        config: &AppConfig,
        mode: ClassifierMode,
        trace: Arc<dyn TraceSink>,
    ) -> Result<Self, RuntimeError> {
        let transport = Arc::new(
            JsonRpcTransport::new(config.capability.base_url.clone(), config.capability.timeout())
                .map_err(|error| RuntimeError::Transport(error.to_string()))?,
        );
        let capabilities: Arc<dyn CapabilityClient> = Arc::new(
            ResilientCapabilityClient::from_config(transport.clone(), &config.capability),
        );

        let classifier: Arc<dyn IntentClassifier> = match mode {
            ClassifierMode::Llm => {
                let llm = OpenAiCompatibleClient::from_config(&config.llm)?;
                Arc::new(LlmIntentClassifier::new(Arc::new(llm), &config.llm))
            }
            ClassifierMode::RuleBased => Arc::new(RuleBasedClassifier::new()),
        };

        info!(
            event_name = "runtime.ready",
            classifier = mode.as_str(),
            capability_endpoint = transport.endpoint(),
            confidence_threshold = config.intent.confidence_threshold,
            "support runtime assembled"
        );

        let orchestrator = build_orchestrator(config, classifier, capabilities.clone(), trace);
        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            capabilities,
            transport,
            classifier_mode: mode,
        })
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    pub fn capabilities(&self) -> Arc<dyn CapabilityClient> {
        self.capabilities.clone()
    }

    pub fn transport(&self) -> Arc<JsonRpcTransport> {
        self.transport.clone()
    }

    pub fn classifier_mode(&self) -> ClassifierMode {
        self.classifier_mode
    }
}

/// Orchestrator over the given collaborators, tuned from configuration.
pub fn build_orchestrator(
    config: &AppConfig,
    classifier: Arc<dyn IntentClassifier>,
    capabilities: Arc<dyn CapabilityClient>,
    trace: Arc<dyn TraceSink>,
) -> Orchestrator {
    Orchestrator::new(classifier, capabilities, trace)
        .with_planner(Planner::new(GuardrailPolicy::from(&config.orders)))
        .with_emitter(StreamEmitter::new(StreamSettings::from(&config.streaming)))
        .with_confidence_threshold(config.intent.confidence_threshold)
}
