//! Agent Runtime - intent classification and turn orchestration
//!
//! This crate is the conversation pipeline behind supportline:
//! - Classifies each customer message into a closed set of intents
//!   (`classifier`, backed by an LLM or by keyword rules)
//! - Plans the capability calls an intent needs (`planner`), under order
//!   placement guardrails (`guardrails`)
//! - Calls the remote capability provider with deadlines, retries and a
//!   short-lived cache (`capability`)
//! - Composes the reply and re-chunks it for incremental delivery
//!   (`composer`, `streaming`)
//!
//! # Architecture
//!
//! Each turn follows a constrained loop driven by `orchestrator`:
//! 1. **Classification** - message + recent history → `IntentResult`, gated by
//!    the confidence threshold
//! 2. **Planning** - intent → direct reply or tool plan
//! 3. **Dispatch** - verification first, independent lookups concurrently
//! 4. **Composition** - results and per-call failures → one response text
//! 5. **Streaming** - response → ordered `ResponseChunk`s ending in one final chunk
//!
//! # Key Types
//!
//! - `Orchestrator` - the per-turn control loop (see `orchestrator` module)
//! - `IntentClassifier` - pluggable classification trait
//! - `CapabilityClient` - typed access to the capability provider
//! - `SupportRuntime` - assembles all of the above from `AppConfig`
//!
//! # Safety Principle
//!
//! The LLM only labels messages. It never chooses which operations run or
//! what they are called with; the planner decides that from the label and
//! the extracted entities, and the capability catalog validates every call.

pub mod capability;
pub mod classifier;
pub mod composer;
pub mod guardrails;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod runtime;
pub mod streaming;

pub use orchestrator::{Orchestrator, OutputEvent, TurnReport};
pub use runtime::{ClassifierMode, SupportRuntime};
