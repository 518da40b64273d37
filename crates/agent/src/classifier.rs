use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use supportline_core::config::LlmConfig;
use supportline_core::domain::conversation::{ConversationTurn, Role};
use supportline_core::domain::intent::{Entities, Intent, IntentResult};
use thiserror::Error;

use crate::llm::{ChatMessage, CompletionRequest, LlmClient, LlmError};

const HISTORY_LIMIT: usize = 6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("classification model call failed: {0}")]
    Model(#[from] LlmError),
    #[error("classification timed out after {0:?}")]
    Timeout(Duration),
    #[error("classification output was unparsable: {0}")]
    Unparsable(String),
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, turn: &ConversationTurn) -> Result<IntentResult, ClassificationError>;
}

/// Asks a chat model for `{intent, confidence, entities, reasoning}`.
pub struct LlmIntentClassifier {
    llm: Arc<dyn LlmClient>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl LlmIntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, config: &LlmConfig) -> Self {
        Self {
            llm,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_request(&self, turn: &ConversationTurn) -> CompletionRequest {
        let mut messages = vec![ChatMessage::new(Role::System, system_prompt())];
        messages.extend(
            turn.recent_history(HISTORY_LIMIT)
                .iter()
                .map(|message| ChatMessage::new(message.role, message.text.clone())),
        );

        let customer = turn
            .customer()
            .and_then(|customer| customer.display_name())
            .unwrap_or("guest");
        messages.push(ChatMessage::new(
            Role::User,
            format!("Customer: {customer}\nMessage: {}", turn.user_text()),
        ));

        CompletionRequest { messages, max_tokens: self.max_tokens, temperature: self.temperature }
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn classify(&self, turn: &ConversationTurn) -> Result<IntentResult, ClassificationError> {
        let request = self.build_request(turn);
        let raw = tokio::time::timeout(self.timeout, self.llm.complete(request))
            .await
            .map_err(|_| ClassificationError::Timeout(self.timeout))??;

        parse_classification(&raw)
    }
}

pub fn system_prompt() -> String {
    let categories = Intent::CLASSIFIABLE
        .iter()
        .map(|intent| {
            format!("- {}: {}", intent.label().to_ascii_uppercase(), intent.description())
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are an intent classifier for a computer products customer support chatbot.\n\n\
         Classify the customer message into ONE of these categories:\n{categories}\n\n\
         Extract key entities such as product, category, query, order_id, product_id, \
         quantity and max_price.\n\n\
         Return ONLY valid JSON in this exact format:\n\
         {{\"intent\": \"CATEGORY\", \"confidence\": 0.95, \
         \"entities\": {{\"category\": \"laptop\"}}, \"reasoning\": \"brief explanation\"}}"
    )
}

/// Parses the model reply. Intent and confidence are mandatory; entities are
/// best-effort and anything malformed there yields an empty mapping.
pub fn parse_classification(raw: &str) -> Result<IntentResult, ClassificationError> {
    let body = json_body(raw)
        .ok_or_else(|| ClassificationError::Unparsable("no JSON object in reply".to_string()))?;
    let value: Value = serde_json::from_str(body)
        .map_err(|error| ClassificationError::Unparsable(error.to_string()))?;

    let label = value
        .get("intent")
        .and_then(Value::as_str)
        .ok_or_else(|| ClassificationError::Unparsable("missing `intent`".to_string()))?;
    let intent = Intent::from_label(label)
        .filter(|intent| Intent::CLASSIFIABLE.contains(intent))
        .ok_or_else(|| ClassificationError::Unparsable(format!("unknown intent `{label}`")))?;

    let confidence = match value.get("confidence") {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ClassificationError::Unparsable("missing `confidence`".to_string()))?;

    let entities = value.get("entities").map(parse_entities).unwrap_or_default();

    Ok(IntentResult::new(intent, confidence as f32, entities))
}

fn json_body(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

fn parse_entities(value: &Value) -> Entities {
    let mut entities = Entities::new();
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                if let Some(text) = entity_text(value) {
                    entities.insert(key.clone(), text);
                }
            }
        }
        Value::Array(terms) => {
            let query = terms.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(" ");
            entities.insert("query", query);
        }
        _ => {}
    }
    entities
}

fn entity_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(items) => {
            let joined = items.iter().filter_map(entity_text).collect::<Vec<_>>().join(", ");
            (!joined.is_empty()).then_some(joined)
        }
        Value::Null | Value::Object(_) => None,
    }
}

/// Keyword classifier that works without a model, for offline use.
#[derive(Clone, Debug, Default)]
pub struct RuleBasedClassifier;

impl RuleBasedClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_text(&self, text: &str) -> IntentResult {
        let normalized = normalize_text(text);
        let tokens = tokenize(&normalized);
        let words = tokens.iter().map(String::as_str).collect::<BTreeSet<_>>();
        let has_word = |candidates: &[&str]| candidates.iter().any(|word| words.contains(word));
        let has_phrase =
            |phrases: &[&str]| phrases.iter().any(|phrase| normalized.contains(phrase));

        let category = extract_category(&tokens);
        let (intent, confidence) = if has_phrase(&["place an order", "place order", "to order"])
            || has_word(&["buy", "purchase"])
        {
            (Intent::PlaceOrder, 0.85)
        } else if has_word(&["warranty", "return", "refund", "repair", "rma"]) {
            (Intent::WarrantySupport, 0.85)
        } else if has_word(&["order", "orders", "track", "tracking", "delivery", "shipped"]) {
            (Intent::OrderStatus, 0.85)
        } else if has_word(&["account", "profile", "login", "password"])
            || has_phrase(&["my details", "my information"])
        {
            (Intent::AccountInfo, 0.8)
        } else if has_phrase(&["not working", "won't", "doesn't work", "set up", "how do i"])
            || has_word(&["broken", "error", "setup", "install", "driver", "troubleshoot"])
        {
            (Intent::TechSupport, 0.8)
        } else if category.is_some()
            || has_word(&["search", "find", "looking", "show", "browse", "products", "price"])
        {
            (Intent::SearchProducts, 0.8)
        } else if has_word(&["hello", "hi", "hey", "thanks", "thank", "bye", "goodbye"]) {
            (Intent::Greeting, 0.9)
        } else {
            (Intent::GeneralInquiry, 0.5)
        };

        let mut entities = Entities::new();
        if let Some(category) = category {
            entities.insert("category", category);
        }
        if let Some(max_price) = extract_max_price(&tokens) {
            entities.insert("max_price", max_price);
        }
        if let Some(order_id) = extract_order_id(&tokens) {
            entities.insert("order_id", order_id);
        }
        if let Some(quantity) = extract_quantity(&tokens) {
            entities.insert("quantity", quantity.to_string());
        }
        if matches!(intent, Intent::SearchProducts | Intent::PlaceOrder) {
            entities.insert("query", extract_query(&tokens));
        }

        IntentResult::new(intent, confidence, entities)
    }
}

#[async_trait]
impl IntentClassifier for RuleBasedClassifier {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn classify(&self, turn: &ConversationTurn) -> Result<IntentResult, ClassificationError> {
        Ok(self.classify_text(turn.user_text()))
    }
}

const CATEGORIES: [(&str, &str); 9] = [
    ("laptop", "laptop"),
    ("notebook", "laptop"),
    ("monitor", "monitor"),
    ("display", "monitor"),
    ("desktop", "desktop"),
    ("computer", "computer"),
    ("keyboard", "keyboard"),
    ("mouse", "mouse"),
    ("printer", "printer"),
];

const STOPWORDS: [&str; 33] = [
    "a", "an", "the", "i", "im", "me", "my", "want", "need", "would", "like", "to", "for", "of",
    "some", "any", "please", "can", "you", "show", "find", "search", "looking", "buy",
    "purchase", "order", "under", "below", "max", "budget", "with", "and", "do",
];

fn normalize_text(text: &str) -> String {
    text.to_ascii_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_ascii_alphanumeric() || matches!(character, '$' | '.' | '#' | '-') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_end_matches('.').to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

fn singular(token: &str) -> &str {
    token.strip_suffix('s').unwrap_or(token)
}

fn extract_category(tokens: &[String]) -> Option<&'static str> {
    tokens.iter().find_map(|token| {
        let word = singular(token);
        CATEGORIES.iter().find(|(keyword, _)| *keyword == word).map(|(_, category)| *category)
    })
}

fn extract_max_price(tokens: &[String]) -> Option<String> {
    let price_context = ["budget", "under", "below", "max", "than"];
    tokens.iter().enumerate().find_map(|(index, token)| {
        let in_context = index > 0 && price_context.contains(&tokens[index - 1].as_str());
        if token.starts_with('$') || in_context {
            parse_money_token(token)
        } else {
            None
        }
    })
}

fn parse_money_token(token: &str) -> Option<String> {
    let trimmed = token.trim_start_matches('$').trim_end_matches(',');
    if trimmed.is_empty() {
        return None;
    }

    let (number_part, multiplier) = match trimmed.strip_suffix('k') {
        Some(prefix) => (prefix, 1_000.0),
        None => (trimmed, 1.0),
    };

    let amount = number_part.parse::<f64>().ok()? * multiplier;
    if amount.fract() == 0.0 {
        Some(format!("{amount:.0}"))
    } else {
        Some(format!("{amount:.2}"))
    }
}

fn extract_order_id(tokens: &[String]) -> Option<String> {
    tokens.windows(2).find_map(|window| match window {
        [marker, candidate] if singular(marker) == "order" => {
            let candidate = candidate.trim_start_matches('#');
            candidate.chars().any(|ch| ch.is_ascii_digit()).then(|| candidate.to_string())
        }
        _ => None,
    })
}

fn extract_quantity(tokens: &[String]) -> Option<u64> {
    tokens.windows(2).find_map(|window| match window {
        [value, unit] if extract_category(std::slice::from_ref(unit)).is_some() => {
            value.parse::<u64>().ok().filter(|quantity| (1..=1_000).contains(quantity))
        }
        _ => None,
    })
}

fn extract_query(tokens: &[String]) -> String {
    tokens
        .iter()
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .filter(|token| !token.starts_with('$') && !token.starts_with('#'))
        .filter(|token| token.parse::<f64>().is_err())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}
