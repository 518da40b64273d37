use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Closed set of purposes a customer message can be classified into.
///
/// `Clarification` is never produced by a classifier directly; it is what a
/// low-confidence result resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    SearchProducts,
    OrderStatus,
    PlaceOrder,
    WarrantySupport,
    TechSupport,
    Greeting,
    AccountInfo,
    GeneralInquiry,
    Clarification,
}

impl Intent {
    /// Intents a classifier may emit.
    pub const CLASSIFIABLE: [Intent; 8] = [
        Intent::SearchProducts,
        Intent::OrderStatus,
        Intent::PlaceOrder,
        Intent::WarrantySupport,
        Intent::TechSupport,
        Intent::Greeting,
        Intent::AccountInfo,
        Intent::GeneralInquiry,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::SearchProducts => "search_products",
            Self::OrderStatus => "order_status",
            Self::PlaceOrder => "place_order",
            Self::WarrantySupport => "warranty_support",
            Self::TechSupport => "tech_support",
            Self::Greeting => "greeting",
            Self::AccountInfo => "account_info",
            Self::GeneralInquiry => "general_inquiry",
            Self::Clarification => "clarification",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SearchProducts => "Looking for products, browsing, specifications",
            Self::OrderStatus => "Checking order status, delivery, tracking",
            Self::PlaceOrder => "Wanting to buy, purchase, order a product",
            Self::WarrantySupport => "Warranty claims, returns, repairs",
            Self::TechSupport => "Technical issues, setup help, troubleshooting",
            Self::Greeting => "Hello, hi, general greeting",
            Self::AccountInfo => "Account details, login issues, customer info",
            Self::GeneralInquiry => "Anything that doesn't fit the categories above",
            Self::Clarification => "The request is too unclear to act on",
        }
    }

    /// Parses a classifier label. Accepts the canonical labels in any case,
    /// with `-` or spaces instead of `_`, plus a few common aliases.
    pub fn from_label(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let intent = match normalized.as_str() {
            "search_products" | "product_search" | "search" => Self::SearchProducts,
            "order_status" | "order_lookup" => Self::OrderStatus,
            "place_order" | "create_order" | "purchase" => Self::PlaceOrder,
            "warranty_support" | "warranty" => Self::WarrantySupport,
            "tech_support" | "technical_support" => Self::TechSupport,
            "greeting" => Self::Greeting,
            "account_info" | "account" => Self::AccountInfo,
            "general_inquiry" | "other" => Self::GeneralInquiry,
            "clarification" => Self::Clarification,
            _ => return None,
        };
        Some(intent)
    }
}

/// Named values pulled out of a message, such as `category` or `order_id`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entities(BTreeMap<String, String>);

impl Entities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, ignoring blank keys and values.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().trim().to_ascii_lowercase();
        let value = value.into().trim().to_string();
        if key.is_empty() || value.is_empty() {
            return;
        }
        self.0.insert(key, value);
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// First present key out of `keys`.
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub label: Intent,
    pub confidence: f32,
    pub entities: Entities,
}

impl IntentResult {
    /// Builds a result with `confidence` clamped into `[0, 1]`; NaN becomes 0.
    pub fn new(label: Intent, confidence: f32, entities: Entities) -> Self {
        let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        Self { label, confidence, entities }
    }

    /// What a turn falls back to when classification itself failed.
    pub fn general_inquiry_fallback() -> Self {
        Self::new(Intent::GeneralInquiry, 1.0, Entities::new())
    }

    /// Applies the confidence threshold. Anything strictly below it becomes a
    /// clarification, whatever the raw label said. Entities are kept so the
    /// clarification can reference them.
    pub fn gate(self, threshold: f32) -> Self {
        if self.confidence < threshold {
            Self { label: Intent::Clarification, ..self }
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Entities, Intent, IntentResult};

    #[test]
    fn labels_parse_with_aliases_and_case() {
        assert_eq!(Intent::from_label("SEARCH_PRODUCTS"), Some(Intent::SearchProducts));
        assert_eq!(Intent::from_label("product_search"), Some(Intent::SearchProducts));
        assert_eq!(Intent::from_label("Order Status"), Some(Intent::OrderStatus));
        assert_eq!(Intent::from_label("OTHER"), Some(Intent::GeneralInquiry));
        assert_eq!(Intent::from_label("refund-dance"), None);
    }

    #[test]
    fn every_classifiable_label_round_trips() {
        for intent in Intent::CLASSIFIABLE {
            assert_eq!(Intent::from_label(intent.label()), Some(intent));
        }
    }

    #[test]
    fn gate_routes_low_confidence_to_clarification() {
        let entities = Entities::new().with("category", "laptop");
        let low = IntentResult::new(Intent::PlaceOrder, 0.69, entities.clone()).gate(0.7);
        assert_eq!(low.label, Intent::Clarification);
        assert_eq!(low.entities.get("category"), Some("laptop"));

        let exact = IntentResult::new(Intent::PlaceOrder, 0.7, entities).gate(0.7);
        assert_eq!(exact.label, Intent::PlaceOrder);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(IntentResult::new(Intent::Greeting, 1.7, Entities::new()).confidence, 1.0);
        assert_eq!(IntentResult::new(Intent::Greeting, -0.2, Entities::new()).confidence, 0.0);
        assert_eq!(IntentResult::new(Intent::Greeting, f32::NAN, Entities::new()).confidence, 0.0);
    }

    #[test]
    fn blank_entities_are_ignored() {
        let mut entities = Entities::new();
        entities.insert("query", "   ");
        entities.insert("", "value");
        entities.insert(" Category ", " Monitors ");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities.get("category"), Some("Monitors"));
    }
}
