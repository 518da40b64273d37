use supportline_core::config::OrdersConfig;

pub const PLACE_ORDER_NOTE: &str = "🛒 To place an order for any of these products, please \
contact our sales team or visit our website. Note: This demo doesn't process actual orders.";

/// Side-effecting requests that must pass policy before they reach the
/// capability provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailIntent {
    CreateOrder { product_id: String, quantity: u64 },
    AmbiguousOrder { raw_text: String },
}

impl GuardrailIntent {
    pub fn action_key(&self) -> &'static str {
        match self {
            Self::CreateOrder { .. } => "order.create",
            Self::AmbiguousOrder { .. } => "order.ambiguous_intent",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String, fallback_path: &'static str },
    Degrade { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => Some(reason_code),
        }
    }

    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Deny { user_message, .. } | Self::Degrade { user_message, .. } => {
                Some(user_message)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub order_placement_enabled: bool,
    pub max_order_quantity: u64,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { order_placement_enabled: false, max_order_quantity: 10 }
    }
}

impl From<&OrdersConfig> for GuardrailPolicy {
    fn from(config: &OrdersConfig) -> Self {
        Self {
            order_placement_enabled: config.placement_enabled,
            max_order_quantity: config.max_quantity,
        }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, intent: &GuardrailIntent) -> GuardrailDecision {
        match intent {
            _ if !self.order_placement_enabled => {
                GuardrailDecision::Degrade {
                    reason_code: "order_placement_disabled",
                    user_message: PLACE_ORDER_NOTE.to_string(),
                    fallback_path: "product_search",
                }
            }
            GuardrailIntent::CreateOrder { quantity: 0, .. } => ambiguous_order(),
            GuardrailIntent::CreateOrder { quantity, .. }
                if *quantity > self.max_order_quantity =>
            {
                GuardrailDecision::Deny {
                    reason_code: "order_quantity_exceeds_limit",
                    user_message: format!(
                        "I can place orders of up to {} units from chat. For larger orders, \
                         please contact our sales team.",
                        self.max_order_quantity
                    ),
                    fallback_path: "product_search",
                }
            }
            GuardrailIntent::CreateOrder { .. } => GuardrailDecision::Allow,
            GuardrailIntent::AmbiguousOrder { .. } => ambiguous_order(),
        }
    }
}

fn ambiguous_order() -> GuardrailDecision {
    GuardrailDecision::Degrade {
        reason_code: "ambiguous_order_intent",
        user_message: "I could not tell which product you want to order. Here is what I found; \
                       reply with a product ID and quantity to order it."
            .to_string(),
        fallback_path: "product_search",
    }
}

#[cfg(test)]
mod tests {
    use supportline_core::config::OrdersConfig;

    use super::{GuardrailDecision, GuardrailIntent, GuardrailPolicy, PLACE_ORDER_NOTE};

    fn order(quantity: u64) -> GuardrailIntent {
        GuardrailIntent::CreateOrder { product_id: "MON-0054".to_string(), quantity }
    }

    #[test]
    fn disabled_placement_degrades_to_search_with_note() {
        let decision = GuardrailPolicy::default().evaluate(&order(1));

        let (reason_code, user_message, fallback_path) = match decision {
            GuardrailDecision::Degrade { reason_code, user_message, fallback_path } => {
                (reason_code, user_message, fallback_path)
            }
            _ => ("", String::new(), ""),
        };

        assert_eq!(reason_code, "order_placement_disabled");
        assert_eq!(user_message, PLACE_ORDER_NOTE);
        assert_eq!(fallback_path, "product_search");
    }

    #[test]
    fn disabled_placement_wins_over_ambiguity() {
        let intent = GuardrailIntent::AmbiguousOrder { raw_text: "buy a monitor".to_string() };
        let decision = GuardrailPolicy::default().evaluate(&intent);
        assert_eq!(decision.reason_code(), Some("order_placement_disabled"));
    }

    #[test]
    fn enabled_placement_allows_orders_within_cap() {
        let config = OrdersConfig { placement_enabled: true, max_quantity: 5 };
        let policy = GuardrailPolicy::from(&config);
        assert_eq!(policy.evaluate(&order(5)), GuardrailDecision::Allow);
        assert!(policy.evaluate(&order(2)).is_allowed());
    }

    #[test]
    fn quantity_over_cap_is_denied() {
        let policy = GuardrailPolicy { order_placement_enabled: true, max_order_quantity: 3 };
        let decision = policy.evaluate(&order(4));

        assert_eq!(decision.reason_code(), Some("order_quantity_exceeds_limit"));
        assert!(decision.user_message().is_some_and(|message| message.contains("up to 3 units")));
    }

    #[test]
    fn zero_quantity_is_never_allowed() {
        let policy = GuardrailPolicy { order_placement_enabled: true, max_order_quantity: 3 };
        let decision = policy.evaluate(&order(0));

        assert_eq!(decision.reason_code(), Some("ambiguous_order_intent"));
        assert!(!decision.is_allowed());
    }

    #[test]
    fn ambiguous_order_degrades() {
        let policy = GuardrailPolicy { order_placement_enabled: true, max_order_quantity: 3 };
        let intent = GuardrailIntent::AmbiguousOrder { raw_text: "buy that one".to_string() };
        let decision = policy.evaluate(&intent);

        assert_eq!(intent.action_key(), "order.ambiguous_intent");
        assert_eq!(decision.reason_code(), Some("ambiguous_order_intent"));
        assert!(!decision.is_allowed());
    }
}
