//! Maps a resolved intent onto what the turn has to do.
//!
//! Every intent has exactly one strategy. Customer-scoped lookups are planned
//! behind a verification stage unless the turn already carries a verified
//! customer id.

use secrecy::ExposeSecret;
use supportline_core::domain::conversation::{ConversationTurn, CustomerId, CustomerIdentity};
use supportline_core::domain::intent::{Entities, Intent, IntentResult};
use supportline_core::domain::tool::{Operation, ToolInvocation};

use crate::guardrails::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};

const WARRANTY_NOTE: &str = "For a warranty claim, reply with the order ID of the affected \
product and our support team will take it from there.";

#[derive(Clone, Debug, PartialEq)]
pub enum Strategy {
    Direct(DirectReply),
    Tools(ToolPlan),
}

/// Replies that need no external data.
#[derive(Clone, Debug, PartialEq)]
pub enum DirectReply {
    Greeting { name: Option<String> },
    Thanks,
    Farewell,
    Clarification { entities: Entities },
    GeneralHelp,
    TechSupport,
    WarrantyInfo,
    SignInRequired { intent: Intent },
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedCall {
    pub invocation: ToolInvocation,
    /// Runs only after verification succeeded; gets the verified customer id.
    pub needs_customer: bool,
}

impl PlannedCall {
    pub fn independent(invocation: ToolInvocation) -> Self {
        Self { invocation, needs_customer: false }
    }

    pub fn after_verification(invocation: ToolInvocation) -> Self {
        Self { invocation, needs_customer: true }
    }
}

/// Verification first (when present), then `calls` concurrently.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolPlan {
    pub verify: Option<ToolInvocation>,
    pub calls: Vec<PlannedCall>,
    pub note: Option<String>,
}

impl ToolPlan {
    pub fn single(invocation: ToolInvocation) -> Self {
        Self { verify: None, calls: vec![PlannedCall::independent(invocation)], note: None }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.len() + usize::from(self.verify.is_some())
    }
}

enum CustomerScope {
    Known(CustomerId),
    Verify(ToolInvocation),
}

#[derive(Clone, Debug, Default)]
pub struct Planner {
    guardrails: GuardrailPolicy,
}

impl Planner {
    pub fn new(guardrails: GuardrailPolicy) -> Self {
        Self { guardrails }
    }

    pub fn guardrails(&self) -> &GuardrailPolicy {
        &self.guardrails
    }

    pub fn plan(&self, intent: &IntentResult, turn: &ConversationTurn) -> Strategy {
        let entities = &intent.entities;
        match intent.label {
            Intent::SearchProducts => Strategy::Tools(ToolPlan::single(catalog_lookup(
                entities,
                turn.user_text(),
            ))),
            Intent::OrderStatus => {
                let lookup = match entities.get("order_id") {
                    Some(order_id) => {
                        ToolInvocation::new(Operation::GetOrder).with_param("order_id", order_id)
                    }
                    None => ToolInvocation::new(Operation::ListOrders),
                };
                self.scoped(Intent::OrderStatus, turn, vec![lookup], None)
            }
            Intent::AccountInfo => self.scoped(
                Intent::AccountInfo,
                turn,
                vec![ToolInvocation::new(Operation::GetCustomer)],
                None,
            ),
            Intent::PlaceOrder => self.plan_order(entities, turn),
            Intent::WarrantySupport => {
                if turn.customer().is_some_and(CustomerIdentity::can_be_resolved) {
                    self.scoped(
                        Intent::WarrantySupport,
                        turn,
                        vec![ToolInvocation::new(Operation::ListOrders)],
                        Some(WARRANTY_NOTE.to_string()),
                    )
                } else {
                    Strategy::Direct(DirectReply::WarrantyInfo)
                }
            }
            Intent::TechSupport => Strategy::Direct(DirectReply::TechSupport),
            Intent::Greeting => Strategy::Direct(small_talk(turn)),
            Intent::GeneralInquiry => match small_talk(turn) {
                DirectReply::Greeting { .. } => Strategy::Direct(DirectReply::GeneralHelp),
                reply => Strategy::Direct(reply),
            },
            Intent::Clarification => {
                Strategy::Direct(DirectReply::Clarification { entities: entities.clone() })
            }
        }
    }

    fn plan_order(&self, entities: &Entities, turn: &ConversationTurn) -> Strategy {
        let request = match (entities.get("product_id"), order_quantity(entities)) {
            (Some(product_id), Some(quantity)) => {
                GuardrailIntent::CreateOrder { product_id: product_id.to_string(), quantity }
            }
            _ => GuardrailIntent::AmbiguousOrder { raw_text: turn.user_text().to_string() },
        };

        match (self.guardrails.evaluate(&request), request) {
            (GuardrailDecision::Allow, GuardrailIntent::CreateOrder { product_id, quantity }) => {
                let create = ToolInvocation::new(Operation::CreateOrder)
                    .with_param("product_id", product_id)
                    .with_param("quantity", quantity);
                self.scoped(Intent::PlaceOrder, turn, vec![create], None)
            }
            (decision, _) => {
                let fallback = catalog_lookup(entities, turn.user_text());
                let plan = ToolPlan::single(fallback);
                Strategy::Tools(match decision.user_message() {
                    Some(message) => plan.with_note(message),
                    None => plan,
                })
            }
        }
    }

    fn scoped(
        &self,
        intent: Intent,
        turn: &ConversationTurn,
        lookups: Vec<ToolInvocation>,
        note: Option<String>,
    ) -> Strategy {
        let Some(scope) = turn.customer().and_then(customer_scope) else {
            return Strategy::Direct(DirectReply::SignInRequired { intent });
        };

        let plan = match scope {
            CustomerScope::Known(customer_id) => ToolPlan {
                verify: None,
                calls: lookups
                    .into_iter()
                    .map(|invocation| {
                        PlannedCall::independent(with_customer(invocation, &customer_id))
                    })
                    .collect(),
                note,
            },
            CustomerScope::Verify(verify) => ToolPlan {
                verify: Some(verify),
                calls: lookups.into_iter().map(PlannedCall::after_verification).collect(),
                note,
            },
        };
        Strategy::Tools(plan)
    }
}

fn customer_scope(customer: &CustomerIdentity) -> Option<CustomerScope> {
    if let Some(customer_id) = &customer.customer_id {
        return Some(CustomerScope::Known(customer_id.clone()));
    }
    match (customer.display_name(), &customer.pin) {
        (Some(email), Some(pin)) => Some(CustomerScope::Verify(
            ToolInvocation::new(Operation::VerifyCustomerPin)
                .with_param("email", email)
                .with_param("pin", pin.expose_secret()),
        )),
        _ => None,
    }
}

/// Adds `customer_id` to invocations whose operation declares it.
pub fn with_customer(invocation: ToolInvocation, customer_id: &CustomerId) -> ToolInvocation {
    let declares_customer = invocation
        .resolve()
        .is_some_and(|operation| operation.params().iter().any(|spec| spec.name == "customer_id"));
    if declares_customer {
        invocation.with_param("customer_id", customer_id.as_str())
    } else {
        invocation
    }
}

/// Product lookup for the turn: an explicit product id, else a search on the
/// extracted terms, else the whole catalog.
/// A positive whole-number quantity, or nothing. `create_order` is never
/// dispatched on a guessed quantity.
fn order_quantity(entities: &Entities) -> Option<u64> {
    entities
        .get("quantity")
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|quantity| *quantity > 0)
}

fn catalog_lookup(entities: &Entities, user_text: &str) -> ToolInvocation {
    if let Some(product_id) = entities.get("product_id") {
        return ToolInvocation::new(Operation::GetProduct).with_param("product_id", product_id);
    }

    let query = entities
        .first_of(&["query", "product", "category"])
        .map(str::trim)
        .filter(|query| !query.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| search_terms(user_text));
    if query.is_empty() {
        ToolInvocation::new(Operation::ListProducts)
    } else {
        ToolInvocation::new(Operation::SearchProducts).with_param("query", query)
    }
}

fn search_terms(user_text: &str) -> String {
    user_text
        .split_whitespace()
        .filter(|word| {
            let lowered = word.to_ascii_lowercase();
            !matches!(lowered.as_str(), "search" | "find" | "for" | "show" | "me" | "please")
        })
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|character: char| character.is_ascii_punctuation() || character == ' ')
        .to_string()
}

fn small_talk(turn: &ConversationTurn) -> DirectReply {
    let lowered = turn.user_text().to_ascii_lowercase();
    let words: Vec<&str> = lowered
        .split(|character: char| !character.is_ascii_alphabetic())
        .filter(|word| !word.is_empty())
        .collect();
    let has = |candidates: &[&str]| words.iter().any(|word| candidates.contains(word));

    if has(&["thank", "thanks", "thx"]) {
        DirectReply::Thanks
    } else if has(&["bye", "goodbye", "farewell"]) {
        DirectReply::Farewell
    } else {
        DirectReply::Greeting {
            name: turn.customer().and_then(|customer| customer.display_name()).map(str::to_string),
        }
    }
}
