//! Builds the final response text for a turn.
//!
//! Partial tool failures are folded into the text as explanations so the
//! customer still gets whatever data did come back.

use std::time::Duration;

use supportline_core::domain::intent::Intent;
use supportline_core::domain::tool::{FailureKind, Operation, ToolFailure, ToolResult};

use crate::planner::DirectReply;

/// One resolved capability call within a turn.
#[derive(Clone, Debug, PartialEq)]
pub struct CallOutcome {
    pub operation: Operation,
    pub result: ToolResult,
    pub latency: Duration,
}

impl CallOutcome {
    pub fn new(operation: Operation, result: ToolResult, latency: Duration) -> Self {
        Self { operation, result, latency }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Composer;

impl Composer {
    pub fn new() -> Self {
        Self
    }

    pub fn direct(&self, reply: &DirectReply) -> String {
        match reply {
            DirectReply::Greeting { name } => format!(
                "Hello {}! How can I help with your computer products today?",
                name.as_deref().unwrap_or("there")
            ),
            DirectReply::Thanks => {
                "You're welcome! Is there anything else I can help you with?".to_string()
            }
            DirectReply::Farewell => "Goodbye! Have a great day, and feel free to reach out if \
                                      you need any help."
                .to_string(),
            DirectReply::Clarification { entities } if entities.is_empty() => {
                "I'm not quite sure what you need yet. Could you tell me a bit more? I can help \
                 with orders, products, warranties, and technical issues."
                    .to_string()
            }
            DirectReply::Clarification { entities } => {
                let mentioned =
                    entities.iter().map(|(_, value)| value).collect::<Vec<_>>().join(", ");
                format!(
                    "I want to make sure I get this right. You mentioned {mentioned}. Are you \
                     looking for products, an update on an order, or something else?"
                )
            }
            DirectReply::GeneralHelp => "I can help with orders, products, warranties, and \
                                         technical issues. What do you need?"
                .to_string(),
            DirectReply::TechSupport => "Sorry you're running into trouble. Restarting the \
                device and checking that cables and drivers are up to date fixes most issues. \
                If it keeps happening, tell me the product model and what you're seeing and \
                I'll point you in the right direction."
                .to_string(),
            DirectReply::WarrantyInfo => "All of our computer products carry a manufacturer \
                warranty. Sign in with your email and PIN and I can pull up the orders your \
                claim relates to."
                .to_string(),
            DirectReply::SignInRequired { intent } => format!(
                "To {}, please sign in with your email and PIN first.",
                signed_in_action(*intent)
            ),
        }
    }

    /// Successful calls are presented under a heading each; failed ones become
    /// explanations of what is unavailable. Successful verification is not shown.
    pub fn tools(&self, outcomes: &[CallOutcome], note: Option<&str>) -> String {
        let mut sections = Vec::new();

        for outcome in outcomes {
            match &outcome.result {
                ToolResult::Success(_) if outcome.operation == Operation::VerifyCustomerPin => {}
                ToolResult::Success(payload) => {
                    let body = payload.text.trim();
                    if body.is_empty() {
                        sections.push(empty_result(outcome.operation).to_string());
                    } else {
                        sections.push(format!("{}\n{body}", heading(outcome.operation)));
                    }
                }
                ToolResult::Failure(failure) => {
                    let explanation = explain_failure(outcome.operation, failure);
                    if !sections.contains(&explanation) {
                        sections.push(explanation);
                    }
                }
            }
        }

        if let Some(note) = note.filter(|note| !note.trim().is_empty()) {
            sections.push(note.to_string());
        }
        if sections.is_empty() {
            sections.push(self.direct(&DirectReply::GeneralHelp));
        }

        sections.join("\n\n")
    }
}

fn signed_in_action(intent: Intent) -> &'static str {
    match intent {
        Intent::OrderStatus => "check on your orders",
        Intent::AccountInfo => "see your account details",
        Intent::PlaceOrder => "place an order",
        Intent::WarrantySupport => "look up your warranty",
        _ => "help with that",
    }
}

fn heading(operation: Operation) -> &'static str {
    match operation {
        Operation::VerifyCustomerPin => "Your account is verified:",
        Operation::GetCustomer => "Here is your account information:",
        Operation::ListProducts => "Here are the products I found:",
        Operation::SearchProducts => "Here are the products matching your search:",
        Operation::GetProduct => "Here are the product details:",
        Operation::ListOrders => "Here are your recent orders:",
        Operation::GetOrder => "Here are the order details:",
        Operation::CreateOrder => "Your order has been placed:",
    }
}

fn empty_result(operation: Operation) -> &'static str {
    match operation {
        Operation::ListProducts | Operation::SearchProducts => {
            "I couldn't find any products matching that. Try a broader search term."
        }
        Operation::ListOrders => "You don't have any orders yet.",
        _ => "The request went through, but there was nothing to show.",
    }
}

/// Customer-facing explanation for one failed call.
pub fn explain_failure(operation: Operation, failure: &ToolFailure) -> String {
    let subject = operation.subject();
    match failure.kind {
        FailureKind::Timeout | FailureKind::Transient | FailureKind::Unreachable => format!(
            "I couldn't retrieve {subject} right now because the service is temporarily \
             unavailable. Please try again in a moment."
        ),
        FailureKind::NotFound => match operation {
            Operation::GetOrder => {
                "I couldn't find that order. Please double-check the order ID.".to_string()
            }
            Operation::GetProduct => {
                "I couldn't find that product. Please double-check the product ID.".to_string()
            }
            _ => format!("I couldn't find {subject}."),
        },
        FailureKind::Validation => format!(
            "I couldn't look up {subject} because some details were missing or invalid ({}).",
            failure.message
        ),
        FailureKind::InvalidCredentials => {
            "I couldn't verify your account. Please check your email and PIN.".to_string()
        }
        FailureKind::Rejected => {
            format!("The request for {subject} was declined: {}", failure.message)
        }
        FailureKind::AmbiguousNonIdempotent => "I couldn't confirm whether your order went \
            through. Please check your order status before trying again so you don't end up \
            with a duplicate order."
            .to_string(),
        FailureKind::PrerequisiteFailed => format!(
            "I couldn't retrieve {subject} because your account could not be verified."
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use supportline_core::domain::intent::{Entities, Intent};
    use supportline_core::domain::tool::{FailureKind, Operation, ToolPayload, ToolResult};

    use super::{CallOutcome, Composer};
    use crate::planner::DirectReply;

    fn outcome(operation: Operation, result: ToolResult) -> CallOutcome {
        CallOutcome::new(operation, result, Duration::from_millis(5))
    }

    #[test]
    fn successful_lookup_is_presented_under_heading() {
        let orders = "1. ORD-1 Laptop (shipped)\n2. ORD-2 Mouse (pending)\n3. ORD-3 Dock (pending)";
        let text = Composer::new().tools(
            &[
                outcome(Operation::VerifyCustomerPin, ToolResult::Success(ToolPayload::text("ok"))),
                outcome(Operation::ListOrders, ToolResult::Success(ToolPayload::text(orders))),
            ],
            None,
        );

        assert_eq!(text, format!("Here are your recent orders:\n{orders}"));
    }

    #[test]
    fn partial_failure_explains_missing_data() {
        let text = Composer::new().tools(
            &[
                outcome(Operation::GetCustomer, ToolResult::Success(ToolPayload::text("Ann"))),
                outcome(Operation::ListOrders, ToolResult::failure(FailureKind::Timeout, "slow")),
            ],
            None,
        );

        assert!(text.starts_with("Here is your account information:\nAnn"));
        assert!(text.contains("couldn't retrieve your order history right now"));
    }

    #[test]
    fn ambiguous_order_asks_to_check_status() {
        let text = Composer::new().tools(
            &[outcome(
                Operation::CreateOrder,
                ToolResult::failure(FailureKind::AmbiguousNonIdempotent, "timed out"),
            )],
            None,
        );

        assert!(text.contains("check your order status"));
        assert!(!text.contains("has been placed"));
    }

    #[test]
    fn duplicate_explanations_collapse_and_note_is_appended() {
        let failed = ToolResult::failure(FailureKind::InvalidCredentials, "bad pin");
        let text = Composer::new().tools(
            &[
                outcome(Operation::VerifyCustomerPin, failed.clone()),
                outcome(Operation::VerifyCustomerPin, failed),
            ],
            Some("Note"),
        );

        assert_eq!(
            text,
            "I couldn't verify your account. Please check your email and PIN.\n\nNote"
        );
    }

    #[test]
    fn empty_search_results_say_so() {
        let text = Composer::new().tools(
            &[outcome(Operation::SearchProducts, ToolResult::Success(ToolPayload::text("  ")))],
            None,
        );
        assert!(text.contains("couldn't find any products"));
    }

    #[test]
    fn direct_replies() {
        let composer = Composer::new();
        assert_eq!(
            composer.direct(&DirectReply::Greeting { name: Some("ann@example.com".to_string()) }),
            "Hello ann@example.com! How can I help with your computer products today?"
        );
        assert_eq!(
            composer.direct(&DirectReply::GeneralHelp),
            "I can help with orders, products, warranties, and technical issues. What do you need?"
        );
        let entities = Entities::new().with("category", "laptop");
        assert!(composer
            .direct(&DirectReply::Clarification { entities })
            .contains("You mentioned laptop."));
        assert!(composer
            .direct(&DirectReply::SignInRequired { intent: Intent::OrderStatus })
            .starts_with("To check on your orders, please sign in"));
    }
}
