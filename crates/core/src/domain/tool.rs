use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::conversation::CustomerId;

pub type Params = BTreeMap<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Text,
    Integer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec { name, kind, required: true }
}

const fn optional(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec { name, kind, required: false }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Idempotency {
    Idempotent,
    NonIdempotent,
}

/// Operations exposed by the capability provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    VerifyCustomerPin,
    GetCustomer,
    ListProducts,
    SearchProducts,
    GetProduct,
    ListOrders,
    GetOrder,
    CreateOrder,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::VerifyCustomerPin,
        Operation::GetCustomer,
        Operation::ListProducts,
        Operation::SearchProducts,
        Operation::GetProduct,
        Operation::ListOrders,
        Operation::GetOrder,
        Operation::CreateOrder,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::VerifyCustomerPin => "verify_customer_pin",
            Self::GetCustomer => "get_customer",
            Self::ListProducts => "list_products",
            Self::SearchProducts => "search_products",
            Self::GetProduct => "get_product",
            Self::ListOrders => "list_orders",
            Self::GetOrder => "get_order",
            Self::CreateOrder => "create_order",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|operation| operation.name() == name)
    }

    pub fn params(&self) -> &'static [ParamSpec] {
        use ParamKind::{Integer, Text};

        const VERIFY: [ParamSpec; 2] = [required("email", Text), required("pin", Text)];
        const CUSTOMER: [ParamSpec; 1] = [required("customer_id", Text)];
        const CATEGORY: [ParamSpec; 1] = [optional("category", Text)];
        const QUERY: [ParamSpec; 1] = [required("query", Text)];
        const PRODUCT: [ParamSpec; 1] = [required("product_id", Text)];
        const ORDER: [ParamSpec; 1] = [required("order_id", Text)];
        const CREATE: [ParamSpec; 3] = [
            required("customer_id", Text),
            required("product_id", Text),
            required("quantity", Integer),
        ];

        match self {
            Self::VerifyCustomerPin => &VERIFY,
            Self::GetCustomer | Self::ListOrders => &CUSTOMER,
            Self::ListProducts => &CATEGORY,
            Self::SearchProducts => &QUERY,
            Self::GetProduct => &PRODUCT,
            Self::GetOrder => &ORDER,
            Self::CreateOrder => &CREATE,
        }
    }

    pub fn idempotency(&self) -> Idempotency {
        match self {
            Self::CreateOrder => Idempotency::NonIdempotent,
            _ => Idempotency::Idempotent,
        }
    }

    /// Catalog reads whose results may be served from a short-lived cache.
    pub fn cacheable(&self) -> bool {
        matches!(self, Self::ListProducts | Self::SearchProducts | Self::GetProduct)
    }

    /// What the operation fetches, phrased for a customer-facing sentence.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::VerifyCustomerPin => "your account verification",
            Self::GetCustomer => "your account details",
            Self::ListProducts => "the product catalog",
            Self::SearchProducts => "product search results",
            Self::GetProduct => "the product details",
            Self::ListOrders => "your order history",
            Self::GetOrder => "the order details",
            Self::CreateOrder => "your new order",
        }
    }

    /// Checks parameter presence and types against the declared specs.
    /// Unknown extra parameters are rejected too.
    pub fn check_params(&self, params: &Params) -> Result<(), String> {
        let specs = self.params();

        for spec in specs {
            match params.get(spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(format!("missing required parameter `{}`", spec.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !kind_matches(spec.kind, value) => {
                    return Err(format!(
                        "parameter `{}` must be {}",
                        spec.name,
                        match spec.kind {
                            ParamKind::Text => "a non-empty string",
                            ParamKind::Integer => "a positive integer",
                        }
                    ));
                }
                Some(_) => {}
            }
        }

        if let Some(unknown) = params.keys().find(|key| !specs.iter().any(|spec| spec.name == *key))
        {
            return Err(format!("unexpected parameter `{unknown}` for `{}`", self.name()));
        }

        Ok(())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn kind_matches(kind: ParamKind, value: &Value) -> bool {
    match kind {
        ParamKind::Text => value.as_str().is_some_and(|text| !text.trim().is_empty()),
        ParamKind::Integer => value.as_u64().is_some_and(|number| number > 0),
    }
}

/// A request to run one capability operation.
///
/// The operation is carried by name so that requests built from untrusted
/// input (such as a model suggestion) are still checked against the catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub operation: String,
    pub params: Params,
}

impl ToolInvocation {
    pub fn new(operation: Operation) -> Self {
        Self { operation: operation.name().to_string(), params: Params::new() }
    }

    pub fn named(operation: impl Into<String>, params: Params) -> Self {
        Self { operation: operation.into(), params }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn resolve(&self) -> Option<Operation> {
        Operation::from_name(&self.operation)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Transient,
    Unreachable,
    Validation,
    NotFound,
    InvalidCredentials,
    Rejected,
    AmbiguousNonIdempotent,
    PrerequisiteFailed,
}

impl FailureKind {
    /// Network-level failures that a later attempt could plausibly fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transient | Self::Unreachable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transient => "transient",
            Self::Unreachable => "unreachable",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Rejected => "rejected",
            Self::AmbiguousNonIdempotent => "ambiguous_non_idempotent",
            Self::PrerequisiteFailed => "prerequisite_failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ToolFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// Data returned by a successful operation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
}

impl ToolPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), structured: None }
    }

    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured = Some(value);
        self
    }

    /// Customer id from a `customer_id`/`id` field of the structured value,
    /// or from an `ID: <id>` marker in the text.
    pub fn customer_id(&self) -> Option<CustomerId> {
        let structured = self.structured.as_ref().and_then(|value| {
            ["customer_id", "id"]
                .iter()
                .find_map(|key| value.get(key))
                .and_then(|id| match id {
                    Value::String(text) => Some(text.clone()),
                    Value::Number(number) => Some(number.to_string()),
                    _ => None,
                })
        });

        structured.or_else(|| id_marker(&self.text)).map(CustomerId)
    }
}

fn id_marker(text: &str) -> Option<String> {
    let (_, rest) = text.split_once("ID: ")?;
    let id: String = rest
        .chars()
        .take_while(|character| character.is_ascii_hexdigit() || *character == '-')
        .collect();
    (!id.is_empty()).then_some(id)
}

/// Indentation of the first list-style line. Entries of a listing sit at
/// this depth; anything deeper is detail belonging to the entry above it.
pub fn listing_indent(text: &str) -> Option<usize> {
    text.lines().find(|line| is_list_item(line)).map(line_indent)
}

pub fn is_listing_entry(line: &str, indent: usize) -> bool {
    is_list_item(line) && line_indent(line) == indent
}

pub fn line_indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Heuristic for catalog-style entries: bullets, numbered entries, or the
/// provider's `[id]`-tagged rows.
pub fn is_list_item(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with("- ") || trimmed.starts_with("* ") || trimmed.starts_with("• ") {
        return true;
    }

    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &trimmed[digits..];
        if rest.starts_with(". ") || rest.starts_with(") ") {
            return true;
        }
    }

    match (trimmed.find('['), trimmed.find(']')) {
        (Some(open), Some(close)) => open < close,
        _ => false,
    }
}

/// Outcome of one capability call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResult {
    Success(ToolPayload),
    Failure(ToolFailure),
}

impl ToolResult {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure(ToolFailure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn payload(&self) -> Option<&ToolPayload> {
        match self {
            Self::Success(payload) => Some(payload),
            Self::Failure(_) => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure.kind),
        }
    }
}
