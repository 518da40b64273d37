//! Customer-facing chat endpoints.
//!
//! - `POST /auth`                          verify email + PIN with the capability provider
//! - `POST /chat`                          run one turn, stream it as server-sent events
//! - `GET  /chat/{customer_id}?message=`   same, for an already verified customer
//! - `GET  /config`                        public, secret-free configuration
//!
//! Streams carry `chunk` events (a JSON `ResponseChunk`), at most one `error`
//! event for a failed turn, and a closing `[DONE]` data line.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use supportline_agent::capability::{CapabilityClient, CapabilityError};
use supportline_agent::composer::explain_failure;
use supportline_agent::orchestrator::{Orchestrator, OutputEvent};
use supportline_core::config::AppConfig;
use supportline_core::domain::conversation::{
    ConversationMessage, ConversationTurn, CustomerIdentity, Role, TurnId,
};
use supportline_core::domain::tool::{Operation, ToolInvocation, ToolResult};
use supportline_core::errors::{ApplicationError, DomainError, InterfaceError};
use tracing::{info, warn};

pub const DONE_MARKER: &str = "[DONE]";
const APP_TITLE: &str = "Supportline";

#[derive(Clone)]
pub struct ChatState {
    orchestrator: Arc<Orchestrator>,
    capabilities: Arc<dyn CapabilityClient>,
    public_config: Arc<PublicConfig>,
}

impl ChatState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        capabilities: Arc<dyn CapabilityClient>,
        public_config: PublicConfig,
    ) -> Self {
        Self { orchestrator, capabilities, public_config: Arc::new(public_config) }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PublicConfig {
    pub app_title: &'static str,
    pub version: &'static str,
    pub intent_threshold: f32,
    pub streaming_enabled: bool,
    pub char_threshold: usize,
    pub word_threshold: usize,
    pub max_items_display: usize,
    pub llm_provider: &'static str,
    pub mcp_server_connected: bool,
}

impl PublicConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            app_title: APP_TITLE,
            version: env!("CARGO_PKG_VERSION"),
            intent_threshold: config.intent.confidence_threshold,
            streaming_enabled: true,
            char_threshold: config.streaming.char_threshold,
            word_threshold: config.streaming.word_threshold,
            max_items_display: config.streaming.max_items_display,
            llm_provider: config.llm.provider.as_str(),
            mcp_server_connected: !config.capability.base_url.trim().is_empty(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub pin: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthResponse {
    fn rejected(message: impl Into<String>) -> Self {
        Self { success: false, customer: None, customer_id: None, message: Some(message.into()) }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CustomerRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub customer: Option<CustomerRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub message: String,
}

/// Interface error rendered as a JSON body with a matching status code.
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self(
            ApplicationError::Domain(DomainError::InvariantViolation(message.into()))
                .into_interface(TurnId::generate().as_str()),
        )
    }

    fn capability(error: CapabilityError) -> Self {
        let CapabilityError::UnknownOperation(name) = error;
        Self(
            ApplicationError::Domain(DomainError::UnknownOperation(name))
                .into_interface(TurnId::generate().as_str()),
        )
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error_class: &'static str,
    message: &'static str,
    detail: Option<String>,
    correlation_id: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = match &self.0 {
            InterfaceError::BadRequest { message, .. } => Some(message.clone()),
            _ => None,
        };
        let body = ErrorBody {
            error_class: self.0.error_class(),
            message: self.0.user_message(),
            detail,
            correlation_id: self.0.correlation_id(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: ChatState) -> Router {
    Router::new()
        .route("/auth", post(auth))
        .route("/chat", post(chat))
        .route("/chat/{customer_id}", get(chat_for_customer))
        .route("/config", get(public_config))
        .with_state(state)
}

async fn public_config(State(state): State<ChatState>) -> Json<PublicConfig> {
    Json(state.public_config.as_ref().clone())
}

async fn auth(
    State(state): State<ChatState>,
    Json(request): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (Some(email), Some(pin)) = (non_blank(request.email), non_blank(request.pin)) else {
        return Ok(Json(AuthResponse::rejected("Email and PIN are required.")));
    };

    let invocation = ToolInvocation::new(Operation::VerifyCustomerPin)
        .with_param("email", email)
        .with_param("pin", pin);
    let result = state.capabilities.invoke(invocation).await.map_err(ApiError::capability)?;

    let response = match result {
        ToolResult::Success(payload) => match payload.customer_id() {
            Some(customer_id) => AuthResponse {
                success: true,
                customer: Some(payload.text.clone()),
                customer_id: Some(customer_id.0),
                message: None,
            },
            None => AuthResponse::rejected(
                "I couldn't verify your account. Please check your email and PIN.",
            ),
        },
        ToolResult::Failure(failure) => {
            AuthResponse::rejected(explain_failure(Operation::VerifyCustomerPin, &failure))
        }
    };

    info!(
        event_name = "auth.completed",
        success = response.success,
        "customer verification finished"
    );
    Ok(Json(response))
}

async fn chat(
    State(state): State<ChatState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let customer = request.customer.map(identity).filter(|identity| {
        identity.customer_id.is_some() || identity.display_name().is_some()
    });
    let turn = build_turn(request.message, request.history, customer)?;
    Ok(stream_response(state.orchestrator.clone().stream_turn(turn)))
}

async fn chat_for_customer(
    State(state): State<ChatState>,
    Path(customer_id): Path<String>,
    Query(query): Query<ChatQuery>,
) -> Result<Response, ApiError> {
    let customer = non_blank(Some(customer_id)).map(CustomerIdentity::verified);
    let turn = build_turn(query.message, Vec::new(), customer)?;
    Ok(stream_response(state.orchestrator.clone().stream_turn(turn)))
}

fn build_turn(
    message: String,
    history: Vec<HistoryEntry>,
    customer: Option<CustomerIdentity>,
) -> Result<ConversationTurn, ApiError> {
    let Some(message) = non_blank(Some(message)) else {
        return Err(ApiError::bad_request("message must not be empty"));
    };

    let history = history
        .into_iter()
        .filter_map(|entry| {
            let role = match entry.role.trim().to_ascii_lowercase().as_str() {
                "user" | "customer" => Role::User,
                "assistant" | "bot" => Role::Assistant,
                "system" => Role::System,
                other => {
                    warn!(role = other, "ignoring history entry with unknown role");
                    return None;
                }
            };
            Some(ConversationMessage::new(role, entry.content))
        })
        .collect();

    let turn = ConversationTurn::new(message).with_history(history);
    Ok(match customer {
        Some(customer) => turn.with_customer(customer),
        None => turn,
    })
}

fn identity(request: CustomerRequest) -> CustomerIdentity {
    if let Some(customer_id) = non_blank(request.customer_id) {
        return CustomerIdentity::verified(customer_id);
    }
    match (non_blank(request.email), non_blank(request.pin)) {
        (Some(email), Some(pin)) => CustomerIdentity::with_credentials(email, pin),
        (email, _) => CustomerIdentity { email, ..CustomerIdentity::default() },
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn stream_response(events: impl Stream<Item = OutputEvent> + Send + 'static) -> Response {
    let stream = async_stream::stream! {
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            yield Ok::<Event, Infallible>(sse_event(&event));
        }
        yield Ok(Event::default().data(DONE_MARKER));
    };

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

fn sse_event(event: &OutputEvent) -> Event {
    match event {
        OutputEvent::Chunk(chunk) => {
            Event::default().event("chunk").data(serde_json::to_string(chunk).unwrap_or_default())
        }
        OutputEvent::Failed(failure) => Event::default()
            .event("error")
            .data(serde_json::to_string(failure).unwrap_or_default()),
    }
}
