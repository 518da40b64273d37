use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "supportline.toml";
pub const ENV_PREFIX: &str = "SUPPORTLINE_";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub capability: CapabilityConfig,
    pub intent: IntentConfig,
    pub streaming: StreamingConfig,
    pub orders: OrdersConfig,
    pub server: ServerConfig,
    pub trace: TraceConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct CapabilityConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub cache_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct IntentConfig {
    pub confidence_threshold: f32,
}

#[derive(Clone, Debug)]
pub struct StreamingConfig {
    pub char_threshold: usize,
    pub word_threshold: usize,
    pub char_delay_ms: u64,
    pub word_delay_ms: u64,
    pub line_delay_ms: u64,
    pub max_items_display: usize,
    pub truncation_enabled: bool,
}

#[derive(Clone, Debug)]
pub struct OrdersConfig {
    pub placement_enabled: bool,
    pub max_quantity: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TraceConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub public_key: Option<String>,
    pub secret_key: Option<SecretString>,
    pub queue_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub capability_base_url: Option<String>,
    pub intent_confidence_threshold: Option<f32>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
                max_tokens: 150,
                temperature: 0.1,
            },
            capability: CapabilityConfig {
                base_url: String::new(),
                timeout_ms: 10_000,
                max_retries: 2,
                retry_base_delay_ms: 200,
                retry_max_delay_ms: 2_000,
                cache_ttl_secs: 60,
            },
            intent: IntentConfig { confidence_threshold: 0.7 },
            streaming: StreamingConfig {
                char_threshold: 200,
                word_threshold: 1000,
                char_delay_ms: 40,
                word_delay_ms: 80,
                line_delay_ms: 100,
                max_items_display: 8,
                truncation_enabled: true,
            },
            orders: OrdersConfig { placement_enabled: false, max_quantity: 10 },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
            },
            trace: TraceConfig {
                enabled: false,
                endpoint: None,
                public_key: None,
                secret_key: None,
                queue_capacity: 256,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().map(|key| !key.expose_secret().trim().is_empty()).unwrap_or(false)
    }
}

impl CapabilityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(capability) = patch.capability {
            if let Some(base_url) = capability.base_url {
                self.capability.base_url = base_url;
            }
            if let Some(timeout_ms) = capability.timeout_ms {
                self.capability.timeout_ms = timeout_ms;
            }
            if let Some(max_retries) = capability.max_retries {
                self.capability.max_retries = max_retries;
            }
            if let Some(delay) = capability.retry_base_delay_ms {
                self.capability.retry_base_delay_ms = delay;
            }
            if let Some(delay) = capability.retry_max_delay_ms {
                self.capability.retry_max_delay_ms = delay;
            }
            if let Some(ttl) = capability.cache_ttl_secs {
                self.capability.cache_ttl_secs = ttl;
            }
        }

        if let Some(intent) = patch.intent {
            if let Some(threshold) = intent.confidence_threshold {
                self.intent.confidence_threshold = threshold;
            }
        }

        if let Some(streaming) = patch.streaming {
            if let Some(value) = streaming.char_threshold {
                self.streaming.char_threshold = value;
            }
            if let Some(value) = streaming.word_threshold {
                self.streaming.word_threshold = value;
            }
            if let Some(value) = streaming.char_delay_ms {
                self.streaming.char_delay_ms = value;
            }
            if let Some(value) = streaming.word_delay_ms {
                self.streaming.word_delay_ms = value;
            }
            if let Some(value) = streaming.line_delay_ms {
                self.streaming.line_delay_ms = value;
            }
            if let Some(value) = streaming.max_items_display {
                self.streaming.max_items_display = value;
            }
            if let Some(value) = streaming.truncation_enabled {
                self.streaming.truncation_enabled = value;
            }
        }

        if let Some(orders) = patch.orders {
            if let Some(enabled) = orders.placement_enabled {
                self.orders.placement_enabled = enabled;
            }
            if let Some(max_quantity) = orders.max_quantity {
                self.orders.max_quantity = max_quantity;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(trace) = patch.trace {
            if let Some(enabled) = trace.enabled {
                self.trace.enabled = enabled;
            }
            if let Some(endpoint) = trace.endpoint {
                self.trace.endpoint = Some(endpoint);
            }
            if let Some(public_key) = trace.public_key {
                self.trace.public_key = Some(public_key);
            }
            if let Some(secret_key) = trace.secret_key {
                self.trace.secret_key = Some(secret_value(secret_key));
            }
            if let Some(queue_capacity) = trace.queue_capacity {
                self.trace.queue_capacity = queue_capacity;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SUPPORTLINE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        let api_key =
            read_env("SUPPORTLINE_LLM_API_KEY").or_else(|| read_env("OPENAI_API_KEY"));
        if let Some(value) = api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SUPPORTLINE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("SUPPORTLINE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SUPPORTLINE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("SUPPORTLINE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("SUPPORTLINE_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("SUPPORTLINE_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("SUPPORTLINE_CAPABILITY_BASE_URL") {
            self.capability.base_url = value;
        }
        if let Some(value) = read_env("SUPPORTLINE_CAPABILITY_TIMEOUT_MS") {
            self.capability.timeout_ms = parse_u64("SUPPORTLINE_CAPABILITY_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_CAPABILITY_MAX_RETRIES") {
            self.capability.max_retries =
                parse_u32("SUPPORTLINE_CAPABILITY_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_CAPABILITY_RETRY_BASE_DELAY_MS") {
            self.capability.retry_base_delay_ms =
                parse_u64("SUPPORTLINE_CAPABILITY_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_CAPABILITY_RETRY_MAX_DELAY_MS") {
            self.capability.retry_max_delay_ms =
                parse_u64("SUPPORTLINE_CAPABILITY_RETRY_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_CAPABILITY_CACHE_TTL_SECS") {
            self.capability.cache_ttl_secs =
                parse_u64("SUPPORTLINE_CAPABILITY_CACHE_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("SUPPORTLINE_INTENT_CONFIDENCE_THRESHOLD") {
            self.intent.confidence_threshold =
                parse_f32("SUPPORTLINE_INTENT_CONFIDENCE_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("SUPPORTLINE_STREAMING_CHAR_THRESHOLD") {
            self.streaming.char_threshold =
                parse_usize("SUPPORTLINE_STREAMING_CHAR_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_STREAMING_WORD_THRESHOLD") {
            self.streaming.word_threshold =
                parse_usize("SUPPORTLINE_STREAMING_WORD_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_STREAMING_CHAR_DELAY_MS") {
            self.streaming.char_delay_ms =
                parse_u64("SUPPORTLINE_STREAMING_CHAR_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_STREAMING_WORD_DELAY_MS") {
            self.streaming.word_delay_ms =
                parse_u64("SUPPORTLINE_STREAMING_WORD_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_STREAMING_LINE_DELAY_MS") {
            self.streaming.line_delay_ms =
                parse_u64("SUPPORTLINE_STREAMING_LINE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_STREAMING_MAX_ITEMS_DISPLAY") {
            self.streaming.max_items_display =
                parse_usize("SUPPORTLINE_STREAMING_MAX_ITEMS_DISPLAY", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_STREAMING_TRUNCATION_ENABLED") {
            self.streaming.truncation_enabled =
                parse_bool("SUPPORTLINE_STREAMING_TRUNCATION_ENABLED", &value)?;
        }

        if let Some(value) = read_env("SUPPORTLINE_ORDERS_PLACEMENT_ENABLED") {
            self.orders.placement_enabled =
                parse_bool("SUPPORTLINE_ORDERS_PLACEMENT_ENABLED", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_ORDERS_MAX_QUANTITY") {
            self.orders.max_quantity = parse_u64("SUPPORTLINE_ORDERS_MAX_QUANTITY", &value)?;
        }

        if let Some(value) = read_env("SUPPORTLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SUPPORTLINE_SERVER_PORT") {
            self.server.port = parse_u16("SUPPORTLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SUPPORTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("SUPPORTLINE_TRACE_ENABLED") {
            self.trace.enabled = parse_bool("SUPPORTLINE_TRACE_ENABLED", &value)?;
        }
        if let Some(value) = read_env("SUPPORTLINE_TRACE_ENDPOINT") {
            self.trace.endpoint = Some(value);
        }
        if let Some(value) = read_env("SUPPORTLINE_TRACE_PUBLIC_KEY") {
            self.trace.public_key = Some(value);
        }
        if let Some(value) = read_env("SUPPORTLINE_TRACE_SECRET_KEY") {
            self.trace.secret_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SUPPORTLINE_TRACE_QUEUE_CAPACITY") {
            self.trace.queue_capacity = parse_usize("SUPPORTLINE_TRACE_QUEUE_CAPACITY", &value)?;
        }

        let log_level =
            read_env("SUPPORTLINE_LOGGING_LEVEL").or_else(|| read_env("SUPPORTLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SUPPORTLINE_LOGGING_FORMAT").or_else(|| read_env("SUPPORTLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(base_url) = overrides.capability_base_url {
            self.capability.base_url = base_url;
        }
        if let Some(threshold) = overrides.intent_confidence_threshold {
            self.intent.confidence_threshold = threshold;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_capability(&self.capability)?;
        validate_intent(&self.intent)?;
        validate_streaming(&self.streaming)?;
        validate_orders(&self.orders)?;
        validate_server(&self.server)?;
        validate_trace(&self.trace)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            if !llm.has_api_key() {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider (set SUPPORTLINE_LLM_API_KEY)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_capability(capability: &CapabilityConfig) -> Result<(), ConfigError> {
    let base_url = capability.base_url.trim();
    if base_url.is_empty() {
        return Err(ConfigError::Validation(
            "capability.base_url is required (set SUPPORTLINE_CAPABILITY_BASE_URL)".to_string(),
        ));
    }
    if !is_http_url(base_url) {
        return Err(ConfigError::Validation(
            "capability.base_url must start with http:// or https://".to_string(),
        ));
    }

    if capability.timeout_ms == 0 || capability.timeout_ms > 120_000 {
        return Err(ConfigError::Validation(
            "capability.timeout_ms must be in range 1..=120000".to_string(),
        ));
    }

    if capability.retry_base_delay_ms > capability.retry_max_delay_ms {
        return Err(ConfigError::Validation(
            "capability.retry_base_delay_ms must not exceed capability.retry_max_delay_ms"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_intent(intent: &IntentConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&intent.confidence_threshold) {
        return Err(ConfigError::Validation(
            "intent.confidence_threshold must be within 0.0..=1.0".to_string(),
        ));
    }
    Ok(())
}

fn validate_streaming(streaming: &StreamingConfig) -> Result<(), ConfigError> {
    if streaming.word_threshold <= streaming.char_threshold {
        return Err(ConfigError::Validation(
            "streaming.word_threshold must be greater than streaming.char_threshold".to_string(),
        ));
    }

    if streaming.max_items_display == 0 {
        return Err(ConfigError::Validation(
            "streaming.max_items_display must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_orders(orders: &OrdersConfig) -> Result<(), ConfigError> {
    if orders.max_quantity == 0 {
        return Err(ConfigError::Validation(
            "orders.max_quantity must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_trace(trace: &TraceConfig) -> Result<(), ConfigError> {
    if trace.queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "trace.queue_capacity must be greater than zero".to_string(),
        ));
    }

    if trace.enabled {
        match trace.endpoint.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(ConfigError::Validation(
                    "trace.enabled is true but trace.endpoint is not configured".to_string(),
                ));
            }
            Some(endpoint) if !is_http_url(endpoint) => {
                return Err(ConfigError::Validation(
                    "trace.endpoint must start with http:// or https://".to_string(),
                ));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .ok_or_else(|| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid_override(key, value)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    capability: Option<CapabilityPatch>,
    intent: Option<IntentPatch>,
    streaming: Option<StreamingPatch>,
    orders: Option<OrdersPatch>,
    server: Option<ServerPatch>,
    trace: Option<TracePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct CapabilityPatch {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct IntentPatch {
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamingPatch {
    char_threshold: Option<usize>,
    word_threshold: Option<usize>,
    char_delay_ms: Option<u64>,
    word_delay_ms: Option<u64>,
    line_delay_ms: Option<u64>,
    max_items_display: Option<usize>,
    truncation_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct OrdersPatch {
    placement_enabled: Option<bool>,
    max_quantity: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TracePatch {
    enabled: Option<bool>,
    endpoint: Option<String>,
    public_key: Option<String>,
    secret_key: Option<String>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const BASE_VARS: [&str; 2] = ["SUPPORTLINE_LLM_API_KEY", "SUPPORTLINE_CAPABILITY_BASE_URL"];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn set_base_vars() {
        env::set_var("SUPPORTLINE_LLM_API_KEY", "sk-test-key");
        env::set_var("SUPPORTLINE_CAPABILITY_BASE_URL", "http://localhost:9000/mcp");
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_documented_values() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_base_vars();

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.model == "gpt-4o-mini", "default model should be gpt-4o-mini")?;
            ensure(config.llm.max_tokens == 150, "default max tokens should be 150")?;
            ensure(
                (config.intent.confidence_threshold - 0.7).abs() < f32::EPSILON,
                "default threshold should be 0.7",
            )?;
            ensure(config.streaming.char_threshold == 200, "char threshold should be 200")?;
            ensure(config.streaming.word_threshold == 1000, "word threshold should be 1000")?;
            ensure(config.streaming.max_items_display == 8, "max items should be 8")?;
            ensure(config.streaming.truncation_enabled, "truncation should default on")?;
            ensure(!config.orders.placement_enabled, "order placement should default off")?;
            ensure(config.server.port == 8000, "server port should default to 8000")?;
            Ok(())
        })();

        clear_vars(&BASE_VARS);
        result
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_SUPPORTLINE_KEY", "sk-from-env");
        env::set_var("TEST_SUPPORTLINE_PROVIDER_URL", "https://tools.example.com/mcp");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("supportline.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "${TEST_SUPPORTLINE_KEY}"

[capability]
base_url = "${TEST_SUPPORTLINE_PROVIDER_URL}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let api_key = config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string());
            ensure(
                api_key.as_deref() == Some("sk-from-env"),
                "api key should be loaded from environment",
            )?;
            ensure(
                config.capability.base_url == "https://tools.example.com/mcp",
                "provider url should be interpolated",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_SUPPORTLINE_KEY", "TEST_SUPPORTLINE_PROVIDER_URL"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("supportline.toml");
        fs::write(&path, "[llm]\napi_key = \"${SUPPORTLINE_TEST_UNSET_VARIABLE}\"\n")
            .map_err(|err| err.to_string())?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..Default::default() }) {
                Ok(_) => return Err("expected interpolation failure".to_string()),
                Err(error) => error,
            };
        ensure(
            matches!(
                error,
                ConfigError::MissingEnvInterpolation { ref var }
                    if var == "SUPPORTLINE_TEST_UNSET_VARIABLE"
            ),
            "missing variable should be named in the error",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_base_vars();
        env::set_var("SUPPORTLINE_LOG_LEVEL", "warn");
        env::set_var("SUPPORTLINE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&BASE_VARS);
        clear_vars(&["SUPPORTLINE_LOG_LEVEL", "SUPPORTLINE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_base_vars();
        env::set_var("SUPPORTLINE_STREAMING_CHAR_THRESHOLD", "120");
        env::set_var("SUPPORTLINE_LLM_MODEL", "model-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("supportline.toml");
            fs::write(
                &path,
                r#"
[llm]
model = "model-from-file"

[streaming]
char_threshold = 50
word_threshold = 600

[intent]
confidence_threshold = 0.5

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    intent_confidence_threshold: Some(0.9),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                (config.intent.confidence_threshold - 0.9).abs() < f32::EPSILON,
                "override threshold should win",
            )?;
            ensure(config.llm.model == "model-from-env", "env model should win over file")?;
            ensure(config.streaming.char_threshold == 120, "env char threshold should win")?;
            ensure(config.streaming.word_threshold == 600, "file word threshold should apply")?;
            Ok(())
        })();

        clear_vars(&BASE_VARS);
        clear_vars(&["SUPPORTLINE_STREAMING_CHAR_THRESHOLD", "SUPPORTLINE_LLM_MODEL"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SUPPORTLINE_LLM_API_KEY", "sk-test-key");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("capability.base_url")
            );
            ensure(has_message, "validation failure should mention capability.base_url")
        })();

        clear_vars(&BASE_VARS);
        result
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_base_vars();
        env::set_var("SUPPORTLINE_INTENT_CONFIDENCE_THRESHOLD", "1.5");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("threshold 1.5 should be rejected".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message)
                        if message.contains("intent.confidence_threshold")
                ),
                "validation failure should mention the threshold",
            )
        })();

        clear_vars(&BASE_VARS);
        clear_vars(&["SUPPORTLINE_INTENT_CONFIDENCE_THRESHOLD"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_base_vars();
        env::set_var("SUPPORTLINE_STREAMING_WORD_DELAY_MS", "fast");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("non-numeric delay should be rejected".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "SUPPORTLINE_STREAMING_WORD_DELAY_MS"
                ),
                "invalid override should name the variable",
            )
        })();

        clear_vars(&BASE_VARS);
        clear_vars(&["SUPPORTLINE_STREAMING_WORD_DELAY_MS"]);
        result
    }

    #[test]
    fn ollama_provider_needs_base_url_but_no_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SUPPORTLINE_CAPABILITY_BASE_URL", "http://localhost:9000/mcp");
        env::set_var("SUPPORTLINE_LLM_PROVIDER", "ollama");
        env::set_var("SUPPORTLINE_LLM_BASE_URL", "http://localhost:11434/v1");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.llm.provider == LlmProvider::Ollama, "provider should be ollama")?;
            ensure(!config.llm.has_api_key(), "ollama should load without an api key")
        })();

        clear_vars(&BASE_VARS);
        clear_vars(&["SUPPORTLINE_LLM_PROVIDER", "SUPPORTLINE_LLM_BASE_URL"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SUPPORTLINE_LLM_API_KEY", "sk-secret-value");
        env::set_var("SUPPORTLINE_CAPABILITY_BASE_URL", "http://localhost:9000/mcp");
        env::set_var("SUPPORTLINE_TRACE_SECRET_KEY", "trace-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                !debug.contains("trace-secret-value"),
                "debug output should not contain trace secret",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&BASE_VARS);
        clear_vars(&["SUPPORTLINE_TRACE_SECRET_KEY"]);
        result
    }
}
