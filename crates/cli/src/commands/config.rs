use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use supportline_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use toml::Value;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: &'static str, value: impl ToString) -> Self {
        Self { key, env_key, value: value.to_string() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let llm_api_key = if config.llm.has_api_key() { "<redacted>" } else { "<unset>" };
    let trace_secret = if config.trace.secret_key.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        Field::new("llm.provider", "SUPPORTLINE_LLM_PROVIDER", config.llm.provider.as_str()),
        Field::new("llm.model", "SUPPORTLINE_LLM_MODEL", &config.llm.model),
        Field::new(
            "llm.base_url",
            "SUPPORTLINE_LLM_BASE_URL",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new("llm.api_key", "SUPPORTLINE_LLM_API_KEY", llm_api_key),
        Field::new(
            "capability.base_url",
            "SUPPORTLINE_CAPABILITY_BASE_URL",
            &config.capability.base_url,
        ),
        Field::new(
            "capability.timeout_ms",
            "SUPPORTLINE_CAPABILITY_TIMEOUT_MS",
            config.capability.timeout_ms,
        ),
        Field::new(
            "capability.max_retries",
            "SUPPORTLINE_CAPABILITY_MAX_RETRIES",
            config.capability.max_retries,
        ),
        Field::new(
            "intent.confidence_threshold",
            "SUPPORTLINE_INTENT_CONFIDENCE_THRESHOLD",
            config.intent.confidence_threshold,
        ),
        Field::new(
            "streaming.char_threshold",
            "SUPPORTLINE_STREAMING_CHAR_THRESHOLD",
            config.streaming.char_threshold,
        ),
        Field::new(
            "streaming.word_threshold",
            "SUPPORTLINE_STREAMING_WORD_THRESHOLD",
            config.streaming.word_threshold,
        ),
        Field::new(
            "streaming.max_items_display",
            "SUPPORTLINE_STREAMING_MAX_ITEMS_DISPLAY",
            config.streaming.max_items_display,
        ),
        Field::new(
            "orders.placement_enabled",
            "SUPPORTLINE_ORDERS_PLACEMENT_ENABLED",
            config.orders.placement_enabled,
        ),
        Field::new(
            "server.bind_address",
            "SUPPORTLINE_SERVER_BIND_ADDRESS",
            &config.server.bind_address,
        ),
        Field::new("server.port", "SUPPORTLINE_SERVER_PORT", config.server.port),
        Field::new("trace.enabled", "SUPPORTLINE_TRACE_ENABLED", config.trace.enabled),
        Field::new(
            "trace.endpoint",
            "SUPPORTLINE_TRACE_ENDPOINT",
            config.trace.endpoint.as_deref().unwrap_or("<unset>"),
        ),
        Field::new("trace.secret_key", "SUPPORTLINE_TRACE_SECRET_KEY", trace_secret),
        Field::new("logging.level", "SUPPORTLINE_LOGGING_LEVEL", &config.logging.level),
        Field::new(
            "logging.format",
            "SUPPORTLINE_LOGGING_FORMAT",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::contains_path;

    #[test]
    fn nested_keys_resolve_through_tables() {
        let doc: Value = "[capability]\nbase_url = \"http://localhost:8001/mcp\"\n"
            .parse()
            .expect("toml");

        assert!(contains_path(&doc, "capability.base_url"));
        assert!(!contains_path(&doc, "capability.timeout_ms"));
        assert!(!contains_path(&doc, "llm.model"));
    }
}
