use std::sync::Arc;

use supportline_agent::runtime::{ClassifierMode, RuntimeError, SupportRuntime};
use supportline_core::config::{AppConfig, ConfigError, LoadOptions};
use supportline_core::trace::{LogTraceSink, TraceSink};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::trace::HttpTraceSink;

pub struct Application {
    pub config: AppConfig,
    pub runtime: SupportRuntime,
    pub trace_worker: Option<JoinHandle<()>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("runtime assembly failed: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("trace exporter could not start: {0}")]
    TraceExporter(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let (trace, trace_worker) = trace_sink(&config)?;

    let runtime = SupportRuntime::from_config(&config, ClassifierMode::Llm, trace)?;
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        capability_endpoint = runtime.transport().endpoint(),
        trace_export = trace_worker.is_some(),
        "support runtime ready"
    );

    Ok(Application { config, runtime, trace_worker })
}

fn trace_sink(
    config: &AppConfig,
) -> Result<(Arc<dyn TraceSink>, Option<JoinHandle<()>>), BootstrapError> {
    let endpoint =
        config.trace.endpoint.as_deref().map(str::trim).filter(|value| !value.is_empty());
    match endpoint {
        Some(endpoint) if config.trace.enabled => {
            let (sink, worker) = HttpTraceSink::spawn(&config.trace, endpoint.to_string())
                .map_err(BootstrapError::TraceExporter)?;
            Ok((Arc::new(sink), Some(worker)))
        }
        _ => Ok((Arc::new(LogTraceSink), None)),
    }
}
