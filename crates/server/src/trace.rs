//! Best-effort export of trace records to an HTTP ingestion endpoint.
//!
//! `emit` never blocks: records go into a bounded queue and are dropped when
//! the queue is full. A background task posts them in batches; delivery
//! failures are logged and forgotten.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use supportline_core::config::TraceConfig;
use supportline_core::trace::{TraceEvent, TraceSink};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const MAX_BATCH: usize = 50;
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpTraceSink {
    queue: mpsc::Sender<TraceEvent>,
}

#[derive(Serialize)]
struct TraceBatch<'a> {
    batch: &'a [TraceEvent],
}

struct Exporter {
    http: reqwest::Client,
    endpoint: String,
    public_key: Option<String>,
    secret_key: Option<SecretString>,
}

impl HttpTraceSink {
    /// Starts the exporter task. The task ends once every sink handle is gone
    /// and the queue has drained.
    pub fn spawn(
        config: &TraceConfig,
        endpoint: String,
    ) -> Result<(Self, JoinHandle<()>), reqwest::Error> {
        let http = reqwest::Client::builder().timeout(EXPORT_TIMEOUT).build()?;
        let (queue, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let exporter = Exporter {
            http,
            endpoint,
            public_key: config.public_key.clone(),
            secret_key: config.secret_key.clone(),
        };

        let worker = tokio::spawn(exporter.run(receiver));
        Ok((Self { queue }, worker))
    }
}

impl TraceSink for HttpTraceSink {
    fn emit(&self, event: TraceEvent) {
        match self.queue.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => debug!(
                event_name = "trace.dropped",
                correlation_id = %event.turn_id,
                trace_event = %event.event_type,
                "trace queue full; record dropped"
            ),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

impl Exporter {
    async fn run(self, mut receiver: mpsc::Receiver<TraceEvent>) {
        let mut batch = Vec::with_capacity(MAX_BATCH);
        while let Some(event) = receiver.recv().await {
            batch.push(event);
            while batch.len() < MAX_BATCH {
                match receiver.try_recv() {
                    Ok(event) => batch.push(event),
                    Err(_) => break,
                }
            }
            self.post(&batch).await;
            batch.clear();
        }
    }

    async fn post(&self, batch: &[TraceEvent]) {
        let mut request = self.http.post(&self.endpoint).json(&TraceBatch { batch });
        if let Some(public_key) = &self.public_key {
            request = request.basic_auth(
                public_key,
                self.secret_key.as_ref().map(|secret| secret.expose_secret()),
            );
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(records = batch.len(), "trace batch exported");
            }
            Ok(response) => warn!(
                event_name = "trace.export_rejected",
                status = response.status().as_u16(),
                records = batch.len(),
                "trace endpoint rejected batch"
            ),
            Err(error) => warn!(
                event_name = "trace.export_failed",
                error = %error,
                records = batch.len(),
                "trace export failed"
            ),
        }
    }
}
