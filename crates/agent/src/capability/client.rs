use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use supportline_core::config::CapabilityConfig;
use supportline_core::domain::tool::{FailureKind, ToolInvocation, ToolResult};
use tracing::{debug, warn};

use super::cache::ResultCache;
use super::retry::{RetryDecision, RetryPolicy};
use super::transport::CapabilityTransport;
use super::{CapabilityClient, CapabilityError};

/// Catalog validation, per-call deadline, retries and the read-through cache
/// layered over a transport.
pub struct ResilientCapabilityClient {
    transport: Arc<dyn CapabilityTransport>,
    retry: RetryPolicy,
    call_timeout: Duration,
    cache: Option<ResultCache>,
}

impl ResilientCapabilityClient {
    pub fn new(
        transport: Arc<dyn CapabilityTransport>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self { transport, retry, call_timeout, cache: None }
    }

    pub fn from_config(
        transport: Arc<dyn CapabilityTransport>,
        config: &CapabilityConfig,
    ) -> Self {
        let client = Self::new(transport, RetryPolicy::from(config), config.timeout());
        match config.cache_ttl() {
            Some(ttl) => client.with_cache(ResultCache::new(ttl)),
            None => client,
        }
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }
}

#[async_trait]
impl CapabilityClient for ResilientCapabilityClient {
    async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolResult, CapabilityError> {
        let operation = invocation
            .resolve()
            .ok_or_else(|| CapabilityError::UnknownOperation(invocation.operation.clone()))?;

        if let Err(message) = operation.check_params(&invocation.params) {
            return Ok(ToolResult::failure(FailureKind::Validation, message));
        }

        if let Some(cached) =
            self.cache.as_ref().and_then(|cache| cache.get(operation, &invocation.params))
        {
            debug!(operation = operation.name(), "capability cache hit");
            return Ok(cached);
        }

        let idempotency = operation.idempotency();
        let mut attempt = 0_u32;
        let result = loop {
            let result = match tokio::time::timeout(
                self.call_timeout,
                self.transport.call(operation, &invocation.params),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => ToolResult::failure(
                    FailureKind::Timeout,
                    format!("no reply within {} ms", self.call_timeout.as_millis()),
                ),
            };

            match self.retry.decide(idempotency, &result, attempt) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        operation = operation.name(),
                        attempt,
                        max_retries = self.retry.max_retries,
                        failure_kind = result.failure_kind().map(|kind| kind.as_str()),
                        delay_ms = delay.as_millis() as u64,
                        "transient capability failure; retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                RetryDecision::Stop => break self.retry.settle(idempotency, result),
            }
        };

        if let Some(cache) = &self.cache {
            cache.store(operation, &invocation.params, &result);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use supportline_core::domain::tool::{
        FailureKind, Operation, Params, ToolInvocation, ToolPayload, ToolResult,
    };

    use super::ResilientCapabilityClient;
    use crate::capability::cache::ResultCache;
    use crate::capability::retry::RetryPolicy;
    use crate::capability::transport::CapabilityTransport;
    use crate::capability::{CapabilityClient, CapabilityError};

    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<ToolResult>>,
        calls: Mutex<Vec<Operation>>,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn with_replies(replies: Vec<ToolResult>) -> Self {
            Self { replies: Mutex::new(replies.into()), ..Self::default() }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().expect("lock").len()
        }
    }

    #[async_trait]
    impl CapabilityTransport for ScriptedTransport {
        async fn call(&self, operation: Operation, _params: &Params) -> ToolResult {
            self.calls.lock().expect("lock").push(operation);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| ToolResult::Success(ToolPayload::text("default")))
        }
    }

    fn client(transport: Arc<ScriptedTransport>, retries: u32) -> ResilientCapabilityClient {
        ResilientCapabilityClient::new(
            transport,
            RetryPolicy::without_delay(retries),
            Duration::from_secs(5),
        )
    }

    fn search(query: &str) -> ToolInvocation {
        ToolInvocation::new(Operation::SearchProducts).with_param("query", query)
    }

    fn create_order() -> ToolInvocation {
        ToolInvocation::new(Operation::CreateOrder)
            .with_param("customer_id", "c-1")
            .with_param("product_id", "p-9")
            .with_param("quantity", 1)
    }

    #[tokio::test]
    async fn unknown_operation_is_a_contract_violation() {
        let transport = Arc::new(ScriptedTransport::default());
        let error = client(transport.clone(), 2)
            .invoke(ToolInvocation::named("delete_customer", Params::new()))
            .await
            .expect_err("unknown operation");

        assert_eq!(error, CapabilityError::UnknownOperation("delete_customer".to_string()));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn invalid_params_fail_validation_without_remote_call() {
        let transport = Arc::new(ScriptedTransport::default());
        let result = client(transport.clone(), 2)
            .invoke(ToolInvocation::new(Operation::GetOrder))
            .await
            .expect("expected failure result");

        assert_eq!(result.failure_kind(), Some(FailureKind::Validation));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let transport = Arc::new(ScriptedTransport::with_replies(vec![
            ToolResult::failure(FailureKind::Transient, "503"),
            ToolResult::failure(FailureKind::Unreachable, "refused"),
            ToolResult::Success(ToolPayload::text("Found 1 product")),
        ]));

        let result = client(transport.clone(), 2).invoke(search("laptop")).await.expect("invoke");
        assert!(result.is_success());
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let transport = Arc::new(ScriptedTransport::with_replies(vec![
            ToolResult::failure(FailureKind::Transient, "503"),
            ToolResult::failure(FailureKind::Transient, "503"),
            ToolResult::failure(FailureKind::Transient, "503"),
            ToolResult::Success(ToolPayload::text("too late")),
        ]));

        let result = client(transport.clone(), 2).invoke(search("laptop")).await.expect("invoke");
        assert_eq!(result.failure_kind(), Some(FailureKind::Transient));
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::with_replies(vec![ToolResult::failure(
            FailureKind::NotFound,
            "Order not found",
        )]));

        let result = client(transport.clone(), 3)
            .invoke(ToolInvocation::new(Operation::GetOrder).with_param("order_id", "o-404"))
            .await
            .expect("invoke");
        assert_eq!(result.failure_kind(), Some(FailureKind::NotFound));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn order_creation_is_never_retried_and_reports_ambiguity() {
        let transport = Arc::new(ScriptedTransport::with_replies(vec![ToolResult::failure(
            FailureKind::Transient,
            "502 from upstream",
        )]));

        let result = client(transport.clone(), 5).invoke(create_order()).await.expect("invoke");
        assert_eq!(result.failure_kind(), Some(FailureKind::AmbiguousNonIdempotent));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out_per_attempt() {
        let transport =
            Arc::new(ScriptedTransport { delay: Duration::from_secs(30), ..Default::default() });
        let client = ResilientCapabilityClient::new(
            transport.clone(),
            RetryPolicy::without_delay(1),
            Duration::from_secs(2),
        );

        let result = client.invoke(search("laptop")).await.expect("invoke");
        assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn cacheable_reads_are_served_from_cache() {
        let transport = Arc::new(ScriptedTransport::default());
        let client =
            client(transport.clone(), 0).with_cache(ResultCache::new(Duration::from_secs(60)));

        client.invoke(search("laptop")).await.expect("first");
        client.invoke(search("laptop")).await.expect("second");
        client.invoke(create_order()).await.expect("order");
        client.invoke(create_order()).await.expect("order again");

        assert_eq!(transport.call_count(), 3);
    }
}
