use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use supportline_core::domain::tool::{Operation, Params, ToolResult};
use tokio::time::Instant;

/// Short-lived read-through cache for catalog lookups.
///
/// Only operations that report themselves cacheable are stored, and only
/// successful results. Entries older than the TTL are treated as absent.
pub struct ResultCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedResult>>,
}

struct CachedResult {
    stored_at: Instant,
    result: ToolResult,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, operation: Operation, params: &Params) -> Option<ToolResult> {
        if !operation.cacheable() {
            return None;
        }

        let key = cache_key(operation, params);
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };

        match entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.result.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn store(&self, operation: Operation, params: &Params, result: &ToolResult) {
        if !operation.cacheable() || !result.is_success() {
            return;
        }

        let entry = CachedResult { stored_at: Instant::now(), result: result.clone() };
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|_, cached| cached.stored_at.elapsed() < self.ttl);
        entries.insert(cache_key(operation, params), entry);
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cache_key(operation: Operation, params: &Params) -> String {
    let params = serde_json::to_string(params).unwrap_or_default();
    format!("{}:{params}", operation.name())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use supportline_core::domain::tool::{FailureKind, Operation, Params, ToolPayload, ToolResult};

    use super::ResultCache;

    fn query(text: &str) -> Params {
        Params::from([("query".to_string(), json!(text))])
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = ResultCache::new(Duration::from_secs(60));
        let result = ToolResult::Success(ToolPayload::text("Found 2 products"));

        cache.store(Operation::SearchProducts, &query("laptop"), &result);
        assert_eq!(cache.get(Operation::SearchProducts, &query("laptop")), Some(result));
        assert_eq!(cache.get(Operation::SearchProducts, &query("monitor")), None);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(Operation::SearchProducts, &query("laptop")), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_cacheable_successes_are_stored() {
        let cache = ResultCache::new(Duration::from_secs(60));
        let customer = Params::from([("customer_id".to_string(), json!("c-1"))]);

        cache.store(
            Operation::ListOrders,
            &customer,
            &ToolResult::Success(ToolPayload::text("3 orders")),
        );
        cache.store(
            Operation::SearchProducts,
            &query("laptop"),
            &ToolResult::failure(FailureKind::Timeout, "slow"),
        );

        assert!(cache.is_empty());
        assert_eq!(cache.get(Operation::ListOrders, &customer), None);
    }
}
