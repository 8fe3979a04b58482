//! Change event routing.
//!
//! Every entity kind follows the same three steps: resolve (upserts only),
//! mutate the cache, notify. Kinds differ only in which resolver query runs,
//! which id the cache key is built from and which dimension is reported.
//! Those differences live in [`KindRoute`]; a single handler does the rest.
//!
//! Known limitation: events for the same key are not ordered here. A stale
//! upsert that completes after a delete for the same key puts the record
//! back. Per-key ordering has to come from the delivery layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, error, warn};

use datasync_proto::{
    ChangeEvent, DimensionChange, DimensionType, EntityKind, InboundMessage, Operation,
    AGGREGATE_CHANGE_QUEUE,
};

use crate::cache::CacheStore;
use crate::error::{BackendError, Error};
use crate::metrics::{MetricsRegistry, SharedMetricsRegistry};
use crate::publish::NotificationPublisher;
use crate::resolver::EntityResolver;

/// Default timeout for a single resolver lookup.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for a single cache call.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default timeout for a single publish attempt.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of publish attempts per notification.
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Topic dimension-change notifications are published to.
    pub notification_topic: String,

    /// Bound on each resolver lookup. A timeout counts as a resolution failure.
    pub resolve_timeout: Duration,

    /// Bound on each cache call. A timeout counts as a cache store failure.
    pub cache_timeout: Duration,

    /// Bound on each publish attempt.
    pub publish_timeout: Duration,

    /// Publish attempts before a notification is dropped.
    pub publish_attempts: u32,
}

impl RouterConfig {
    pub fn new() -> Self {
        Self {
            notification_topic: AGGREGATE_CHANGE_QUEUE.to_string(),
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            publish_attempts: DEFAULT_PUBLISH_ATTEMPTS,
        }
    }

    pub fn with_notification_topic(mut self, topic: impl Into<String>) -> Self {
        self.notification_topic = topic.into();
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the publish attempt count. At least one attempt is always made.
    pub fn with_publish_attempts(mut self, attempts: u32) -> Self {
        self.publish_attempts = attempts.max(1);
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Which event id a kind's cache key and notification are built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// The changed record's own id.
    Entity,
    /// The owning product's id.
    Owner,
}

/// Per-kind routing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindRoute {
    /// Resolver query to run on upsert.
    pub query: EntityKind,
    pub key_source: KeySource,
    pub dim_type: DimensionType,
}

impl KindRoute {
    /// Routing table entry for a kind.
    pub const fn for_kind(kind: EntityKind) -> Self {
        let (key_source, dim_type) = match kind {
            EntityKind::Brand => (KeySource::Entity, DimensionType::Brand),
            EntityKind::Category => (KeySource::Entity, DimensionType::Category),
            EntityKind::Product => (KeySource::Entity, DimensionType::Product),
            EntityKind::ProductIntro => (KeySource::Owner, DimensionType::Product),
            EntityKind::ProductProperty => (KeySource::Owner, DimensionType::Product),
            EntityKind::ProductSpecification => (KeySource::Owner, DimensionType::Product),
        };
        Self {
            query: kind,
            key_source,
            dim_type,
        }
    }

    /// The id used both as cache key suffix and notification id.
    pub fn key_id(&self, event: &ChangeEvent) -> Result<i64, Error> {
        match self.key_source {
            KeySource::Entity => Ok(event.entity_id),
            KeySource::Owner => event
                .owner_id
                .ok_or_else(|| Error::Parse(datasync_proto::Error::MissingField("product_id"))),
        }
    }
}

/// Cache key for a kind and key id, e.g. `product_intro_99`.
pub fn cache_key(kind: EntityKind, id: i64) -> String {
    format!("{}_{}", kind.as_str(), id)
}

/// What the router did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEffect {
    /// A fresh snapshot was written.
    Stored,
    /// The key was removed (or was already absent).
    Removed,
    /// Unrecognized operation; the cache was left alone.
    Skipped,
}

/// A change that went through the cache step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub kind: EntityKind,
    pub operation: Operation,
    pub key: String,
    pub effect: CacheEffect,
    pub notification: DimensionChange,
    /// False when every publish attempt failed.
    pub notified: bool,
}

/// Successful routing outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Applied(AppliedChange),
    /// Entity kind not handled by this relay; nothing was touched.
    Ignored { data_type: String },
}

/// Routes change events into the cache and out to dimension consumers.
///
/// Holds no per-event state, so one router can be shared across any number
/// of concurrent tasks.
pub struct ChangeRouter {
    resolver: Arc<dyn EntityResolver>,
    cache: Arc<dyn CacheStore>,
    publisher: Arc<dyn NotificationPublisher>,
    config: RouterConfig,
    metrics: SharedMetricsRegistry,
}

impl ChangeRouter {
    /// Create a router with its own metrics registry.
    pub fn new(
        resolver: Arc<dyn EntityResolver>,
        cache: Arc<dyn CacheStore>,
        publisher: Arc<dyn NotificationPublisher>,
        config: RouterConfig,
    ) -> Self {
        Self::with_metrics(
            resolver,
            cache,
            publisher,
            config,
            Arc::new(MetricsRegistry::new()),
        )
    }

    /// Create a router that records into a shared metrics registry.
    pub fn with_metrics(
        resolver: Arc<dyn EntityResolver>,
        cache: Arc<dyn CacheStore>,
        publisher: Arc<dyn NotificationPublisher>,
        config: RouterConfig,
        metrics: SharedMetricsRegistry,
    ) -> Self {
        Self {
            resolver,
            cache,
            publisher,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SharedMetricsRegistry {
        &self.metrics
    }

    /// Route one raw inbound message.
    ///
    /// Unknown entity kinds return [`RouteOutcome::Ignored`]. Errors mean the
    /// event failed and, apart from [`Error::Parse`], may succeed if redelivered.
    pub async fn route(&self, raw: &str) -> Result<RouteOutcome, Error> {
        let start = Instant::now();
        self.metrics.record_received();

        let result = match InboundMessage::parse(raw) {
            Ok(InboundMessage::Change(event)) => {
                self.apply(&event).await.map(RouteOutcome::Applied)
            }
            Ok(InboundMessage::UnknownKind { data_type }) => {
                debug!(data_type = %data_type, "ignoring unknown entity kind");
                Ok(RouteOutcome::Ignored { data_type })
            }
            Err(e) => Err(Error::Parse(e)),
        };

        let elapsed_us = start.elapsed().as_micros() as u64;
        match &result {
            Ok(RouteOutcome::Applied(change)) => {
                self.metrics
                    .record_applied(change.kind, change.operation, elapsed_us)
            }
            Ok(RouteOutcome::Ignored { .. }) => self.metrics.record_ignored(),
            Err(e) => {
                self.metrics.record_failure(e, elapsed_us);
                match e {
                    Error::Parse(_) | Error::CacheStore { .. } => {
                        error!(error = %e, reason = e.kind_label(), "change event failed")
                    }
                    _ => warn!(error = %e, reason = e.kind_label(), "change event failed"),
                }
            }
        }

        result
    }

    /// Apply an already classified event.
    pub async fn apply(&self, event: &ChangeEvent) -> Result<AppliedChange, Error> {
        let route = KindRoute::for_kind(event.kind);
        let key_id = route.key_id(event)?;
        let key = cache_key(event.kind, key_id);

        let effect = match event.operation {
            Operation::Create | Operation::Update => {
                let record = self.resolve(route.query, event.entity_id).await?;
                self.cache_set(&key, &record).await?;
                CacheEffect::Stored
            }
            Operation::Delete => {
                self.cache_delete(&key).await?;
                CacheEffect::Removed
            }
            Operation::Unrecognized => {
                // Consumers are still notified; kept pending a product decision.
                warn!(
                    kind = %event.kind,
                    id = event.entity_id,
                    "unrecognized operation, cache untouched"
                );
                CacheEffect::Skipped
            }
        };

        let notification = DimensionChange::new(route.dim_type, key_id);
        let notified = self.notify(&notification).await;

        debug!(
            kind = %event.kind,
            operation = %event.operation,
            key = %key,
            effect = ?effect,
            dim_type = %notification.dim_type,
            notified,
            "change event applied"
        );

        Ok(AppliedChange {
            kind: event.kind,
            operation: event.operation,
            key,
            effect,
            notification,
            notified,
        })
    }

    /// Fetch the current record from the source of truth.
    ///
    /// The body is checked to be a JSON object and then stored exactly as
    /// returned, so numbers keep the precision the source gave them.
    async fn resolve(&self, kind: EntityKind, id: i64) -> Result<String, Error> {
        let failure = |reason: String| Error::Resolution { kind, id, reason };

        let lookup = timeout(self.config.resolve_timeout, self.resolver.resolve(kind, id));
        let representation = match lookup.await {
            Err(_) => {
                return Err(failure(format!(
                    "timed out after {}ms",
                    self.config.resolve_timeout.as_millis()
                )))
            }
            Ok(Err(e)) => return Err(failure(e.to_string())),
            Ok(Ok(None)) => return Err(failure("record not found".to_string())),
            Ok(Ok(Some(representation))) => representation,
        };

        let body = representation.trim();
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| failure(format!("unparseable representation: {}", e)))?;
        match value {
            serde_json::Value::Null => Err(failure("record not found".to_string())),
            serde_json::Value::Object(_) => Ok(body.to_string()),
            other => Err(failure(format!("expected a JSON object, got {}", other))),
        }
    }

    async fn cache_set(&self, key: &str, value: &str) -> Result<(), Error> {
        let result = timeout(self.config.cache_timeout, self.cache.set(key, value)).await;
        self.check_cache(key, result)
    }

    async fn cache_delete(&self, key: &str) -> Result<(), Error> {
        let result = timeout(self.config.cache_timeout, self.cache.delete(key)).await;
        self.check_cache(key, result)
    }

    fn check_cache(
        &self,
        key: &str,
        result: Result<Result<(), BackendError>, tokio::time::error::Elapsed>,
    ) -> Result<(), Error> {
        let reason = match result {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", self.config.cache_timeout.as_millis()),
        };
        Err(Error::CacheStore {
            key: key.to_string(),
            reason,
        })
    }

    /// Publish a notification with bounded retries. Never fails the event.
    async fn notify(&self, change: &DimensionChange) -> bool {
        let topic = &self.config.notification_topic;
        let payload = match change.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.report_publish_failure(topic, e.to_string());
                return false;
            }
        };

        let attempts = self.config.publish_attempts.max(1);
        let mut last_reason = String::new();
        for attempt in 1..=attempts {
            let publish = self.publisher.publish(topic, &payload);
            match timeout(self.config.publish_timeout, publish).await {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => last_reason = e.to_string(),
                Err(_) => {
                    last_reason = format!(
                        "timed out after {}ms",
                        self.config.publish_timeout.as_millis()
                    )
                }
            }
            debug!(
                topic = %topic,
                attempt,
                attempts,
                reason = %last_reason,
                "publish attempt failed"
            );
        }

        self.report_publish_failure(topic, last_reason);
        false
    }

    fn report_publish_failure(&self, topic: &str, reason: String) {
        self.metrics.record_publish_failure();
        let err = Error::Publish {
            topic: topic.to_string(),
            reason,
        };
        warn!(error = %err, "dropping dimension notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::publish::MemoryPublisher;
    use crate::resolver::MemoryResolver;
    use async_trait::async_trait;

    struct Fixture {
        resolver: Arc<MemoryResolver>,
        cache: Arc<MemoryCache>,
        publisher: Arc<MemoryPublisher>,
        router: ChangeRouter,
    }

    fn fixture() -> Fixture {
        fixture_with(RouterConfig::default())
    }

    fn fixture_with(config: RouterConfig) -> Fixture {
        let resolver = Arc::new(MemoryResolver::new());
        let cache = Arc::new(MemoryCache::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let router = ChangeRouter::new(resolver.clone(), cache.clone(), publisher.clone(), config);
        Fixture {
            resolver,
            cache,
            publisher,
            router,
        }
    }

    fn notifications(publisher: &MemoryPublisher) -> Vec<DimensionChange> {
        publisher
            .drain()
            .into_iter()
            .map(|message| {
                assert_eq!(message.topic, AGGREGATE_CHANGE_QUEUE);
                DimensionChange::from_payload(&message.payload).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_routing_table() {
        let expected = [
            (EntityKind::Brand, KeySource::Entity, DimensionType::Brand),
            (EntityKind::Category, KeySource::Entity, DimensionType::Category),
            (EntityKind::Product, KeySource::Entity, DimensionType::Product),
            (EntityKind::ProductIntro, KeySource::Owner, DimensionType::Product),
            (EntityKind::ProductProperty, KeySource::Owner, DimensionType::Product),
            (EntityKind::ProductSpecification, KeySource::Owner, DimensionType::Product),
        ];
        for (kind, key_source, dim_type) in expected {
            let route = KindRoute::for_kind(kind);
            assert_eq!(route.query, kind);
            assert_eq!(route.key_source, key_source);
            assert_eq!(route.dim_type, dim_type);
        }
        assert_eq!(cache_key(EntityKind::ProductIntro, 99), "product_intro_99");
    }

    #[tokio::test]
    async fn test_brand_update() {
        let f = fixture();
        f.resolver.insert(EntityKind::Brand, 42, r#"{"id":42,"name":"Acme"}"#);

        let outcome = f
            .router
            .route(r#"{"data_type":"brand","event_type":"update","id":42}"#)
            .await
            .unwrap();

        let RouteOutcome::Applied(change) = outcome else {
            panic!("expected applied outcome");
        };
        assert_eq!(change.key, "brand_42");
        assert_eq!(change.effect, CacheEffect::Stored);
        assert!(change.notified);

        let stored: serde_json::Value =
            serde_json::from_str(&f.cache.get("brand_42").unwrap()).unwrap();
        assert_eq!(stored["name"], "Acme");
        assert_eq!(f.cache.set_calls(), 1);
        assert_eq!(
            notifications(&f.publisher),
            vec![DimensionChange::new(DimensionType::Brand, 42)]
        );
    }

    #[tokio::test]
    async fn test_snapshot_is_stored_verbatim() {
        let f = fixture();
        let record =
            r#"{"id":42,"name":"Acme","price":19.90,"sku":123456789012345678901234567890}"#;
        f.resolver.insert(EntityKind::Brand, 42, format!("  {}\n", record));

        f.router
            .route(r#"{"data_type":"brand","event_type":"update","id":42}"#)
            .await
            .unwrap();

        assert_eq!(f.cache.get("brand_42").as_deref(), Some(record));
    }

    #[tokio::test]
    async fn test_child_delete_uses_owner_id() {
        let f = fixture();
        f.cache.set("product_intro_99", "{}").await.unwrap();

        f.router
            .route(r#"{"data_type":"product_intro","event_type":"delete","id":7,"product_id":99}"#)
            .await
            .unwrap();

        assert!(!f.cache.contains_key("product_intro_99"));
        assert_eq!(f.cache.delete_calls(), 1);
        assert_eq!(f.resolver.call_count(), 0);
        assert_eq!(
            notifications(&f.publisher),
            vec![DimensionChange::new(DimensionType::Product, 99)]
        );
    }

    #[tokio::test]
    async fn test_child_upsert_resolves_own_id() {
        let f = fixture();
        f.resolver.insert(EntityKind::ProductSpecification, 7, r#"{"id":7,"product_id":99}"#);

        let raw = concat!(
            r#"{"data_type":"product_specification","event_type":"add","#,
            r#""id":7,"product_id":99}"#,
        );
        f.router.route(raw).await.unwrap();

        assert!(f.cache.contains_key("product_specification_99"));
        assert!(!f.cache.contains_key("product_specification_7"));
        assert_eq!(
            notifications(&f.publisher),
            vec![DimensionChange::new(DimensionType::Product, 99)]
        );
    }

    #[tokio::test]
    async fn test_unknown_kind_has_no_effect() {
        let f = fixture();

        let outcome = f
            .router
            .route(r#"{"data_type":"warehouse","event_type":"add","id":1}"#)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RouteOutcome::Ignored {
                data_type: "warehouse".to_string()
            }
        );
        assert_eq!(f.cache.set_calls() + f.cache.delete_calls(), 0);
        assert_eq!(f.resolver.call_count(), 0);
        assert!(f.publisher.is_empty());
        assert_eq!(f.router.metrics().ignored_kinds(), 1);
    }

    #[tokio::test]
    async fn test_not_found_suppresses_everything() {
        let f = fixture();

        let err = f
            .router
            .route(r#"{"data_type":"category","event_type":"add","id":5}"#)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Resolution { kind: EntityKind::Category, id: 5, .. }));
        assert_eq!(f.cache.set_calls(), 0);
        assert!(f.publisher.is_empty());
        assert_eq!(f.router.metrics().resolution_failures(), 1);
    }

    #[tokio::test]
    async fn test_unusable_representations() {
        let f = fixture();
        f.resolver.insert(EntityKind::Product, 1, "null");
        f.resolver.insert(EntityKind::Product, 2, "<html>oops</html>");
        f.resolver.insert(EntityKind::Product, 3, "[1,2]");
        f.resolver.fail(EntityKind::Product, 4, "503 service unavailable");

        for id in 1..=4 {
            let raw = format!(r#"{{"data_type":"product","event_type":"update","id":{}}}"#, id);
            let err = f.router.route(&raw).await.unwrap_err();
            assert!(matches!(err, Error::Resolution { .. }), "id {}: {:?}", id, err);
        }

        assert_eq!(f.cache.set_calls(), 0);
        assert!(f.publisher.is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_operation_still_notifies() {
        let f = fixture();
        f.cache.set("category_3", "{}").await.unwrap();

        let outcome = f
            .router
            .route(r#"{"data_type":"category","event_type":"archive","id":3}"#)
            .await
            .unwrap();

        let RouteOutcome::Applied(change) = outcome else {
            panic!("expected applied outcome");
        };
        assert_eq!(change.effect, CacheEffect::Skipped);
        assert_eq!(f.cache.set_calls(), 1);
        assert_eq!(f.cache.delete_calls(), 0);
        assert_eq!(f.resolver.call_count(), 0);
        assert_eq!(
            notifications(&f.publisher),
            vec![DimensionChange::new(DimensionType::Category, 3)]
        );
    }

    #[tokio::test]
    async fn test_parse_error_is_surfaced() {
        let f = fixture();

        let err = f.router.route(r#"{"event_type":"add","id":1}"#).await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(!err.is_retryable());
        assert_eq!(f.router.metrics().parse_failures(), 1);
        assert!(f.publisher.is_empty());
    }

    #[tokio::test]
    async fn test_cache_failure_fails_event_without_notifying() {
        let f = fixture();
        f.resolver.insert(EntityKind::Brand, 1, r#"{"id":1}"#);
        f.cache.set_unavailable(true);

        let err = f
            .router
            .route(r#"{"data_type":"brand","event_type":"update","id":1}"#)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CacheStore { ref key, .. } if key == "brand_1"));
        assert!(f.publisher.is_empty());
        assert_eq!(f.router.metrics().cache_failures(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_event() {
        let f = fixture_with(RouterConfig::default().with_publish_attempts(2));
        f.publisher.set_unavailable(true);

        let outcome = f
            .router
            .route(r#"{"data_type":"brand","event_type":"delete","id":8}"#)
            .await
            .unwrap();

        let RouteOutcome::Applied(change) = outcome else {
            panic!("expected applied outcome");
        };
        assert!(!change.notified);
        assert_eq!(change.effect, CacheEffect::Removed);
        assert_eq!(f.router.metrics().publish_failures(), 1);
    }

    struct FlakyPublisher {
        inner: MemoryPublisher,
        failures_left: parking_lot::Mutex<u32>,
    }

    #[async_trait]
    impl NotificationPublisher for FlakyPublisher {
        async fn publish(&self, topic: &str, payload: &str) -> Result<(), BackendError> {
            {
                let mut left = self.failures_left.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(BackendError::new("broker busy"));
                }
            }
            self.inner.publish(topic, payload).await
        }
    }

    #[tokio::test]
    async fn test_publish_is_retried() {
        let publisher = Arc::new(FlakyPublisher {
            inner: MemoryPublisher::new(),
            failures_left: parking_lot::Mutex::new(2),
        });
        let router = ChangeRouter::new(
            Arc::new(MemoryResolver::new()),
            Arc::new(MemoryCache::new()),
            publisher.clone(),
            RouterConfig::default().with_publish_attempts(3),
        );

        let outcome = router
            .route(r#"{"data_type":"product","event_type":"delete","id":1}"#)
            .await
            .unwrap();

        let RouteOutcome::Applied(change) = outcome else {
            panic!("expected applied outcome");
        };
        assert!(change.notified);
        assert_eq!(publisher.inner.len(), 1);
        assert_eq!(router.metrics().publish_failures(), 0);
    }

    struct StalledResolver;

    #[async_trait]
    impl EntityResolver for StalledResolver {
        async fn resolve(
            &self,
            _kind: EntityKind,
            _id: i64,
        ) -> Result<Option<String>, BackendError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_resolver_timeout_is_resolution_error() {
        let cache = Arc::new(MemoryCache::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let router = ChangeRouter::new(
            Arc::new(StalledResolver),
            cache.clone(),
            publisher.clone(),
            RouterConfig::default().with_resolve_timeout(Duration::from_millis(20)),
        );

        let err = router
            .route(r#"{"data_type":"brand","event_type":"update","id":1}"#)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Resolution { ref reason, .. } if reason.contains("timed out")
        ));
        assert_eq!(cache.set_calls(), 0);
        assert!(publisher.is_empty());
    }

    #[tokio::test]
    async fn test_apply_rejects_child_without_owner() {
        let f = fixture();
        let event = ChangeEvent::new(EntityKind::ProductProperty, Operation::Delete, 7);

        let err = f.router.apply(&event).await.unwrap_err();
        assert!(matches!(err, Error::Parse(datasync_proto::Error::MissingField("product_id"))));
        assert_eq!(f.cache.delete_calls(), 0);
    }
}
