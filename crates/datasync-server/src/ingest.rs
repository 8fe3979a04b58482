//! Ingest processing.
//!
//! Bridges raw inbound payloads from the transport to the [`ChangeRouter`].
//! Each payload is routed on its own task, bounded by a semaphore, so one
//! slow resolver lookup never holds up unrelated events.
//!
//! Failures the router marks retryable (resolution and cache store) are
//! routed again after a growing delay, up to `max_redeliveries` times. Parse
//! failures are never retried. Whatever is still failing afterwards goes to
//! the dead-letter topic when one is configured, and the final
//! [`Disposition`] is reported back to transports that acknowledge messages.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use datasync_core::{ChangeRouter, Error, NotificationPublisher};

/// Upper bound on events routed concurrently.
pub const MAX_CONCURRENCY: usize = 65_536;

/// Ingest processor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    /// Capacity of the channel between the transport and the processor.
    pub channel_capacity: usize,
    /// Maximum events routed concurrently.
    pub concurrency: usize,
    /// Redeliveries of an event that failed with a retryable error.
    pub max_redeliveries: u32,
    /// Base delay between redeliveries, multiplied by the attempt number.
    pub redelivery_backoff: Duration,
}

impl IngestConfig {
    pub fn new() -> Self {
        Self {
            channel_capacity: 1024,
            concurrency: 16,
            max_redeliveries: 3,
            redelivery_backoff: Duration::from_millis(200),
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }

    pub fn with_max_redeliveries(mut self, redeliveries: u32) -> Self {
        self.max_redeliveries = redeliveries;
        self
    }

    pub fn with_redelivery_backoff(mut self, backoff: Duration) -> Self {
        self.redelivery_backoff = backoff;
        self
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Final state of one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Routed, or ignored as an unknown kind.
    Completed,
    /// Failed and forwarded to the dead-letter topic.
    DeadLettered,
    /// Failed and not forwarded anywhere.
    Failed {
        reason: &'static str,
        retryable: bool,
    },
}

/// A payload on its way to the processor.
#[derive(Debug)]
pub struct Inbound {
    payload: Vec<u8>,
    settled: Option<oneshot::Sender<Disposition>>,
}

impl Inbound {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            settled: None,
        }
    }

    /// A payload whose disposition is reported on the returned receiver.
    pub fn tracked(payload: Vec<u8>) -> (Self, oneshot::Receiver<Disposition>) {
        let (tx, rx) = oneshot::channel();
        let inbound = Self {
            payload,
            settled: Some(tx),
        };
        (inbound, rx)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Split into the payload and the settlement sender, if tracked.
    pub fn into_parts(self) -> (Vec<u8>, Option<oneshot::Sender<Disposition>>) {
        (self.payload, self.settled)
    }
}

impl From<Vec<u8>> for Inbound {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

/// Forwards payloads that failed to route to a separate topic.
pub struct DeadLetter {
    publisher: Arc<dyn NotificationPublisher>,
    topic: String,
}

impl DeadLetter {
    pub fn new(publisher: Arc<dyn NotificationPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Build the dead-letter body for a failed payload.
    pub fn envelope(error: &Error, payload: &str) -> String {
        json!({
            "reason": error.kind_label(),
            "error": error.to_string(),
            "payload": payload,
        })
        .to_string()
    }

    /// Publish a failed payload. Returns true if the publisher accepted it.
    pub async fn forward(&self, error: &Error, payload: &str) -> bool {
        let body = Self::envelope(error, payload);
        match self.publisher.publish(&self.topic, &body).await {
            Ok(()) => true,
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "failed to dead-letter payload");
                false
            }
        }
    }
}

/// Ingest channel sender.
pub type IngestSender = mpsc::Sender<Inbound>;

/// Ingest channel receiver.
pub type IngestReceiver = mpsc::Receiver<Inbound>;

/// Create a new ingest channel with the given buffer size.
pub fn channel(buffer_size: usize) -> (IngestSender, IngestReceiver) {
    mpsc::channel(buffer_size.max(1))
}

/// Routes payloads received on the ingest channel.
pub struct IngestProcessor {
    rx: IngestReceiver,
    router: Arc<ChangeRouter>,
    dead_letter: Option<Arc<DeadLetter>>,
    limit: Arc<Semaphore>,
    permits: u32,
    config: IngestConfig,
}

impl IngestProcessor {
    pub fn new(rx: IngestReceiver, router: Arc<ChangeRouter>, config: IngestConfig) -> Self {
        let concurrency = config.concurrency.clamp(1, MAX_CONCURRENCY);
        let permits = u32::try_from(concurrency).unwrap_or(u32::MAX);
        Self {
            rx,
            router,
            dead_letter: None,
            limit: Arc::new(Semaphore::new(permits as usize)),
            permits,
            config,
        }
    }

    pub fn with_dead_letter(mut self, dead_letter: DeadLetter) -> Self {
        self.dead_letter = Some(Arc::new(dead_letter));
        self
    }

    /// Run until the channel is closed, then wait for in-flight events.
    pub async fn run(mut self) {
        info!(
            concurrency = self.permits,
            max_redeliveries = self.config.max_redeliveries,
            "ingest processor started"
        );

        while let Some(inbound) = self.rx.recv().await {
            let permit = match self.limit.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let router = self.router.clone();
            let dead_letter = self.dead_letter.clone();
            let config = self.config;

            tokio::spawn(async move {
                let (payload, settled) = inbound.into_parts();
                let disposition =
                    process_payload(&router, dead_letter.as_deref(), &config, payload).await;
                if let Some(settled) = settled {
                    let _ = settled.send(disposition);
                }
                drop(permit);
            });
        }

        // Every permit back means every spawned event has finished.
        if self.limit.acquire_many(self.permits).await.is_ok() {
            debug!("in-flight events drained");
        }

        info!("ingest processor stopped (channel closed)");
    }
}

async fn process_payload(
    router: &ChangeRouter,
    dead_letter: Option<&DeadLetter>,
    config: &IngestConfig,
    payload: Vec<u8>,
) -> Disposition {
    let raw = match String::from_utf8(payload) {
        Ok(raw) => raw,
        Err(e) => {
            let metrics = router.metrics();
            metrics.record_received();
            let err = Error::Parse(datasync_proto::Error::Malformed(format!(
                "payload is not valid UTF-8: {}",
                e.utf8_error()
            )));
            metrics.record_failure(&err, 0);
            error!(error = %err, "dropping change event");

            let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
            return settle_failure(router, dead_letter, &err, &lossy).await;
        }
    };

    // The router logs and counts each failed attempt itself.
    let mut redeliveries = 0;
    loop {
        match router.route(&raw).await {
            Ok(_) => return Disposition::Completed,
            Err(err) if err.is_retryable() && redeliveries < config.max_redeliveries => {
                redeliveries += 1;
                router.metrics().record_redelivery();
                let delay = config.redelivery_backoff * redeliveries;
                debug!(
                    reason = err.kind_label(),
                    redelivery = redeliveries,
                    delay_ms = delay.as_millis() as u64,
                    "redelivering change event"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return settle_failure(router, dead_letter, &err, &raw).await,
        }
    }
}

async fn settle_failure(
    router: &ChangeRouter,
    dead_letter: Option<&DeadLetter>,
    err: &Error,
    raw: &str,
) -> Disposition {
    if let Some(dead_letter) = dead_letter {
        if dead_letter.forward(err, raw).await {
            router.metrics().record_dead_lettered();
            return Disposition::DeadLettered;
        }
    }

    if err.is_retryable() {
        error!(error = %err, "change event not applied after redelivery");
    }
    Disposition::Failed {
        reason: err.kind_label(),
        retryable: err.is_retryable(),
    }
}

/// Handle for submitting payloads to a running processor.
pub struct IngestHandle {
    tx: IngestSender,
}

impl IngestHandle {
    pub fn new(tx: IngestSender) -> Self {
        Self { tx }
    }

    /// Submit a payload without waiting. Fails if the channel is full.
    pub fn try_send(
        &self,
        inbound: impl Into<Inbound>,
    ) -> Result<(), mpsc::error::TrySendError<Inbound>> {
        self.tx.try_send(inbound.into())
    }

    /// Submit a payload, waiting if the channel is full.
    pub async fn send(
        &self,
        inbound: impl Into<Inbound>,
    ) -> Result<(), mpsc::error::SendError<Inbound>> {
        self.tx.send(inbound.into()).await
    }

    /// Submit a payload from a thread outside the runtime.
    pub fn blocking_send(
        &self,
        inbound: impl Into<Inbound>,
    ) -> Result<(), mpsc::error::SendError<Inbound>> {
        self.tx.blocking_send(inbound.into())
    }
}

impl Clone for IngestHandle {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Start an ingest processor.
///
/// The returned task finishes once every handle is dropped and in-flight
/// events have drained.
pub fn start_processor(
    router: Arc<ChangeRouter>,
    config: IngestConfig,
    dead_letter: Option<DeadLetter>,
) -> (IngestHandle, JoinHandle<()>) {
    let (tx, rx) = channel(config.channel_capacity);
    let mut processor = IngestProcessor::new(rx, router, config);
    if let Some(dead_letter) = dead_letter {
        processor = processor.with_dead_letter(dead_letter);
    }

    let task = tokio::spawn(async move {
        processor.run().await;
    });

    (IngestHandle::new(tx), task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use datasync_core::{
        BackendError, CacheStore, MemoryCache, MemoryPublisher, MemoryResolver, RouterConfig,
    };
    use datasync_proto::{DimensionChange, EntityKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Harness {
        cache: Arc<MemoryCache>,
        publisher: Arc<MemoryPublisher>,
        router: Arc<ChangeRouter>,
    }

    fn resolver() -> Arc<MemoryResolver> {
        Arc::new(
            MemoryResolver::new()
                .with_record(EntityKind::Brand, 1, r#"{"id":1}"#)
                .with_record(EntityKind::Product, 2, r#"{"id":2}"#),
        )
    }

    fn harness() -> Harness {
        let cache = Arc::new(MemoryCache::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let router = Arc::new(ChangeRouter::new(
            resolver(),
            cache.clone(),
            publisher.clone(),
            RouterConfig::default().with_notification_topic("dims"),
        ));
        Harness {
            cache,
            publisher,
            router,
        }
    }

    fn quick_config(redeliveries: u32) -> IngestConfig {
        IngestConfig::new()
            .with_channel_capacity(8)
            .with_concurrency(4)
            .with_max_redeliveries(redeliveries)
            .with_redelivery_backoff(Duration::from_millis(1))
    }

    /// Cache that fails a fixed number of writes before recovering.
    struct RecoveringCache {
        inner: MemoryCache,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl CacheStore for RecoveringCache {
        async fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(BackendError::new("connection reset"));
            }
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), BackendError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_processor_routes_until_closed() {
        let h = harness();
        let (handle, task) = start_processor(h.router.clone(), quick_config(0), None);

        handle
            .send(br#"{"data_type":"brand","event_type":"add","id":1}"#.to_vec())
            .await
            .unwrap();
        handle
            .send(br#"{"data_type":"product","event_type":"update","id":2}"#.to_vec())
            .await
            .unwrap();
        drop(handle);
        task.await.unwrap();

        assert!(h.cache.contains_key("brand_1"));
        assert!(h.cache.contains_key("product_2"));
        let dims: Vec<DimensionChange> = h
            .publisher
            .drain()
            .iter()
            .map(|m| DimensionChange::from_payload(&m.payload).unwrap())
            .collect();
        assert_eq!(dims.len(), 2);
        assert_eq!(h.router.metrics().applied(), 2);
    }

    #[tokio::test]
    async fn test_cache_outage_is_redelivered_until_it_converges() {
        let cache = Arc::new(RecoveringCache {
            inner: MemoryCache::new(),
            failures_left: AtomicU32::new(1),
        });
        let publisher = Arc::new(MemoryPublisher::new());
        let router = Arc::new(ChangeRouter::new(
            resolver(),
            cache.clone(),
            publisher.clone(),
            RouterConfig::default(),
        ));
        let (handle, task) = start_processor(router.clone(), quick_config(3), None);

        let (inbound, settled) =
            Inbound::tracked(br#"{"data_type":"brand","event_type":"update","id":1}"#.to_vec());
        handle.send(inbound).await.unwrap();
        assert_eq!(settled.await.unwrap(), Disposition::Completed);
        drop(handle);
        task.await.unwrap();

        assert_eq!(cache.inner.get("brand_1").as_deref(), Some(r#"{"id":1}"#));
        assert_eq!(publisher.len(), 1);
        let metrics = router.metrics();
        assert_eq!(metrics.cache_failures(), 1);
        assert_eq!(metrics.redeliveries(), 1);
        assert_eq!(metrics.upserts(), 1);
    }

    #[tokio::test]
    async fn test_redelivery_is_bounded() {
        let h = harness();
        let (handle, task) = start_processor(h.router.clone(), quick_config(2), None);

        let (inbound, settled) =
            Inbound::tracked(br#"{"data_type":"brand","event_type":"update","id":77}"#.to_vec());
        handle.send(inbound).await.unwrap();
        assert_eq!(
            settled.await.unwrap(),
            Disposition::Failed {
                reason: "resolution",
                retryable: true
            }
        );
        drop(handle);
        task.await.unwrap();

        let metrics = h.router.metrics();
        assert_eq!(metrics.resolution_failures(), 3);
        assert_eq!(metrics.redeliveries(), 2);
        assert!(h.publisher.is_empty());
    }

    #[tokio::test]
    async fn test_parse_failures_are_not_redelivered() {
        let h = harness();
        let (handle, task) = start_processor(h.router.clone(), quick_config(3), None);

        let (inbound, settled) = Inbound::tracked(b"{broken".to_vec());
        handle.send(inbound).await.unwrap();
        assert_eq!(
            settled.await.unwrap(),
            Disposition::Failed {
                reason: "parse",
                retryable: false
            }
        );
        drop(handle);
        task.await.unwrap();

        assert_eq!(h.router.metrics().received(), 1);
        assert_eq!(h.router.metrics().redeliveries(), 0);
    }

    #[tokio::test]
    async fn test_failed_payloads_are_dead_lettered() {
        let h = harness();
        let dead_letters = Arc::new(MemoryPublisher::new());
        let dead_letter = DeadLetter::new(dead_letters.clone(), "dlq");
        assert_eq!(dead_letter.topic(), "dlq");

        let (handle, task) = start_processor(h.router.clone(), quick_config(2), Some(dead_letter));
        handle.send(b"{broken".to_vec()).await.unwrap();
        let (inbound, settled) =
            Inbound::tracked(br#"{"data_type":"brand","event_type":"update","id":77}"#.to_vec());
        handle.send(inbound).await.unwrap();
        handle.send(vec![0xff, 0xfe]).await.unwrap();
        // Unknown kinds are not failures.
        handle
            .send(br#"{"data_type":"hotel","event_type":"add","id":1}"#.to_vec())
            .await
            .unwrap();
        drop(handle);
        task.await.unwrap();
        assert_eq!(settled.await.unwrap(), Disposition::DeadLettered);

        let mut reasons: Vec<String> = dead_letters
            .drain()
            .into_iter()
            .map(|m| {
                assert_eq!(m.topic, "dlq");
                let body: serde_json::Value = serde_json::from_str(&m.payload).unwrap();
                assert!(body["payload"].is_string());
                body["reason"].as_str().unwrap().to_string()
            })
            .collect();
        reasons.sort();
        assert_eq!(reasons, vec!["parse", "parse", "resolution"]);

        let metrics = h.router.metrics();
        // The unresolvable brand is routed once plus two redeliveries.
        assert_eq!(metrics.received(), 6);
        assert_eq!(metrics.parse_failures(), 2);
        assert_eq!(metrics.redeliveries(), 2);
        assert_eq!(metrics.ignored_kinds(), 1);
        assert_eq!(metrics.dead_lettered(), 3);
        assert!(h.publisher.is_empty());
    }

    #[tokio::test]
    async fn test_envelope_carries_original_payload() {
        let err = Error::Resolution {
            kind: EntityKind::Brand,
            id: 9,
            reason: "record not found".to_string(),
        };
        let body: serde_json::Value =
            serde_json::from_str(&DeadLetter::envelope(&err, r#"{"id":9}"#)).unwrap();
        assert_eq!(body["reason"], "resolution");
        assert_eq!(body["payload"], r#"{"id":9}"#);
        assert!(body["error"].as_str().unwrap().contains("brand 9"));
    }

    #[tokio::test]
    async fn test_concurrency_is_clamped_to_permits() {
        let h = harness();
        let config = IngestConfig {
            concurrency: usize::MAX,
            ..quick_config(0)
        };
        let processor = IngestProcessor::new(channel(1).1, h.router, config);
        assert_eq!(processor.permits as usize, MAX_CONCURRENCY);
    }

    #[tokio::test]
    async fn test_handle_try_send_and_clone() {
        let h = harness();
        let (handle1, _task) = start_processor(h.router, quick_config(0), None);
        let handle2 = handle1.clone();

        assert!(handle1.try_send(b"{}".to_vec()).is_ok());
        assert!(handle2.try_send(Inbound::new(b"{}".to_vec())).is_ok());
    }
}
