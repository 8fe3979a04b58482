//! Central metrics registry for the relay.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use datasync_proto::{EntityKind, Operation};

use super::histogram::Histogram;
use crate::error::Error;

/// Counters for every routed event, split by outcome.
pub struct MetricsRegistry {
    started_at: Instant,

    received: AtomicU64,
    route_latency: Histogram,

    // Applied events
    upserts: AtomicU64,
    deletes: AtomicU64,
    unrecognized_operations: AtomicU64,
    applied_by_kind: HashMap<EntityKind, AtomicU64>,

    // Dropped and failed events
    ignored_kinds: AtomicU64,
    parse_failures: AtomicU64,
    resolution_failures: AtomicU64,
    cache_failures: AtomicU64,
    publish_failures: AtomicU64,
    redeliveries: AtomicU64,
    dead_lettered: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            received: AtomicU64::new(0),
            route_latency: Histogram::route_latency(),
            upserts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            unrecognized_operations: AtomicU64::new(0),
            applied_by_kind: EntityKind::ALL
                .iter()
                .map(|kind| (*kind, AtomicU64::new(0)))
                .collect(),
            ignored_kinds: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            resolution_failures: AtomicU64::new(0),
            cache_failures: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            redeliveries: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    /// Record an inbound message before it is routed.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event whose cache effect was applied.
    pub fn record_applied(&self, kind: EntityKind, operation: Operation, duration_us: u64) {
        self.route_latency.observe(duration_us);

        let counter = match operation {
            Operation::Create | Operation::Update => &self.upserts,
            Operation::Delete => &self.deletes,
            Operation::Unrecognized => &self.unrecognized_operations,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Some(counter) = self.applied_by_kind.get(&kind) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a message for an entity kind the relay does not handle.
    pub fn record_ignored(&self) {
        self.ignored_kinds.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed event.
    pub fn record_failure(&self, error: &Error, duration_us: u64) {
        self.route_latency.observe(duration_us);

        let counter = match error {
            Error::Parse(_) => &self.parse_failures,
            Error::Resolution { .. } => &self.resolution_failures,
            Error::CacheStore { .. } => &self.cache_failures,
            Error::Publish { .. } => &self.publish_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a notification that could not be delivered after all attempts.
    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed event being routed again.
    pub fn record_redelivery(&self) {
        self.redeliveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a payload forwarded to the dead-letter topic.
    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    // Getters

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn upserts(&self) -> u64 {
        self.upserts.load(Ordering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    pub fn unrecognized_operations(&self) -> u64 {
        self.unrecognized_operations.load(Ordering::Relaxed)
    }

    /// Total events with an applied cache effect.
    pub fn applied(&self) -> u64 {
        self.upserts() + self.deletes() + self.unrecognized_operations()
    }

    pub fn applied_for(&self, kind: EntityKind) -> u64 {
        self.applied_by_kind
            .get(&kind)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn ignored_kinds(&self) -> u64 {
        self.ignored_kinds.load(Ordering::Relaxed)
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }

    pub fn resolution_failures(&self) -> u64 {
        self.resolution_failures.load(Ordering::Relaxed)
    }

    pub fn cache_failures(&self) -> u64 {
        self.cache_failures.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    pub fn redeliveries(&self) -> u64 {
        self.redeliveries.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    /// Total events that failed for any reason except publishing.
    pub fn failed(&self) -> u64 {
        self.parse_failures() + self.resolution_failures() + self.cache_failures()
    }

    pub fn avg_route_latency_us(&self) -> u64 {
        self.route_latency.avg()
    }

    pub fn p99_route_latency_us(&self) -> u64 {
        self.route_latency.p99()
    }

    /// Export to Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        write_metric(
            &mut out,
            "datasync_uptime_seconds",
            "Relay uptime in seconds",
            "gauge",
            self.uptime_secs(),
        );
        write_metric(
            &mut out,
            "datasync_events_received_total",
            "Inbound change messages received",
            "counter",
            self.received(),
        );

        out.push_str(
            "# HELP datasync_events_applied_total Events applied to the cache, by operation\n",
        );
        out.push_str("# TYPE datasync_events_applied_total counter\n");
        let _ = writeln!(
            out,
            "datasync_events_applied_total{{operation=\"upsert\"}} {}",
            self.upserts()
        );
        let _ = writeln!(
            out,
            "datasync_events_applied_total{{operation=\"delete\"}} {}",
            self.deletes()
        );
        let _ = writeln!(
            out,
            "datasync_events_applied_total{{operation=\"unrecognized\"}} {}\n",
            self.unrecognized_operations()
        );

        out.push_str(
            "# HELP datasync_events_by_kind_total Events applied to the cache, by entity kind\n",
        );
        out.push_str("# TYPE datasync_events_by_kind_total counter\n");
        for kind in EntityKind::ALL {
            let _ = writeln!(
                out,
                "datasync_events_by_kind_total{{kind=\"{}\"}} {}",
                kind,
                self.applied_for(kind)
            );
        }
        out.push('\n');

        write_metric(
            &mut out,
            "datasync_events_ignored_total",
            "Messages for unknown entity kinds",
            "counter",
            self.ignored_kinds(),
        );

        out.push_str("# HELP datasync_events_failed_total Failed events, by failure kind\n");
        out.push_str("# TYPE datasync_events_failed_total counter\n");
        let _ = writeln!(
            out,
            "datasync_events_failed_total{{reason=\"parse\"}} {}",
            self.parse_failures()
        );
        let _ = writeln!(
            out,
            "datasync_events_failed_total{{reason=\"resolution\"}} {}",
            self.resolution_failures()
        );
        let _ = writeln!(
            out,
            "datasync_events_failed_total{{reason=\"cache_store\"}} {}\n",
            self.cache_failures()
        );

        write_metric(
            &mut out,
            "datasync_publish_failures_total",
            "Notifications dropped after all publish attempts",
            "counter",
            self.publish_failures(),
        );
        write_metric(
            &mut out,
            "datasync_redeliveries_total",
            "Failed events routed again after a retryable error",
            "counter",
            self.redeliveries(),
        );
        write_metric(
            &mut out,
            "datasync_dead_lettered_total",
            "Payloads forwarded to the dead-letter topic",
            "counter",
            self.dead_lettered(),
        );
        write_metric(
            &mut out,
            "datasync_route_duration_us_avg",
            "Average route duration in microseconds",
            "gauge",
            self.avg_route_latency_us(),
        );
        write_metric(
            &mut out,
            "datasync_route_duration_us_p99",
            "P99 route duration in microseconds",
            "gauge",
            self.p99_route_latency_us(),
        );

        out
    }

    /// Reset all counters (for testing).
    pub fn reset(&self) {
        self.route_latency.reset();
        for counter in [
            &self.received,
            &self.upserts,
            &self.deletes,
            &self.unrecognized_operations,
            &self.ignored_kinds,
            &self.parse_failures,
            &self.resolution_failures,
            &self.cache_failures,
            &self.publish_failures,
            &self.redeliveries,
            &self.dead_lettered,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for counter in self.applied_by_kind.values() {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn write_metric(out: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
    let _ = writeln!(out, "{} {}\n", name, value);
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics registry handle.
pub type SharedMetricsRegistry = Arc<MetricsRegistry>;

/// Create a new shared metrics registry.
pub fn new_shared_registry() -> SharedMetricsRegistry {
    Arc::new(MetricsRegistry::new())
}
