//! Relay metrics.
//!
//! Counters are split by failure kind so operators can tell an unknown event
//! type apart from a record that should have been cached and was not.
//!
//! ```ignore
//! use datasync_core::metrics::new_shared_registry;
//!
//! let registry = new_shared_registry();
//! registry.record_received();
//! registry.record_ignored();
//! let text = registry.to_prometheus();
//! ```

mod histogram;
mod registry;

pub use histogram::Histogram;
pub use registry::{new_shared_registry, MetricsRegistry, SharedMetricsRegistry};
