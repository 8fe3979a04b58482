//! Datasync core.
//!
//! Routes catalog change events into the dimension cache and republishes them
//! as dimension-change notifications. The router owns every decision about
//! keys and notifications; the resolver, cache and publisher are injected
//! collaborators behind the traits in [`resolver`], [`cache`] and [`publish`].
//!
//! ```ignore
//! use std::sync::Arc;
//! use datasync_core::{ChangeRouter, MemoryCache, MemoryPublisher, MemoryResolver, RouterConfig};
//!
//! let router = ChangeRouter::new(
//!     Arc::new(MemoryResolver::new()),
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(MemoryPublisher::new()),
//!     RouterConfig::default(),
//! );
//! router.route(r#"{"data_type":"brand","event_type":"delete","id":42}"#).await?;
//! ```

pub mod cache;
pub mod error;
pub mod metrics;
pub mod publish;
pub mod resolver;
pub mod router;

pub use cache::{CacheStore, MemoryCache, RedisCache, SledCache};
pub use error::{BackendError, Error};
pub use metrics::{new_shared_registry, MetricsRegistry, SharedMetricsRegistry};
pub use publish::{MemoryPublisher, NotificationPublisher, PublishedMessage};
pub use resolver::{EntityResolver, MemoryResolver};
pub use router::{
    cache_key, AppliedChange, CacheEffect, ChangeRouter, KeySource, KindRoute, RouteOutcome,
    RouterConfig,
};
