//! Datasync relay server.
//!
//! Wires the change router to its production collaborators: an AMQP queue
//! (or NNG PULL socket) for inbound change events, the catalog service over
//! HTTP as the source of truth, a Redis, sled or in-memory dimension cache
//! and the matching broker for dimension-change notifications.

pub mod amqp;
pub mod config;
pub mod error;
pub mod ingest;
pub mod ops;
pub mod publisher;
pub mod resolver;
pub mod transport;

pub use amqp::{settlement_for, AmqpListener, AmqpPublisher, Settlement};
pub use config::{Args, Broker, CacheBackend, RelayConfig};
pub use error::Error;
pub use ingest::{
    start_processor, DeadLetter, Disposition, Inbound, IngestConfig, IngestHandle, IngestProcessor,
};
pub use ops::{create_router, OpsState};
pub use publisher::NngPublisher;
pub use resolver::HttpResolver;
pub use transport::{create_listener, InboundListener};
