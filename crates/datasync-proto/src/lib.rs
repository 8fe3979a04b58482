//! Datasync wire types.
//!
//! This crate defines the messages that flow through the catalog relay:
//! the inbound change events produced by the catalog service and the
//! dimension-change notifications consumed by the aggregation service.
//!
//! # Modules
//!
//! - [`event`] - Inbound change events and their classification
//! - [`dimension`] - Outbound dimension-change notifications
//! - [`error`] - Protocol error types
//!
//! # Example
//!
//! ```
//! use datasync_proto::{EntityKind, InboundMessage, Operation};
//!
//! let raw = r#"{"data_type":"brand","event_type":"update","id":42}"#;
//! match InboundMessage::parse(raw).unwrap() {
//!     InboundMessage::Change(event) => {
//!         assert_eq!(event.kind, EntityKind::Brand);
//!         assert_eq!(event.operation, Operation::Update);
//!         assert_eq!(event.entity_id, 42);
//!     }
//!     InboundMessage::UnknownKind { .. } => unreachable!(),
//! }
//! ```

pub mod dimension;
pub mod error;
pub mod event;

pub use dimension::{DimensionChange, DimensionType};
pub use error::Error;
pub use event::{ChangeEvent, EntityKind, InboundMessage, Operation};

/// Queue carrying raw catalog change events.
pub const DATA_CHANGE_QUEUE: &str = "data-change-queue";

/// Queue carrying dimension-change notifications for the aggregation service.
pub const AGGREGATE_CHANGE_QUEUE: &str = "aggr-data-change-queue";
