//! Inbound catalog change events.
//!
//! Producers publish a flat JSON object per change:
//!
//! ```text
//! {"data_type": "product_intro", "event_type": "delete", "id": 7, "product_id": 99}
//! ```
//!
//! `data_type` is the only field required to classify a message. Kinds this
//! relay does not know are surfaced as [`InboundMessage::UnknownKind`] so the
//! caller can drop them without treating them as failures.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Error;

/// Catalog entity kinds carried on the change queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Product brand.
    Brand,
    /// Product category.
    Category,
    /// Product description, owned by a product.
    ProductIntro,
    /// Product property list, owned by a product.
    ProductProperty,
    /// Product itself.
    Product,
    /// Product specification, owned by a product.
    ProductSpecification,
}

impl EntityKind {
    /// Every known kind, in wire order.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Brand,
        EntityKind::Category,
        EntityKind::ProductIntro,
        EntityKind::ProductProperty,
        EntityKind::Product,
        EntityKind::ProductSpecification,
    ];

    /// Look up a kind by its `data_type` wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "brand" => Some(EntityKind::Brand),
            "category" => Some(EntityKind::Category),
            "product_intro" => Some(EntityKind::ProductIntro),
            "product_property" => Some(EntityKind::ProductProperty),
            "product" => Some(EntityKind::Product),
            "product_specification" => Some(EntityKind::ProductSpecification),
            _ => None,
        }
    }

    /// The `data_type` wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Brand => "brand",
            EntityKind::Category => "category",
            EntityKind::ProductIntro => "product_intro",
            EntityKind::ProductProperty => "product_property",
            EntityKind::Product => "product",
            EntityKind::ProductSpecification => "product_specification",
        }
    }

    /// Whether this kind is a child record of a product and carries `product_id`.
    pub fn is_product_child(&self) -> bool {
        matches!(
            self,
            EntityKind::ProductIntro
                | EntityKind::ProductProperty
                | EntityKind::ProductSpecification
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change operation carried in `event_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Record created (`add` or `create`).
    Create,
    /// Record updated.
    Update,
    /// Record deleted.
    Delete,
    /// Any other value, or no `event_type` at all.
    Unrecognized,
}

impl Operation {
    /// Classify an `event_type` value.
    pub fn from_wire(name: Option<&str>) -> Self {
        match name {
            Some("add") | Some("create") => Operation::Create,
            Some("update") => Operation::Update,
            Some("delete") => Operation::Delete,
            _ => Operation::Unrecognized,
        }
    }

    /// The wire name producers use for this operation.
    pub fn as_wire(&self) -> Option<&'static str> {
        match self {
            Operation::Create => Some("add"),
            Operation::Update => Some("update"),
            Operation::Delete => Some("delete"),
            Operation::Unrecognized => None,
        }
    }

    /// Create and update both refresh the cached record from source.
    pub fn is_upsert(&self) -> bool {
        matches!(self, Operation::Create | Operation::Update)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire().unwrap_or("unrecognized"))
    }
}

/// A classified change event for a known entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Kind of the changed record.
    pub kind: EntityKind,
    /// What happened to it.
    pub operation: Operation,
    /// Identifier of the changed record.
    pub entity_id: i64,
    /// Identifier of the owning product, for product child kinds.
    pub owner_id: Option<i64>,
}

#[derive(Serialize)]
struct WireChangeEvent<'a> {
    data_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_type: Option<&'a str>,
    id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    product_id: Option<i64>,
}

impl ChangeEvent {
    /// Create an event with no owner.
    pub fn new(kind: EntityKind, operation: Operation, entity_id: i64) -> Self {
        Self {
            kind,
            operation,
            entity_id,
            owner_id: None,
        }
    }

    /// Set the owning product id.
    pub fn with_owner(mut self, owner_id: i64) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    /// Encode the event in the producer's wire shape.
    pub fn to_json(&self) -> Result<String, Error> {
        let wire = WireChangeEvent {
            data_type: self.kind.as_str(),
            event_type: self.operation.as_wire(),
            id: self.entity_id,
            product_id: self.owner_id,
        };
        serde_json::to_string(&wire).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Result of classifying a raw inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// A change for a kind this relay handles.
    Change(ChangeEvent),
    /// A well-formed message for a kind this relay does not know.
    UnknownKind {
        /// The `data_type` value as received.
        data_type: String,
    },
}

impl InboundMessage {
    /// Parse and classify a raw payload.
    ///
    /// Fails only when the payload is not a JSON object, when `data_type` is
    /// absent or not a string, or when a known kind lacks the ids it is keyed
    /// on. Unknown kinds are never an error.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| Error::Malformed(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::Malformed("expected a JSON object".to_string()))?;

        let data_type = match object.get("data_type") {
            None | Some(Value::Null) => return Err(Error::MissingField("data_type")),
            Some(Value::String(name)) => name,
            Some(other) => {
                return Err(Error::InvalidField {
                    field: "data_type",
                    reason: format!("expected a string, got {}", other),
                })
            }
        };

        let kind = match EntityKind::from_wire(data_type) {
            Some(kind) => kind,
            None => {
                return Ok(InboundMessage::UnknownKind {
                    data_type: data_type.clone(),
                })
            }
        };

        let operation = Operation::from_wire(object.get("event_type").and_then(Value::as_str));
        let entity_id = read_id(object, "id")?.ok_or(Error::MissingField("id"))?;

        let owner_id = if kind.is_product_child() {
            Some(read_id(object, "product_id")?.ok_or(Error::MissingField("product_id"))?)
        } else {
            // Irrelevant for top-level kinds; tolerate whatever the producer sent.
            read_id(object, "product_id").ok().flatten()
        };

        Ok(InboundMessage::Change(ChangeEvent {
            kind,
            operation,
            entity_id,
            owner_id,
        }))
    }
}

/// Read an integer id, accepting numeric strings as the producer sometimes sends them.
fn read_id(object: &Map<String, Value>, field: &'static str) -> Result<Option<i64>, Error> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number.as_i64().map(Some).ok_or_else(|| Error::InvalidField {
            field,
            reason: format!("{} is not a 64-bit integer", number),
        }),
        Some(Value::String(text)) => text
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| Error::InvalidField {
                field,
                reason: format!("{:?}: {}", text, e),
            }),
        Some(other) => Err(Error::InvalidField {
            field,
            reason: format!("expected an integer, got {}", other),
        }),
    }
}
