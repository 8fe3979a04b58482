//! Dimension-change notifications.
//!
//! Aggregation consumers only care about three coarse dimensions. Every
//! product child change is reported as a change to its owning product.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Coarse dimension reported to aggregation consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionType {
    Brand,
    Category,
    Product,
}

impl DimensionType {
    /// The `dim_type` wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionType::Brand => "brand",
            DimensionType::Category => "category",
            DimensionType::Product => "product",
        }
    }
}

impl fmt::Display for DimensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification that a dimension record changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionChange {
    pub dim_type: DimensionType,
    pub id: i64,
}

impl DimensionChange {
    pub fn new(dim_type: DimensionType, id: i64) -> Self {
        Self { dim_type, id }
    }

    /// Encode as the flat JSON payload consumers expect.
    pub fn to_payload(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode a payload produced by [`DimensionChange::to_payload`].
    pub fn from_payload(payload: &str) -> Result<Self, Error> {
        serde_json::from_str(payload).map_err(|e| Error::Malformed(e.to_string()))
    }
}
