//! Closed set of syncable resource collections.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Collections a queued operation may target.
///
/// Keeping this a closed enum makes an unsupported collection a
/// compile-time concern for engine callers; the string form only appears
/// at the storage and wire boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Outbound deliveries to cooperative members
    Delivery,
    /// Producer pickups feeding the depot
    Pickup,
    /// Cooperative member records
    Member,
    /// Catalogue products
    Product,
}

impl ResourceKind {
    /// Collection name used in storage and on the wire
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Delivery => "deliveries",
            Self::Pickup => "pickups",
            Self::Member => "members",
            Self::Product => "products",
        }
    }

    /// Queue priority derived from the collection.
    ///
    /// Logistics records move ahead of catalogue maintenance when the
    /// queue drains.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        match self {
            Self::Delivery | Self::Pickup => Priority::High,
            Self::Member => Priority::Normal,
            Self::Product => Priority::Low,
        }
    }

    /// Fields a create payload must carry for this collection
    #[must_use]
    pub const fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Delivery => &["address", "weight"],
            Self::Pickup => &["depot", "scheduled_for"],
            Self::Member => &["name"],
            Self::Product => &["name", "unit"],
        }
    }

    /// Validate a create payload against the collection's schema
    pub fn validate_create_payload(&self, payload: &Map<String, Value>) -> Result<()> {
        let missing: Vec<&str> = self
            .required_fields()
            .iter()
            .copied()
            .filter(|field| !payload.contains_key(*field))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "{} create payload is missing required fields: {}",
                self.as_str(),
                missing.join(", ")
            )))
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deliveries" => Ok(Self::Delivery),
            "pickups" => Ok(Self::Pickup),
            "members" => Ok(Self::Member),
            "products" => Ok(Self::Product),
            other => Err(Error::InvalidInput(format!(
                "unknown resource kind: {other}"
            ))),
        }
    }
}

/// Ordering hint for queue draining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Drained last
    Low,
    /// Default tier
    Normal,
    /// Drained first
    High,
}

impl Priority {
    /// Numeric rank stored in the queue table; higher drains first
    #[must_use]
    pub const fn rank(&self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
        }
    }

    /// Inverse of [`Priority::rank`]
    pub fn from_rank(rank: i64) -> Result<Self> {
        match rank {
            0 => Ok(Self::Low),
            1 => Ok(Self::Normal),
            2 => Ok(Self::High),
            other => Err(Error::InvalidInput(format!(
                "unknown priority rank: {other}"
            ))),
        }
    }

    /// Lowercase label for display
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_resource_roundtrip() {
        for kind in [
            ResourceKind::Delivery,
            ResourceKind::Pickup,
            ResourceKind::Member,
            ResourceKind::Product,
        ] {
            let parsed: ResourceKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_unknown_resource_rejected() {
        assert!("invoices".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_priority_derivation() {
        assert_eq!(ResourceKind::Delivery.priority(), Priority::High);
        assert_eq!(ResourceKind::Pickup.priority(), Priority::High);
        assert_eq!(ResourceKind::Member.priority(), Priority::Normal);
        assert_eq!(ResourceKind::Product.priority(), Priority::Low);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::from_rank(Priority::High.rank()).unwrap(), Priority::High);
    }

    #[test]
    fn test_create_payload_validation() {
        let payload = json!({"address": "Calle 12", "weight": 10})
            .as_object()
            .cloned()
            .unwrap();
        assert!(ResourceKind::Delivery.validate_create_payload(&payload).is_ok());

        let incomplete = json!({"address": "Calle 12"}).as_object().cloned().unwrap();
        let error = ResourceKind::Delivery
            .validate_create_payload(&incomplete)
            .unwrap_err();
        assert!(error.to_string().contains("weight"));
    }
}
