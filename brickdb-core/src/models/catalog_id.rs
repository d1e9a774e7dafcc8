//! Design vs part identifiers
//!
//! Both id spaces are plain integers on the wire. They are told apart by
//! magnitude: anything above `PART_ID_THRESHOLD` is a part (one specific
//! color molding), anything at or below it is a design (the shape).

use serde::{Deserialize, Serialize};
use std::fmt;

pub type DesignId = i32;
pub type PartId = i32;
pub type ColorId = i32;

/// Values strictly above this are part identifiers
pub const PART_ID_THRESHOLD: i32 = 100_000;

/// A lookup key with its id space made explicit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogId {
    Design(DesignId),
    Part(PartId),
}

impl CatalogId {
    /// Classify a raw integer by the magnitude convention
    pub fn classify(raw: i32) -> Self {
        if raw > PART_ID_THRESHOLD {
            CatalogId::Part(raw)
        } else {
            CatalogId::Design(raw)
        }
    }

    pub fn raw(&self) -> i32 {
        match *self {
            CatalogId::Design(id) | CatalogId::Part(id) => id,
        }
    }

    pub fn is_part(&self) -> bool {
        matches!(self, CatalogId::Part(_))
    }
}

impl From<i32> for CatalogId {
    fn from(raw: i32) -> Self {
        Self::classify(raw)
    }
}

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogId::Design(id) => write!(f, "design {}", id),
            CatalogId::Part(id) => write!(f, "part {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_a_design() {
        assert_eq!(CatalogId::classify(100_000), CatalogId::Design(100_000));
        assert_eq!(CatalogId::classify(100_001), CatalogId::Part(100_001));
    }

    #[test]
    fn test_common_ids() {
        assert_eq!(CatalogId::from(3001), CatalogId::Design(3001));
        assert_eq!(CatalogId::from(300_121), CatalogId::Part(300_121));
        assert!(CatalogId::from(4_211_395).is_part());
        assert_eq!(CatalogId::Part(300_121).raw(), 300_121);
    }
}
