//! Record model for the catalog cache
//!
//! Colors, bricks (designs) with their per-color variations, price bands and
//! the on-disk snapshot container. Records are plain values: providers own
//! the tables they live in, everything else works on clones.

pub mod brick;
pub mod catalog_id;
pub mod color;
pub mod price;
pub mod snapshot;

pub use brick::{parse_years, BrickRecord, VariationRecord, ORPHAN_AFTER_EMPTY_REFRESHES};
pub use catalog_id::{CatalogId, ColorId, DesignId, PartId, PART_ID_THRESHOLD};
pub use color::ColorRecord;
pub use price::{ColorQuote, PriceBand, PriceRecord};
pub use snapshot::{CatalogTables, Snapshot, SNAPSHOT_FORMAT, SNAPSHOT_VERSION};

/// Serde adapter persisting unknown (NaN) prices as `null`
///
/// JSON has no NaN; without this an unpriced variation could not be saved.
pub(crate) mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_some(value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }

    pub fn nan() -> f64 {
        f64::NAN
    }
}
