//! In-memory provider tables and their on-disk container

use super::brick::BrickRecord;
use super::catalog_id::{ColorId, DesignId, PartId};
use super::color::ColorRecord;
use super::price::PriceRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Format marker written into every snapshot file
pub const SNAPSHOT_FORMAT: &str = "brickdb-index";
pub const SNAPSHOT_VERSION: u32 = 1;

/// Tables owned by one provider
///
/// Keyed maps keep iteration (and therefore the saved file) ordered by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogTables {
    pub colors: BTreeMap<ColorId, ColorRecord>,
    pub bricks: BTreeMap<DesignId, BrickRecord>,
    pub prices: BTreeMap<DesignId, PriceRecord>,
}

impl CatalogTables {
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.bricks.is_empty() && self.prices.is_empty()
    }

    pub fn clear(&mut self) {
        self.colors.clear();
        self.bricks.clear();
        self.prices.clear();
    }

    /// Design owning `part_id`, if any cached brick lists it
    pub fn design_for_part(&self, part_id: PartId) -> Option<DesignId> {
        self.bricks
            .values()
            .find(|b| b.contains_part(part_id))
            .map(|b| b.design_id)
    }

    /// Some cached design with a variation in `color_id`
    pub fn design_with_color(&self, color_id: ColorId) -> Option<DesignId> {
        self.bricks
            .values()
            .find(|b| b.variations().iter().any(|v| v.color_id == color_id))
            .map(|b| b.design_id)
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            format: SNAPSHOT_FORMAT.to_string(),
            version: SNAPSHOT_VERSION,
            colors: self.colors.values().cloned().collect(),
            bricks: self.bricks.values().cloned().collect(),
            prices: self.prices.values().cloned().collect(),
        }
    }
}

/// Self-describing record file (`index.db`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format: String,
    pub version: u32,
    #[serde(default)]
    pub colors: Vec<ColorRecord>,
    #[serde(default)]
    pub bricks: Vec<BrickRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prices: Vec<PriceRecord>,
}
