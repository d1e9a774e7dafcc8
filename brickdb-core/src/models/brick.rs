//! Brick (design) records and their color variations

use super::catalog_id::{ColorId, DesignId, PartId};
use super::price::PriceBand;
use crate::services::price_aggregator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive empty refreshes after which a design is treated as retired
pub const ORPHAN_AFTER_EMPTY_REFRESHES: u32 = 3;

/// One color molding of a design, with its price band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationRecord {
    pub part_id: PartId,
    pub color_id: ColorId,
    #[serde(default)]
    pub production_years: Vec<i32>,
    #[serde(flatten)]
    pub price: PriceBand,
}

/// A design with all of its known variations
///
/// `variations` is `None` when the persisted record never carried a list;
/// such records are dropped on load. An empty list means the design was
/// fetched but yielded nothing and is re-fetched until it is orphaned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrickRecord {
    pub design_id: DesignId,
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub production_years: Vec<i32>,
    #[serde(default)]
    pub variations: Option<Vec<VariationRecord>>,
    /// Refreshes in a row that came back with zero variations
    #[serde(default, skip_serializing_if = "is_zero")]
    pub empty_refreshes: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl BrickRecord {
    /// Variations in ascending color order (empty when absent)
    pub fn variations(&self) -> &[VariationRecord] {
        self.variations.as_deref().unwrap_or_default()
    }

    /// Only positive design ids count as cached
    pub fn is_present(&self) -> bool {
        self.design_id > 0
    }

    /// Retired: kept resolving to zero variations
    pub fn is_orphaned(&self) -> bool {
        self.empty_refreshes >= ORPHAN_AFTER_EMPTY_REFRESHES
    }

    /// No variations yet; re-fetched regardless of TTL unless orphaned
    pub fn is_incomplete(&self) -> bool {
        self.variations().is_empty() && !self.is_orphaned()
    }

    pub fn first_part_id(&self) -> Option<PartId> {
        self.variations().first().map(|v| v.part_id)
    }

    pub fn contains_part(&self, part_id: PartId) -> bool {
        self.variations().iter().any(|v| v.part_id == part_id)
    }

    /// Variation in the given color, else the first one
    pub fn variation_for_color(&self, color_id: Option<ColorId>) -> Option<&VariationRecord> {
        color_id
            .and_then(|c| self.variations().iter().find(|v| v.color_id == c))
            .or_else(|| self.variations().first())
    }

    /// Restore the ascending-color ordering invariant
    pub fn sort_variations(&mut self) {
        if let Some(variations) = self.variations.as_mut() {
            variations.sort_by_key(|v| v.color_id);
        }
    }

    /// Brick-level price: plain per-column mean across variations
    pub fn price_band(&self) -> PriceBand {
        price_aggregator::mean_band(self.variations().iter().map(|v| v.price))
    }
}

/// Production years from free text such as `"1999 - 2004"` or `"2001, 2003"`
///
/// Fragments that are not integers are skipped.
pub fn parse_years(text: &str) -> Vec<i32> {
    text.split(['-', ','])
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}
