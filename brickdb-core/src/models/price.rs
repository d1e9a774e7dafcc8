//! Price bands and the price-guide table

use super::catalog_id::{ColorId, DesignId};
use super::nan_as_null;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{min, avg, max}` market price band; NaN means unknown
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceBand {
    #[serde(rename = "priceMin", with = "nan_as_null", default = "nan_as_null::nan")]
    pub min: f64,
    #[serde(rename = "priceAvg", with = "nan_as_null", default = "nan_as_null::nan")]
    pub avg: f64,
    #[serde(rename = "priceMax", with = "nan_as_null", default = "nan_as_null::nan")]
    pub max: f64,
}

impl PriceBand {
    pub const UNKNOWN: PriceBand = PriceBand {
        min: f64::NAN,
        avg: f64::NAN,
        max: f64::NAN,
    };

    /// True once at least the blended average is known
    pub fn is_known(&self) -> bool {
        !self.avg.is_nan()
    }
}

impl Default for PriceBand {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

// Unknown == unknown, so records with unpriced variations compare equal
impl PartialEq for PriceBand {
    fn eq(&self, other: &Self) -> bool {
        fn same(a: f64, b: f64) -> bool {
            (a.is_nan() && b.is_nan()) || a == b
        }
        same(self.min, other.min) && same(self.avg, other.avg) && same(self.max, other.max)
    }
}

/// One row of a price guide: a source color label and its band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorQuote {
    /// Color name exactly as the price source spells it
    pub label: String,
    /// Canonical color the label resolved to, if any
    pub color_id: Option<ColorId>,
    #[serde(flatten)]
    pub band: PriceBand,
}

/// Cached price guide for one design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRecord {
    pub design_id: DesignId,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub quotes: Vec<ColorQuote>,
}

impl PriceRecord {
    /// Band quoted for a canonical color
    pub fn band_for(&self, color_id: ColorId) -> Option<PriceBand> {
        self.quotes
            .iter()
            .find(|q| q.color_id == Some(color_id))
            .map(|q| q.band)
    }
}
