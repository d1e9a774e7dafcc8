//! Canonical color records

use super::catalog_id::ColorId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A color as known to the catalog source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorRecord {
    pub id: ColorId,
    pub name: String,
    pub family: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// `#rrggbb` or `#rrggbbaa`
    #[serde(rename = "rgba")]
    pub rgba_hex: String,
    pub fetched_at: DateTime<Utc>,
}

impl ColorRecord {
    /// RGBA components in `0.0..=1.0`
    ///
    /// Missing alpha is opaque; an unparsable hex string yields NaN color
    /// channels with alpha 1.0.
    pub fn rgba(&self) -> [f32; 4] {
        parse_rgba(&self.rgba_hex).unwrap_or([f32::NAN, f32::NAN, f32::NAN, 1.0])
    }
}

fn parse_rgba(hex: &str) -> Option<[f32; 4]> {
    let digits = hex.trim().strip_prefix('#')?;
    if !(digits.len() == 6 || digits.len() == 8) || !digits.is_ascii() {
        return None;
    }

    let channel = |i: usize| -> Option<f32> {
        u8::from_str_radix(&digits[i..i + 2], 16)
            .ok()
            .map(|v| f32::from(v) / 255.0)
    };

    let alpha = if digits.len() == 8 { channel(6)? } else { 1.0 };
    Some([channel(0)?, channel(2)?, channel(4)?, alpha])
}
