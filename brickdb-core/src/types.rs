//! Core Types and Trait Definitions for brickdb-core
//!
//! Two kinds of seams live here:
//! - **Collaborators** the cache consumes but does not implement in full:
//!   the transport (`Transport`), the page field extractors
//!   (`CatalogExtractor`, `PriceGuideExtractor`) and the optional image
//!   post-processing step (`ImagePostprocessor`).
//! - **Capabilities** a provider may offer (`BrickSource`, `ColorSource`,
//!   `ImageSource`, `PriceSource`). The manager queries providers by
//!   capability, never by concrete type.

use crate::error::{CacheResult, RequestError};
use crate::models::{BrickRecord, CatalogId, ColorId, ColorRecord, DesignId, PartId, PriceRecord};
use crate::services::image_store::EncodedImage;
use async_trait::async_trait;
use std::time::Duration;

// ============================================================================
// Collaborators
// ============================================================================

/// Network transport for one source
///
/// Only the request executor calls these methods; it owns retry, back-off
/// and session reset policy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn download_text(&self, url: &str) -> Result<String, RequestError>;

    async fn download_bytes(&self, url: &str) -> Result<Vec<u8>, RequestError>;

    /// Discard connection/session state (cookies, pooled connections) and
    /// start over with a fresh client carrying the static headers again.
    fn reset(&self);

    /// Cheap reachability check
    async fn probe(&self, url: &str) -> bool;
}

/// Fields of a design page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDesign {
    pub name: String,
    pub category: String,
    /// Free text, e.g. `"1958 - 2024"`
    pub production_years: String,
    /// One entry per listed variation; `None` when the part id could not be
    /// read from the listing
    pub parts: Vec<Option<PartId>>,
}

/// Fields of a part page (one color molding)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPart {
    pub color_id: ColorId,
    pub color_name: String,
    pub color_family: String,
    pub color_type: String,
    pub color_rgba: String,
    pub production_years: String,
}

/// One color row of a price guide page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPriceRow {
    pub color_label: String,
    pub observations: Vec<f64>,
}

/// Field extraction for the catalog source's pages
pub trait CatalogExtractor: Send + Sync {
    fn design(&self, html: &str) -> Result<RawDesign, RequestError>;

    fn part(&self, html: &str) -> Result<RawPart, RequestError>;

    /// Price observations listed on a part's buy page
    fn buy_prices(&self, html: &str) -> Vec<f64>;

    /// Owning design id as shown on a part page
    fn design_of_part(&self, html: &str) -> Result<DesignId, RequestError>;
}

/// Field extraction for the price-guide source
pub trait PriceGuideExtractor: Send + Sync {
    fn price_rows(&self, html: &str) -> Result<Vec<RawPriceRow>, RequestError>;
}

/// Optional pixel clean-up applied once to every downloaded image
pub trait ImagePostprocessor: Send + Sync {
    fn postprocess(&self, bytes: Vec<u8>) -> Vec<u8>;
}

/// Stores images exactly as downloaded
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl ImagePostprocessor for Passthrough {
    fn postprocess(&self, bytes: Vec<u8>) -> Vec<u8> {
        bytes
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Brick lookup and storage
#[async_trait]
pub trait BrickSource: Send + Sync {
    /// Cached brick, fetching it on first access to an unseen design
    async fn brick(&mut self, id: CatalogId) -> CacheResult<Option<BrickRecord>>;

    /// Insert or replace a brick and persist the provider's tables
    fn store_brick(&mut self, brick: BrickRecord) -> CacheResult<()>;
}

/// Color lookup; colors are only ever learned as a by-product of brick fetches
pub trait ColorSource: Send + Sync {
    fn color(&self, id: ColorId) -> Option<ColorRecord>;

    /// Every known color, ascending by id
    fn colors(&self) -> Vec<ColorRecord>;
}

/// Reference images
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Image for a part, or for a design's variation in `color` (first
    /// variation when the color is unknown)
    async fn image(
        &mut self,
        id: CatalogId,
        color: Option<ColorId>,
    ) -> CacheResult<Option<EncodedImage>>;
}

/// Market prices per color of a design
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Price guide for `brick`, with labels resolved against `palette`.
    ///
    /// A cached, non-stale guide is returned as-is unless `force` is set.
    async fn update_price(
        &mut self,
        brick: &BrickRecord,
        palette: &[ColorRecord],
        force: bool,
    ) -> CacheResult<Option<PriceRecord>>;
}

/// A data source registered with the manager
///
/// Capability accessors default to `None`; a provider overrides the ones it
/// implements.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Age after which cached records are re-fetched
    fn ttl(&self) -> Duration;

    /// Reachability probe gating operation start
    async fn can_operate(&self) -> bool {
        true
    }

    /// Persist the in-memory tables
    fn save(&self) -> CacheResult<()>;

    /// Replace the in-memory tables with the snapshot (rollback on failure)
    async fn load(&mut self) -> CacheResult<()>;

    /// Merge the snapshot into memory, then refresh stale records
    async fn load_merge(&mut self) -> CacheResult<()>;

    /// Delete the snapshot and forget every cached record
    fn clear_index(&mut self) -> CacheResult<()>;

    /// Delete every cached image file
    fn clear_images(&mut self) -> CacheResult<()>;

    fn clear_all(&mut self) -> CacheResult<()> {
        self.clear_index()?;
        self.clear_images()
    }

    fn as_bricks(&mut self) -> Option<&mut dyn BrickSource> {
        None
    }

    fn as_colors(&self) -> Option<&dyn ColorSource> {
        None
    }

    fn as_images(&mut self) -> Option<&mut dyn ImageSource> {
        None
    }

    fn as_prices(&mut self) -> Option<&mut dyn PriceSource> {
        None
    }
}
