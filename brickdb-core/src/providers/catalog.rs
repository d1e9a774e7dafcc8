//! Catalog provider: bricks, colors and reference images from one source
//!
//! Fetching a design downloads its design page, then for every listed
//! variation the part page (color and years), the buy page (price
//! observations) and the reference image. Variations that fail are skipped;
//! a record missing any of them is stamped with the epoch as `fetched_at`
//! so the next load re-fetches it.
//!
//! A fetch that fails outright leaves no record behind and the design is not
//! tried again for the rest of the session. A design that keeps coming back
//! with zero variations is orphaned after a few refreshes and then only
//! re-fetched when its TTL runs out.

use crate::error::{CacheResult, RequestError};
use crate::models::{
    parse_years, BrickRecord, CatalogId, CatalogTables, ColorId, ColorRecord, DesignId, PartId,
    PriceBand, VariationRecord,
};
use crate::services::image_store::{EncodedImage, ImageStore};
use crate::services::price_aggregator;
use crate::services::request_executor::RequestExecutor;
use crate::services::snapshot_store::{RecordRefresher, SnapshotStore};
use crate::types::{
    BrickSource, CatalogExtractor, ColorSource, ImagePostprocessor, ImageSource, Passthrough,
    Provider,
};
use async_trait::async_trait;
use brickdb_common::config::{expand_template, CatalogSourceConfig};
use brickdb_common::{time, CacheEvent, EventBus};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Provider name, also the snapshot subdirectory
pub const CATALOG_PROVIDER: &str = "catalog";

pub struct CatalogProvider {
    tables: CatalogTables,
    fetcher: CatalogFetcher,
    store: SnapshotStore,
}

/// Everything that talks to the source; kept apart from the tables so both
/// can be borrowed mutably at once
struct CatalogFetcher {
    name: String,
    config: CatalogSourceConfig,
    executor: RequestExecutor,
    extractor: Arc<dyn CatalogExtractor>,
    postprocessor: Arc<dyn ImagePostprocessor>,
    images: ImageStore,
    events: EventBus,
    /// Designs whose fetch failed this session
    failed: HashSet<DesignId>,
}

/// State of a stored reference image
enum StoredImage {
    Valid(EncodedImage),
    /// Existed but was below the size threshold; the file has been removed
    Placeholder,
    Missing,
}

impl CatalogProvider {
    /// Provider storing under `<root>/catalog`; nothing is loaded yet
    pub fn new(
        root: &Path,
        config: CatalogSourceConfig,
        executor: RequestExecutor,
        extractor: Arc<dyn CatalogExtractor>,
        events: EventBus,
    ) -> CacheResult<Self> {
        let dir = root.join(CATALOG_PROVIDER);
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            tables: CatalogTables::default(),
            store: SnapshotStore::new(CATALOG_PROVIDER, &dir, events.clone()),
            fetcher: CatalogFetcher {
                name: CATALOG_PROVIDER.to_string(),
                images: ImageStore::new(&dir, config.min_image_px),
                config,
                executor,
                extractor,
                postprocessor: Arc::new(Passthrough),
                events,
                failed: HashSet::new(),
            },
        })
    }

    /// `new` followed by a load of the existing snapshot
    ///
    /// A corrupt snapshot is logged and the provider starts empty.
    pub async fn open(
        root: &Path,
        config: CatalogSourceConfig,
        executor: RequestExecutor,
        extractor: Arc<dyn CatalogExtractor>,
        events: EventBus,
    ) -> CacheResult<Self> {
        let mut provider = Self::new(root, config, executor, extractor, events)?;
        if let Err(e) = provider.load().await {
            warn!(provider = CATALOG_PROVIDER, error = %e, "Starting with an empty catalog");
        }
        Ok(provider)
    }

    pub fn with_postprocessor(mut self, postprocessor: Arc<dyn ImagePostprocessor>) -> Self {
        self.fetcher.postprocessor = postprocessor;
        self
    }

    pub fn tables(&self) -> &CatalogTables {
        &self.tables
    }

    pub fn images(&self) -> &ImageStore {
        &self.fetcher.images
    }

    /// Whether a fetch of `design_id` already failed this session
    pub fn has_failed(&self, design_id: DesignId) -> bool {
        self.fetcher.failed.contains(&design_id)
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.tables) {
            warn!(provider = CATALOG_PROVIDER, error = %e, "Failed to save snapshot");
        }
    }

    /// Design owning `part_id`, asking the source when no cached brick lists it
    async fn design_for_part(&self, part_id: PartId) -> Option<DesignId> {
        if let Some(design_id) = self.tables.design_for_part(part_id) {
            return Some(design_id);
        }

        let url = expand_template(&self.fetcher.config.part_url, part_id);
        let resolved = match self.fetcher.executor.download_text("part page", &url).await {
            Ok(html) => self.fetcher.extractor.design_of_part(&html),
            Err(e) => Err(e),
        };
        match resolved {
            Ok(design_id) => Some(design_id),
            Err(e) => {
                warn!(part_id, error = %e, "Could not resolve part to its design");
                None
            }
        }
    }

    async fn part_for(&mut self, id: CatalogId, color: Option<ColorId>) -> CacheResult<Option<PartId>> {
        match id {
            CatalogId::Part(part_id) => Ok(Some(part_id)),
            CatalogId::Design(_) => Ok(self
                .brick(id)
                .await?
                .and_then(|b| b.variation_for_color(color).map(|v| v.part_id))),
        }
    }

    fn stored_image(&self, part_id: PartId) -> CacheResult<StoredImage> {
        let images = &self.fetcher.images;
        let Some(image) = images.read(part_id)? else {
            return Ok(StoredImage::Missing);
        };
        if images.is_undersized(&image.bytes) {
            debug!(part_id, "Discarding placeholder image");
            images.remove(part_id)?;
            return Ok(StoredImage::Placeholder);
        }
        Ok(StoredImage::Valid(image))
    }
}

impl CatalogFetcher {
    /// Fetch `design_id` into `tables`; false when the fetch failed
    async fn fetch_design(&mut self, tables: &mut CatalogTables, design_id: DesignId) -> bool {
        info!(provider = %self.name, design_id, "Fetching design");
        self.events.emit_lossy(CacheEvent::FetchStarted {
            provider: self.name.clone(),
            id: design_id,
            timestamp: time::now(),
        });

        match self.download_design(tables, design_id).await {
            Ok((mut brick, failed_variations)) => {
                let previous_empty = tables
                    .bricks
                    .get(&design_id)
                    .map(|b| b.empty_refreshes)
                    .unwrap_or(0);
                if brick.variations().is_empty() {
                    brick.empty_refreshes = previous_empty.saturating_add(1);
                    if brick.is_orphaned() {
                        warn!(design_id, empty_refreshes = brick.empty_refreshes, "Design orphaned");
                        self.events.emit_lossy(CacheEvent::RecordOrphaned {
                            provider: self.name.clone(),
                            design_id,
                            empty_refreshes: brick.empty_refreshes,
                            timestamp: time::now(),
                        });
                    }
                }

                self.events.emit_lossy(CacheEvent::FetchCompleted {
                    provider: self.name.clone(),
                    id: design_id,
                    variations: brick.variations().len(),
                    failed_variations,
                    timestamp: time::now(),
                });
                tables.bricks.insert(design_id, brick);
                true
            }
            Err(e) => {
                warn!(provider = %self.name, design_id, error = %e, "Design fetch failed");
                tables.bricks.remove(&design_id);
                self.failed.insert(design_id);
                self.events.emit_lossy(CacheEvent::FetchFailed {
                    provider: self.name.clone(),
                    id: design_id,
                    error: e.to_string(),
                    timestamp: time::now(),
                });
                false
            }
        }
    }

    /// The brick plus the number of variations that could not be fetched
    async fn download_design(
        &self,
        tables: &mut CatalogTables,
        design_id: DesignId,
    ) -> Result<(BrickRecord, usize), RequestError> {
        let url = expand_template(&self.config.design_url, design_id);
        let html = self.executor.download_text("design page", &url).await?;
        let design = self.extractor.design(&html)?;

        let mut variations = Vec::with_capacity(design.parts.len());
        let mut failed = 0;
        for part_id in &design.parts {
            let Some(part_id) = *part_id else {
                failed += 1;
                continue;
            };
            match self.fetch_variation(tables, part_id).await {
                Ok(variation) => variations.push(variation),
                Err(e) => {
                    warn!(design_id, part_id, error = %e, "Skipping variation");
                    failed += 1;
                }
            }
        }
        variations.sort_by_key(|v| v.color_id);

        Ok((
            BrickRecord {
                design_id,
                name: design.name,
                category: design.category,
                fetched_at: if failed > 0 { time::epoch() } else { time::now() },
                production_years: parse_years(&design.production_years),
                variations: Some(variations),
                empty_refreshes: 0,
            },
            failed,
        ))
    }

    async fn fetch_variation(
        &self,
        tables: &mut CatalogTables,
        part_id: PartId,
    ) -> Result<VariationRecord, RequestError> {
        if self.images.find(part_id).is_none() {
            self.download_image(part_id).await;
        }

        let url = expand_template(&self.config.part_url, part_id);
        let html = self.executor.download_text("part page", &url).await?;
        let part = self.extractor.part(&html)?;

        let now = time::now();
        tables
            .colors
            .entry(part.color_id)
            .and_modify(|c| c.fetched_at = now)
            .or_insert_with(|| ColorRecord {
                id: part.color_id,
                name: part.color_name.clone(),
                family: part.color_family.clone(),
                kind: part.color_type.clone(),
                rgba_hex: part.color_rgba.clone(),
                fetched_at: now,
            });

        Ok(VariationRecord {
            part_id,
            color_id: part.color_id,
            production_years: parse_years(&part.production_years),
            price: self.buy_price(part_id).await,
        })
    }

    /// Price band from the buy page; unknown when the page is unavailable
    async fn buy_price(&self, part_id: PartId) -> PriceBand {
        let url = expand_template(&self.config.buy_url, part_id);
        match self.executor.download_text("buy page", &url).await {
            Ok(html) => price_aggregator::aggregate(&self.extractor.buy_prices(&html)),
            Err(e) => {
                debug!(part_id, error = %e, "No buy prices");
                PriceBand::UNKNOWN
            }
        }
    }

    /// Download, post-process and store the reference image; failures are
    /// logged and retried on the next image request
    async fn download_image(&self, part_id: PartId) {
        let url = expand_template(&self.config.image_url, part_id);
        let bytes = match self.executor.download_bytes("part image", &url).await {
            Ok(bytes) => self.postprocessor.postprocess(bytes),
            Err(e) => {
                warn!(part_id, error = %e, "Image download failed");
                return;
            }
        };
        if let Err(e) = self.images.write(part_id, &bytes) {
            warn!(part_id, error = %e, "Could not store image");
        }
    }
}

#[async_trait]
impl RecordRefresher for CatalogFetcher {
    async fn refresh_brick(&mut self, tables: &mut CatalogTables, design_id: DesignId) {
        self.fetch_design(tables, design_id).await;
    }

    async fn refresh_price(&mut self, _tables: &mut CatalogTables, design_id: DesignId) {
        // Buy prices ride along with the brick itself
        debug!(design_id, "Catalog keeps no separate price guide");
    }
}

#[async_trait]
impl BrickSource for CatalogProvider {
    async fn brick(&mut self, id: CatalogId) -> CacheResult<Option<BrickRecord>> {
        let design_id = match id {
            CatalogId::Design(design_id) => design_id,
            CatalogId::Part(part_id) => match self.design_for_part(part_id).await {
                Some(design_id) => design_id,
                None => return Ok(None),
            },
        };
        if design_id <= 0 {
            return Ok(None);
        }

        if !self.tables.bricks.contains_key(&design_id) {
            if self.fetcher.failed.contains(&design_id) {
                debug!(design_id, "Skipping design that failed earlier this session");
                return Ok(None);
            }
            if self.fetcher.fetch_design(&mut self.tables, design_id).await {
                self.persist();
            }
        }

        Ok(self.tables.bricks.get(&design_id).cloned())
    }

    fn store_brick(&mut self, brick: BrickRecord) -> CacheResult<()> {
        if !brick.is_present() || self.tables.bricks.get(&brick.design_id) == Some(&brick) {
            return Ok(());
        }
        self.fetcher.failed.remove(&brick.design_id);
        self.tables.bricks.insert(brick.design_id, brick);
        self.store.save(&self.tables)
    }
}

impl ColorSource for CatalogProvider {
    fn color(&self, id: ColorId) -> Option<ColorRecord> {
        self.tables.colors.get(&id).cloned()
    }

    fn colors(&self) -> Vec<ColorRecord> {
        self.tables.colors.values().cloned().collect()
    }
}

#[async_trait]
impl ImageSource for CatalogProvider {
    async fn image(
        &mut self,
        id: CatalogId,
        color: Option<ColorId>,
    ) -> CacheResult<Option<EncodedImage>> {
        let Some(part_id) = self.part_for(id, color).await? else {
            return Ok(None);
        };

        match self.stored_image(part_id)? {
            StoredImage::Valid(image) => return Ok(Some(image)),
            StoredImage::Placeholder => {
                // Placeholder art usually means the whole page was served
                // degraded, so refresh the owning design once
                match self.tables.design_for_part(part_id) {
                    Some(design_id) => {
                        info!(part_id, design_id, "Re-fetching design for undersized image");
                        if self.fetcher.fetch_design(&mut self.tables, design_id).await {
                            self.persist();
                        }
                    }
                    None => self.fetcher.download_image(part_id).await,
                }
            }
            StoredImage::Missing => self.fetcher.download_image(part_id).await,
        }

        match self.stored_image(part_id)? {
            StoredImage::Valid(image) => Ok(Some(image)),
            _ => {
                warn!(part_id, "No usable image");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Provider for CatalogProvider {
    fn name(&self) -> &str {
        CATALOG_PROVIDER
    }

    fn ttl(&self) -> Duration {
        self.fetcher.config.ttl()
    }

    async fn can_operate(&self) -> bool {
        let transport = self.fetcher.executor.transport();
        transport.probe(&self.fetcher.config.probe_url).await
    }

    fn save(&self) -> CacheResult<()> {
        self.store.save(&self.tables)
    }

    async fn load(&mut self) -> CacheResult<()> {
        let ttl = self.ttl();
        self.store
            .load(&mut self.tables, ttl, &mut self.fetcher)
            .await
            .map(|_| ())
    }

    async fn load_merge(&mut self) -> CacheResult<()> {
        let ttl = self.ttl();
        self.store
            .load_merge(&mut self.tables, ttl, &mut self.fetcher)
            .await
            .map(|_| ())
    }

    fn clear_index(&mut self) -> CacheResult<()> {
        self.store.delete()?;
        self.tables.clear();
        self.fetcher.failed.clear();
        Ok(())
    }

    fn clear_images(&mut self) -> CacheResult<()> {
        let removed = self.fetcher.images.clear()?;
        debug!(provider = CATALOG_PROVIDER, removed, "Images cleared");
        Ok(())
    }

    fn as_bricks(&mut self) -> Option<&mut dyn BrickSource> {
        Some(self)
    }

    fn as_colors(&self) -> Option<&dyn ColorSource> {
        Some(self)
    }

    fn as_images(&mut self) -> Option<&mut dyn ImageSource> {
        Some(self)
    }
}
