//! Cache manager: ordered provider list with capability fallback
//!
//! Every capability query walks the registered providers in order and takes
//! the first non-empty answer. A provider that errors is logged, reported as
//! `ProviderSkipped` and passed over; it never aborts the query. A brick
//! resolved this way is written back into every other brick provider so a
//! slow source only has to answer once.

use crate::error::{CacheError, CacheResult};
use crate::models::{BrickRecord, CatalogId, ColorId, ColorRecord, DesignId, PriceRecord};
use crate::providers::{CatalogProvider, PriceGuideProvider};
use crate::services::image_store::EncodedImage;
use crate::services::{HttpTransport, RequestExecutor, RetryPolicy};
use crate::types::{CatalogExtractor, PriceGuideExtractor, Provider};
use brickdb_common::config::{resolve_cache_dir, CacheConfig};
use brickdb_common::{time, CacheEvent, EventBus};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct CacheManager {
    cache_dir: PathBuf,
    providers: Vec<Box<dyn Provider>>,
    events: EventBus,
}

impl CacheManager {
    /// Empty manager rooted at `cache_dir`; register providers with
    /// [`add_provider`](Self::add_provider)
    pub fn new(cache_dir: impl Into<PathBuf>, events: EventBus) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            providers: Vec::new(),
            events,
        }
    }

    /// Manager with the HTTP-backed catalog provider and, when an extractor
    /// is supplied, the price-guide provider
    ///
    /// The cache directory is `cache_dir` if given, else resolved from the
    /// environment and `config`. Both providers load their snapshots.
    pub async fn from_config(
        config: &CacheConfig,
        cache_dir: Option<&Path>,
        catalog: Arc<dyn CatalogExtractor>,
        price_guide: Option<Arc<dyn PriceGuideExtractor>>,
        events: EventBus,
    ) -> CacheResult<Self> {
        config.validate()?;
        let root = resolve_cache_dir(cache_dir, config);
        std::fs::create_dir_all(&root)?;
        info!(cache_dir = %root.display(), "Opening brick catalog cache");

        let policy = RetryPolicy::from(&config.retry);
        let mut manager = Self::new(root.clone(), events.clone());

        let transport = Arc::new(HttpTransport::new(&config.http, &config.catalog.headers)?);
        let executor = RequestExecutor::new(transport, policy, events.clone());
        let provider =
            CatalogProvider::open(&root, config.catalog.clone(), executor, catalog, events.clone())
                .await?;
        manager.add_provider(Box::new(provider));

        if let Some(extractor) = price_guide {
            let transport = Arc::new(HttpTransport::new(&config.http, &config.price_guide.headers)?);
            let executor = RequestExecutor::new(transport, policy, events.clone());
            let provider = PriceGuideProvider::open(
                &root,
                config.price_guide.clone(),
                executor,
                extractor,
                events,
            )
            .await?;
            manager.add_provider(Box::new(provider));
        }

        Ok(manager)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Append a provider; earlier providers are asked first
    pub fn add_provider(&mut self, provider: Box<dyn Provider>) {
        debug!(provider = provider.name(), position = self.providers.len(), "Provider registered");
        self.providers.push(provider);
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// True only when every provider can reach its source
    pub async fn can_operate(&self) -> bool {
        for provider in &self.providers {
            if !provider.can_operate().await {
                warn!(provider = provider.name(), "Provider cannot operate");
                return false;
            }
        }
        true
    }

    /// Brick by design id, or by part id (ids above 100000)
    pub async fn get(&mut self, id: impl Into<CatalogId>) -> Option<BrickRecord> {
        let id = id.into();
        let mut found = None;

        for (index, provider) in self.providers.iter_mut().enumerate() {
            let name = provider.name().to_string();
            let Some(source) = provider.as_bricks() else {
                continue;
            };
            match source.brick(id).await {
                Ok(Some(brick)) => {
                    found = Some((index, name, brick));
                    break;
                }
                Ok(None) => debug!(provider = %name, %id, "Brick not found"),
                Err(e) => skipped(&self.events, &name, "brick", &e),
            }
        }

        let (index, name, brick) = found?;
        self.cross_populate(&brick, &name, Some(index));
        Some(brick)
    }

    pub fn color(&self, id: ColorId) -> Option<ColorRecord> {
        self.providers
            .iter()
            .filter_map(|p| p.as_colors())
            .find_map(|source| source.color(id))
    }

    /// Every known color across providers; the first provider wins per id
    pub fn palette(&self) -> Vec<ColorRecord> {
        let mut palette = BTreeMap::new();
        for source in self.providers.iter().filter_map(|p| p.as_colors()) {
            for color in source.colors() {
                palette.entry(color.id).or_insert(color);
            }
        }
        palette.into_values().collect()
    }

    /// Reference image for a part, or for a design's first variation
    pub async fn image(&mut self, id: impl Into<CatalogId>) -> Option<EncodedImage> {
        self.find_image(id.into(), None).await
    }

    /// Reference image of a design in a given color (first variation when
    /// the design has no variation in that color)
    pub async fn image_for_design(
        &mut self,
        design_id: DesignId,
        color_id: Option<ColorId>,
    ) -> Option<EncodedImage> {
        self.find_image(CatalogId::Design(design_id), color_id).await
    }

    async fn find_image(&mut self, id: CatalogId, color: Option<ColorId>) -> Option<EncodedImage> {
        for provider in self.providers.iter_mut() {
            let name = provider.name().to_string();
            let Some(source) = provider.as_images() else {
                continue;
            };
            match source.image(id, color).await {
                Ok(Some(image)) => return Some(image),
                Ok(None) => debug!(provider = %name, %id, "Image not found"),
                Err(e) => skipped(&self.events, &name, "image", &e),
            }
        }
        None
    }

    /// Fold the current price guide into a brick's variations
    ///
    /// Returns the updated brick (written back into every brick provider),
    /// or the brick unchanged when no price provider had a guide.
    pub async fn update_price(&mut self, id: impl Into<CatalogId>, force: bool) -> Option<BrickRecord> {
        let mut brick = self.get(id).await?;
        let palette = self.palette();

        let Some(record) = self.find_price(&brick, &palette, force).await else {
            debug!(design_id = brick.design_id, "No price guide available");
            return Some(brick);
        };

        let mut priced = 0;
        for variation in brick.variations.iter_mut().flatten() {
            if let Some(band) = record.band_for(variation.color_id) {
                variation.price = band;
                priced += 1;
            }
        }

        info!(design_id = brick.design_id, priced, "Prices updated");
        self.events.emit_lossy(CacheEvent::PriceUpdated {
            design_id: brick.design_id,
            priced_variations: priced,
            timestamp: time::now(),
        });

        self.cross_populate(&brick, "price update", None);
        Some(brick)
    }

    async fn find_price(
        &mut self,
        brick: &BrickRecord,
        palette: &[ColorRecord],
        force: bool,
    ) -> Option<PriceRecord> {
        for provider in self.providers.iter_mut() {
            let name = provider.name().to_string();
            let Some(source) = provider.as_prices() else {
                continue;
            };
            match source.update_price(brick, palette, force).await {
                Ok(Some(record)) => return Some(record),
                Ok(None) => debug!(provider = %name, design_id = brick.design_id, "No price guide"),
                Err(e) => skipped(&self.events, &name, "price", &e),
            }
        }
        None
    }

    /// Store `brick` in every brick provider except `origin`
    fn cross_populate(&mut self, brick: &BrickRecord, source: &str, origin: Option<usize>) {
        let mut stored = 0;
        for (index, provider) in self.providers.iter_mut().enumerate() {
            if Some(index) == origin {
                continue;
            }
            let name = provider.name().to_string();
            let Some(target) = provider.as_bricks() else {
                continue;
            };
            match target.store_brick(brick.clone()) {
                Ok(()) => stored += 1,
                Err(e) => warn!(provider = %name, design_id = brick.design_id, error = %e, "Cross-population failed"),
            }
        }

        if stored > 0 {
            self.events.emit_lossy(CacheEvent::CrossPopulated {
                design_id: brick.design_id,
                source: source.to_string(),
                providers: stored,
                timestamp: time::now(),
            });
        }
    }

    /// Persist every provider; all are attempted, the first failure is
    /// returned
    pub fn save(&self) -> CacheResult<()> {
        first_error(
            self.providers.iter().map(|p| (p.name().to_string(), p.save())),
            "save",
        )
    }

    pub async fn load(&mut self) -> CacheResult<()> {
        let mut results = Vec::with_capacity(self.providers.len());
        for provider in self.providers.iter_mut() {
            let result = provider.load().await;
            results.push((provider.name().to_string(), result));
        }
        first_error(results, "load")
    }

    pub async fn load_merge(&mut self) -> CacheResult<()> {
        let mut results = Vec::with_capacity(self.providers.len());
        for provider in self.providers.iter_mut() {
            let result = provider.load_merge().await;
            results.push((provider.name().to_string(), result));
        }
        first_error(results, "load_merge")
    }

    pub fn clear_index(&mut self) -> CacheResult<()> {
        let results: Vec<_> = self
            .providers
            .iter_mut()
            .map(|p| {
                let result = p.clear_index();
                (p.name().to_string(), result)
            })
            .collect();
        first_error(results, "clear_index")
    }

    pub fn clear_images(&mut self) -> CacheResult<()> {
        let results: Vec<_> = self
            .providers
            .iter_mut()
            .map(|p| {
                let result = p.clear_images();
                (p.name().to_string(), result)
            })
            .collect();
        first_error(results, "clear_images")
    }

    pub fn clear_all(&mut self) -> CacheResult<()> {
        let results: Vec<_> = self
            .providers
            .iter_mut()
            .map(|p| {
                let result = p.clear_all();
                (p.name().to_string(), result)
            })
            .collect();
        first_error(results, "clear_all")
    }

    /// Flush for teardown: `load_merge` then `save` on every provider
    ///
    /// Failures are logged; teardown always completes.
    pub async fn shutdown(mut self) {
        for provider in self.providers.iter_mut() {
            if let Err(e) = provider.load_merge().await {
                warn!(provider = provider.name(), error = %e, "Merge before shutdown failed");
            }
            if let Err(e) = provider.save() {
                error!(provider = provider.name(), error = %e, "Snapshot not saved at shutdown");
            }
        }
        info!(providers = self.providers.len(), "Brick catalog cache flushed");
    }
}

fn skipped(events: &EventBus, provider: &str, capability: &str, error: &CacheError) {
    warn!(provider, capability, error = %error, "Provider failed, trying next");
    events.emit_lossy(CacheEvent::ProviderSkipped {
        provider: provider.to_string(),
        capability: capability.to_string(),
        error: error.to_string(),
        timestamp: time::now(),
    });
}

fn first_error<I>(results: I, operation: &str) -> CacheResult<()>
where
    I: IntoIterator<Item = (String, CacheResult<()>)>,
{
    let mut first = None;
    for (provider, result) in results {
        if let Err(e) = result {
            warn!(provider = %provider, operation, error = %e, "Provider operation failed");
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}
