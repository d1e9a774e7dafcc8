//! Price-guide provider: per-color market prices from a second source
//!
//! The source labels colors in its own vocabulary. Each row is resolved to a
//! canonical color from the palette the manager passes in; rows that do not
//! resolve are kept with their label so a later refresh can still map them.

use crate::error::{CacheResult, RequestError};
use crate::models::{BrickRecord, CatalogTables, ColorQuote, ColorRecord, DesignId, PriceRecord};
use crate::services::entity_resolver;
use crate::services::price_aggregator;
use crate::services::request_executor::RequestExecutor;
use crate::services::snapshot_store::{RecordRefresher, SnapshotStore};
use crate::types::{PriceGuideExtractor, PriceSource, Provider};
use async_trait::async_trait;
use brickdb_common::config::{expand_template, PriceGuideConfig};
use brickdb_common::{time, CacheEvent, EventBus};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Provider name, also the snapshot subdirectory
pub const PRICE_GUIDE_PROVIDER: &str = "price-guide";

pub struct PriceGuideProvider {
    tables: CatalogTables,
    fetcher: PriceFetcher,
    store: SnapshotStore,
}

struct PriceFetcher {
    config: PriceGuideConfig,
    executor: RequestExecutor,
    extractor: Arc<dyn PriceGuideExtractor>,
    events: EventBus,
}

impl PriceGuideProvider {
    /// Provider storing under `<root>/price-guide`; nothing is loaded yet
    pub fn new(
        root: &Path,
        config: PriceGuideConfig,
        executor: RequestExecutor,
        extractor: Arc<dyn PriceGuideExtractor>,
        events: EventBus,
    ) -> CacheResult<Self> {
        let dir = root.join(PRICE_GUIDE_PROVIDER);
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            tables: CatalogTables::default(),
            store: SnapshotStore::new(PRICE_GUIDE_PROVIDER, &dir, events.clone()),
            fetcher: PriceFetcher {
                config,
                executor,
                extractor,
                events,
            },
        })
    }

    /// `new` followed by a load of the existing snapshot
    pub async fn open(
        root: &Path,
        config: PriceGuideConfig,
        executor: RequestExecutor,
        extractor: Arc<dyn PriceGuideExtractor>,
        events: EventBus,
    ) -> CacheResult<Self> {
        let mut provider = Self::new(root, config, executor, extractor, events)?;
        if let Err(e) = provider.load().await {
            warn!(provider = PRICE_GUIDE_PROVIDER, error = %e, "Starting with an empty price guide");
        }
        Ok(provider)
    }

    pub fn tables(&self) -> &CatalogTables {
        &self.tables
    }
}

impl PriceFetcher {
    /// Download and resolve the guide for one design
    ///
    /// Labels the palette cannot resolve keep the color `previous` had
    /// mapped them to.
    async fn fetch(
        &self,
        design_id: DesignId,
        palette: &[ColorRecord],
        previous: Option<&PriceRecord>,
    ) -> Result<PriceRecord, RequestError> {
        self.events.emit_lossy(CacheEvent::FetchStarted {
            provider: PRICE_GUIDE_PROVIDER.to_string(),
            id: design_id,
            timestamp: time::now(),
        });

        let url = expand_template(&self.config.price_url, design_id);
        let html = self.executor.download_text("price guide", &url).await?;
        let rows = self.extractor.price_rows(&html)?;

        let quotes: Vec<ColorQuote> = rows
            .into_iter()
            .map(|row| {
                let color_id = entity_resolver::resolve(&row.color_label, palette)
                    .map(|c| c.id)
                    .or_else(|| {
                        previous.and_then(|p| {
                            p.quotes
                                .iter()
                                .find(|q| q.label == row.color_label)
                                .and_then(|q| q.color_id)
                        })
                    });
                if color_id.is_none() {
                    debug!(design_id, label = %row.color_label, "Unresolved color label");
                }
                ColorQuote {
                    band: price_aggregator::aggregate(&row.observations),
                    label: row.color_label,
                    color_id,
                }
            })
            .collect();

        self.events.emit_lossy(CacheEvent::FetchCompleted {
            provider: PRICE_GUIDE_PROVIDER.to_string(),
            id: design_id,
            variations: quotes.len(),
            failed_variations: quotes.iter().filter(|q| q.color_id.is_none()).count(),
            timestamp: time::now(),
        });

        Ok(PriceRecord {
            design_id,
            fetched_at: time::now(),
            quotes,
        })
    }

    fn failed(&self, design_id: DesignId, error: &RequestError) {
        warn!(provider = PRICE_GUIDE_PROVIDER, design_id, error = %error, "Price guide fetch failed");
        self.events.emit_lossy(CacheEvent::FetchFailed {
            provider: PRICE_GUIDE_PROVIDER.to_string(),
            id: design_id,
            error: error.to_string(),
            timestamp: time::now(),
        });
    }
}

#[async_trait]
impl RecordRefresher for PriceFetcher {
    async fn refresh_brick(&mut self, _tables: &mut CatalogTables, design_id: DesignId) {
        debug!(design_id, "Price guide keeps no bricks");
    }

    async fn refresh_price(&mut self, tables: &mut CatalogTables, design_id: DesignId) {
        let previous = tables.prices.remove(&design_id);
        match self.fetch(design_id, &[], previous.as_ref()).await {
            Ok(record) => {
                tables.prices.insert(design_id, record);
            }
            Err(e) => self.failed(design_id, &e),
        }
    }
}

#[async_trait]
impl PriceSource for PriceGuideProvider {
    async fn update_price(
        &mut self,
        brick: &BrickRecord,
        palette: &[ColorRecord],
        force: bool,
    ) -> CacheResult<Option<PriceRecord>> {
        let design_id = brick.design_id;
        let ttl = self.ttl();

        if !force {
            if let Some(cached) = self.tables.prices.get(&design_id) {
                if !time::is_stale(cached.fetched_at, ttl, time::now()) {
                    debug!(design_id, "Price guide still fresh");
                    return Ok(Some(cached.clone()));
                }
            }
        }

        info!(design_id, force, "Fetching price guide");
        let previous = self.tables.prices.get(&design_id);
        match self.fetcher.fetch(design_id, palette, previous).await {
            Ok(record) => {
                self.tables.prices.insert(design_id, record.clone());
                if let Err(e) = self.store.save(&self.tables) {
                    warn!(provider = PRICE_GUIDE_PROVIDER, error = %e, "Failed to save snapshot");
                }
                Ok(Some(record))
            }
            Err(e) => {
                self.fetcher.failed(design_id, &e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Provider for PriceGuideProvider {
    fn name(&self) -> &str {
        PRICE_GUIDE_PROVIDER
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
        Ok(())
    }

    fn clear_images(&mut self) -> CacheResult<()> {
        Ok(())
    }

    fn as_prices(&mut self) -> Option<&mut dyn PriceSource> {
        Some(self)
    }
}
