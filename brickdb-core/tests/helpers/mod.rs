//! Test Helper Utilities
//!
//! Shared utilities for testing brickdb-core: a scripted transport serving
//! canned pages, line-based fake extractors, stub providers and record
//! fixtures.

#![allow(dead_code)]

pub mod log_capture;

pub use log_capture::{capture_logs, LogCapture};

use async_trait::async_trait;
use brickdb_common::config::{CatalogSourceConfig, PriceGuideConfig};
use brickdb_common::EventBus;
use brickdb_core::error::{CacheError, CacheResult, RequestError};
use brickdb_core::models::{
    BrickRecord, CatalogId, ColorRecord, DesignId, PartId, PriceBand, VariationRecord,
};
use brickdb_core::providers::{CatalogProvider, PriceGuideProvider};
use brickdb_core::services::{RequestExecutor, RetryPolicy};
use brickdb_core::types::{
    BrickSource, CatalogExtractor, PriceGuideExtractor, Provider, RawDesign, RawPart, RawPriceRow,
    Transport,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Scripted transport
// ============================================================================

#[derive(Default)]
struct Route {
    failures: VecDeque<u16>,
    body: Option<Vec<u8>>,
}

/// Serves canned bodies per URL; unknown URLs answer 404
///
/// Every request is counted per URL, resets are counted too.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Route>>,
    hits: Mutex<HashMap<String, usize>>,
    resets: AtomicUsize,
    reachable: Mutex<bool>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        let transport = Self::default();
        *transport.reachable.lock().unwrap() = true;
        Arc::new(transport)
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.routes.lock().unwrap().entry(url.to_string()).or_default().body = Some(body.into());
    }

    /// Answer the next requests to `url` with these statuses first
    pub fn fail_next(&self, url: &str, statuses: &[u16]) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .failures
            .extend(statuses.iter().copied());
    }

    pub fn unserve(&self, url: &str) {
        self.routes.lock().unwrap().remove(url);
    }

    pub fn set_reachable(&self, reachable: bool) {
        *self.reachable.lock().unwrap() = reachable;
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn hits_with_prefix(&self, prefix: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.starts_with(prefix))
            .map(|(_, n)| n)
            .sum()
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    fn answer(&self, url: &str) -> Result<Vec<u8>, RequestError> {
        *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;

        let mut routes = self.routes.lock().unwrap();
        let not_found = RequestError::Status {
            status: 404,
            url: url.to_string(),
        };
        let Some(route) = routes.get_mut(url) else {
            return Err(not_found);
        };
        if let Some(status) = route.failures.pop_front() {
            return Err(RequestError::Status {
                status,
                url: url.to_string(),
            });
        }
        route.body.clone().ok_or(not_found)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn download_text(&self, url: &str) -> Result<String, RequestError> {
        self.answer(url)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn download_bytes(&self, url: &str) -> Result<Vec<u8>, RequestError> {
        self.answer(url)
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    async fn probe(&self, _url: &str) -> bool {
        *self.reachable.lock().unwrap()
    }
}

// ============================================================================
// Fake extractors (key=value lines)
// ============================================================================

fn fields(html: &str) -> Vec<(&str, &str)> {
    html.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

fn field<'a>(html: &'a str, key: &str) -> Option<&'a str> {
    fields(html).into_iter().find(|(k, _)| *k == key).map(|(_, v)| v)
}

fn required<'a>(html: &'a str, key: &str) -> Result<&'a str, RequestError> {
    field(html, key).ok_or_else(|| RequestError::Extraction(format!("missing {key}")))
}

pub struct FakeCatalogExtractor;

impl CatalogExtractor for FakeCatalogExtractor {
    fn design(&self, html: &str) -> Result<RawDesign, RequestError> {
        Ok(RawDesign {
            name: required(html, "name")?.to_string(),
            category: field(html, "category").unwrap_or_default().to_string(),
            production_years: field(html, "years").unwrap_or_default().to_string(),
            parts: fields(html)
                .into_iter()
                .filter(|(k, _)| *k == "part")
                .map(|(_, v)| v.parse().ok())
                .collect(),
        })
    }

    fn part(&self, html: &str) -> Result<RawPart, RequestError> {
        Ok(RawPart {
            color_id: required(html, "color_id")?
                .parse()
                .map_err(|_| RequestError::Extraction("color_id".to_string()))?,
            color_name: required(html, "color_name")?.to_string(),
            color_family: field(html, "family").unwrap_or_default().to_string(),
            color_type: field(html, "type").unwrap_or("Solid").to_string(),
            color_rgba: field(html, "rgba").unwrap_or_default().to_string(),
            production_years: field(html, "years").unwrap_or_default().to_string(),
        })
    }

    fn buy_prices(&self, html: &str) -> Vec<f64> {
        fields(html)
            .into_iter()
            .filter(|(k, _)| *k == "price")
            .filter_map(|(_, v)| v.parse().ok())
            .collect()
    }

    fn design_of_part(&self, html: &str) -> Result<DesignId, RequestError> {
        required(html, "design")?
            .parse()
            .map_err(|_| RequestError::Extraction("design".to_string()))
    }
}

/// Rows look like `row=Dark Bluish Gray:0.10,0.30`
pub struct FakePriceExtractor;

impl PriceGuideExtractor for FakePriceExtractor {
    fn price_rows(&self, html: &str) -> Result<Vec<RawPriceRow>, RequestError> {
        fields(html)
            .into_iter()
            .filter(|(k, _)| *k == "row")
            .map(|(_, v)| {
                let (label, prices) = v
                    .split_once(':')
                    .ok_or_else(|| RequestError::Extraction(format!("bad row {v}")))?;
                Ok(RawPriceRow {
                    color_label: label.to_string(),
                    observations: prices.split(',').filter_map(|p| p.trim().parse().ok()).collect(),
                })
            })
            .collect()
    }
}

// ============================================================================
// Canned catalog site
// ============================================================================

pub const CATALOG: &str = "https://catalog.test";
pub const PRICES: &str = "https://prices.test";

pub fn catalog_config() -> CatalogSourceConfig {
    CatalogSourceConfig {
        ttl_secs: 3600,
        design_url: format!("{CATALOG}/design/{{id}}"),
        part_url: format!("{CATALOG}/part/{{id}}"),
        buy_url: format!("{CATALOG}/buy/{{id}}"),
        image_url: format!("{CATALOG}/img/{{id}}"),
        probe_url: format!("{CATALOG}/"),
        min_image_px: 192,
        headers: BTreeMap::new(),
    }
}

pub fn price_config() -> PriceGuideConfig {
    PriceGuideConfig {
        ttl_secs: 3600,
        price_url: format!("{PRICES}/guide/{{id}}"),
        probe_url: format!("{PRICES}/"),
        headers: BTreeMap::new(),
    }
}

pub fn design_url(id: DesignId) -> String {
    format!("{CATALOG}/design/{id}")
}

pub fn part_url(id: PartId) -> String {
    format!("{CATALOG}/part/{id}")
}

pub fn buy_url(id: PartId) -> String {
    format!("{CATALOG}/buy/{id}")
}

pub fn image_url(id: PartId) -> String {
    format!("{CATALOG}/img/{id}")
}

pub fn guide_url(id: DesignId) -> String {
    format!("{PRICES}/guide/{id}")
}

/// A color molding served by the fake catalog
#[derive(Debug, Clone)]
pub struct FakePart {
    pub part_id: PartId,
    pub color_id: i32,
    pub color_name: &'static str,
    pub prices: Vec<f64>,
}

impl FakePart {
    pub fn new(part_id: PartId, color_id: i32, color_name: &'static str) -> Self {
        Self {
            part_id,
            color_id,
            color_name,
            prices: vec![0.10, 0.30],
        }
    }
}

/// Serve a design page plus part, buy and image pages for every part
pub fn serve_design(transport: &ScriptedTransport, design_id: DesignId, name: &str, parts: &[FakePart]) {
    let mut page = format!("name={name}\ncategory=Bricks\nyears=1958 - 2024\n");
    for part in parts {
        page.push_str(&format!("part={}\n", part.part_id));
        serve_part(transport, design_id, part);
    }
    transport.serve(&design_url(design_id), page);
}

pub fn serve_part(transport: &ScriptedTransport, design_id: DesignId, part: &FakePart) {
    transport.serve(
        &part_url(part.part_id),
        format!(
            "color_id={}\ncolor_name={}\nfamily=Basic\nrgba=#C91A09\nyears=2001 - 2024\ndesign={design_id}\n",
            part.color_id, part.color_name
        ),
    );
    let prices: String = part.prices.iter().map(|p| format!("price={p}\n")).collect();
    transport.serve(&buy_url(part.part_id), prices);
    transport.serve(&image_url(part.part_id), png(256, 256));
}

/// Encoded PNG of the given size
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::RgbaImage::new(width, height)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn executor(transport: Arc<ScriptedTransport>, events: &EventBus) -> RequestExecutor {
    RequestExecutor::new(transport, RetryPolicy::immediate(3), events.clone())
}

pub fn catalog_provider(
    root: &Path,
    transport: Arc<ScriptedTransport>,
    events: &EventBus,
) -> CatalogProvider {
    CatalogProvider::new(
        root,
        catalog_config(),
        executor(transport, events),
        Arc::new(FakeCatalogExtractor),
        events.clone(),
    )
    .unwrap()
}

pub fn price_provider(
    root: &Path,
    transport: Arc<ScriptedTransport>,
    events: &EventBus,
) -> PriceGuideProvider {
    PriceGuideProvider::new(
        root,
        price_config(),
        executor(transport, events),
        Arc::new(FakePriceExtractor),
        events.clone(),
    )
    .unwrap()
}

// ============================================================================
// Record fixtures
// ============================================================================

pub fn brick(design_id: DesignId, fetched_at: DateTime<Utc>, colors: &[i32]) -> BrickRecord {
    BrickRecord {
        design_id,
        name: format!("Design {design_id}"),
        category: "Bricks".to_string(),
        fetched_at,
        production_years: vec![1958, 2024],
        variations: Some(
            colors
                .iter()
                .map(|&color_id| VariationRecord {
                    part_id: 100_000 + design_id * 100 + color_id,
                    color_id,
                    production_years: vec![2001],
                    price: PriceBand::UNKNOWN,
                })
                .collect(),
        ),
        empty_refreshes: 0,
    }
}

pub fn color(id: i32, name: &str, fetched_at: DateTime<Utc>) -> ColorRecord {
    ColorRecord {
        id,
        name: name.to_string(),
        family: "Basic".to_string(),
        kind: "Solid".to_string(),
        rgba_hex: "#FFFFFF".to_string(),
        fetched_at,
    }
}

pub fn hours(n: i64) -> chrono::Duration {
    chrono::Duration::hours(n)
}

pub const TTL: Duration = Duration::from_secs(3600);

// ============================================================================
// Stub provider
// ============================================================================

/// How a `StubProvider` answers brick lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubMode {
    Answer,
    Miss,
    Fail,
}

/// In-memory brick provider; its table is shared so tests can inspect it
/// after handing the provider to a manager
pub struct StubProvider {
    pub name: String,
    pub mode: StubMode,
    pub bricks: Arc<Mutex<BTreeMap<DesignId, BrickRecord>>>,
    pub lookups: Arc<AtomicUsize>,
    pub reachable: bool,
}

impl StubProvider {
    pub fn new(name: &str, mode: StubMode) -> Self {
        Self {
            name: name.to_string(),
            mode,
            bricks: Arc::new(Mutex::new(BTreeMap::new())),
            lookups: Arc::new(AtomicUsize::new(0)),
            reachable: true,
        }
    }

    pub fn with_brick(self, brick: BrickRecord) -> Self {
        self.bricks.lock().unwrap().insert(brick.design_id, brick);
        self
    }
}

#[async_trait]
impl BrickSource for StubProvider {
    async fn brick(&mut self, id: CatalogId) -> CacheResult<Option<BrickRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            StubMode::Fail => Err(CacheError::Request(RequestError::Status {
                status: 503,
                url: format!("stub://{}/{}", self.name, id.raw()),
            })),
            StubMode::Miss => Ok(None),
            StubMode::Answer => Ok(self.bricks.lock().unwrap().get(&id.raw()).cloned()),
        }
    }

    fn store_brick(&mut self, brick: BrickRecord) -> CacheResult<()> {
        self.bricks.lock().unwrap().insert(brick.design_id, brick);
        Ok(())
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn ttl(&self) -> Duration {
        TTL
    }

    async fn can_operate(&self) -> bool {
        self.reachable
    }

    fn save(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn load(&mut self) -> CacheResult<()> {
        Ok(())
    }

    async fn load_merge(&mut self) -> CacheResult<()> {
        Ok(())
    }

    fn clear_index(&mut self) -> CacheResult<()> {
        self.bricks.lock().unwrap().clear();
        Ok(())
    }

    fn clear_images(&mut self) -> CacheResult<()> {
        Ok(())
    }

    fn as_bricks(&mut self) -> Option<&mut dyn BrickSource> {
        Some(self)
    }
}
