//! Configuration loading and cache directory resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "BRICKDB_CACHE_DIR";

/// Placeholder substituted with a record id in URL templates
pub const ID_PLACEHOLDER: &str = "{id}";

/// Top-level cache configuration (TOML)
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root; providers persist into `<cache_dir>/<provider>/`
    pub cache_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub retry: RetryConfig,
    pub http: HttpConfig,
    pub catalog: CatalogSourceConfig,
    pub price_guide: PriceGuideConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (`RUST_LOG` wins when set)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Resilient request settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per request, including the first one
    pub attempts: u32,
    /// Total back-off budget, split evenly across attempts
    pub budget_ms: u64,
    /// Pause after the final failed attempt before giving up
    pub cooldown_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            budget_ms: 9_000,
            cooldown_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Delay after each retryable failure (`budget / attempts`)
    pub fn per_attempt_delay(&self) -> Duration {
        Duration::from_millis(self.budget_ms / u64::from(self.attempts.max(1)))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// HTTP transport settings shared by all sources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    /// Token bucket refill rate per source
    pub requests_per_second: u32,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("brickdb/{}", env!("CARGO_PKG_VERSION")),
            requests_per_second: 2,
            timeout_secs: 30,
        }
    }
}

/// Catalog source (designs, parts, colors, images, buy-page prices)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CatalogSourceConfig {
    pub ttl_secs: u64,
    pub design_url: String,
    pub part_url: String,
    pub buy_url: String,
    pub image_url: String,
    pub probe_url: String,
    /// Reference images with both edges below this length are placeholders
    pub min_image_px: u32,
    /// Static headers sent with every page request
    pub headers: BTreeMap<String, String>,
}

impl Default for CatalogSourceConfig {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("x-requested-with".to_string(), "XMLHttpRequest".to_string());
        headers.insert(
            "cookie".to_string(),
            "PreferredCountry2=CountryCode=DE&CountryName=Germany; setsPageLength=200; \
             buyPageLength=200; partsPageLength=200; buySortOrder=Price; \
             cookieconsent_dismissed=yes"
                .to_string(),
        );

        Self {
            ttl_secs: 60 * 60 * 12,
            design_url: "https://brickset.com/parts/design-{id}".to_string(),
            part_url: "https://brickset.com/parts/{id}/".to_string(),
            buy_url: "https://brickset.com/ajax/parts/buy?partID={id}".to_string(),
            image_url: "https://images.brickset.com/parts/2/{id}.jpg".to_string(),
            probe_url: "https://brickset.com/".to_string(),
            min_image_px: 192,
            headers,
        }
    }
}

impl CatalogSourceConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Price-guide source (per-color market prices for a design)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PriceGuideConfig {
    pub ttl_secs: u64,
    pub price_url: String,
    pub probe_url: String,
    pub headers: BTreeMap<String, String>,
}

impl Default for PriceGuideConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60 * 60 * 24,
            price_url: "https://www.bricklink.com/catalogPG.asp?P={id}".to_string(),
            probe_url: "https://www.bricklink.com/".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

impl PriceGuideConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl CacheConfig {
    /// Load configuration from a TOML file
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged. A present but malformed file is a `Config` error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

        config.validate()?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Reject settings the cache cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.retry.attempts == 0 {
            return Err(Error::Config("retry.attempts must be at least 1".to_string()));
        }
        if self.http.requests_per_second == 0 {
            return Err(Error::Config(
                "http.requests_per_second must be at least 1".to_string(),
            ));
        }

        let templates = [
            ("catalog.design_url", &self.catalog.design_url),
            ("catalog.part_url", &self.catalog.part_url),
            ("catalog.buy_url", &self.catalog.buy_url),
            ("catalog.image_url", &self.catalog.image_url),
            ("price_guide.price_url", &self.price_guide.price_url),
        ];
        for (key, template) in templates {
            if !template.contains(ID_PLACEHOLDER) {
                return Err(Error::Config(format!(
                    "{} must contain the {} placeholder",
                    key, ID_PLACEHOLDER
                )));
            }
        }

        Ok(())
    }
}

/// Write configuration atomically (temp file + rename)
pub fn write_config(config: &CacheConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    crate::fs::write_atomic(path, content.as_bytes())
}

/// Substitute `{id}` in a URL template
pub fn expand_template(template: &str, id: i32) -> String {
    template.replace(ID_PLACEHOLDER, &id.to_string())
}

/// Default configuration file location (`<config_dir>/brickdb/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("brickdb").join("config.toml"))
}

/// Cache directory resolution, highest priority first:
/// 1. Explicit argument
/// 2. `BRICKDB_CACHE_DIR` environment variable
/// 3. `cache_dir` from the TOML config
/// 4. Platform cache directory (`<cache_dir>/brickdb`)
pub fn resolve_cache_dir(explicit: Option<&Path>, config: &CacheConfig) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(CACHE_DIR_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.cache_dir {
        return path.clone();
    }

    default_cache_dir()
}

/// OS-dependent default cache directory
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("brickdb"))
        .unwrap_or_else(|| PathBuf::from("./brickdb_cache"))
}
