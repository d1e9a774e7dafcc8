//! # brickdb core
//!
//! Federated cache for brick catalog data. Providers wrap external sources
//! (a catalog with bricks, colors and images; a price guide), keep their
//! records in memory with a TTL, and persist them as per-provider snapshots.
//! The [`CacheManager`] queries providers by capability in registration
//! order and cross-populates resolved bricks.
//!
//! Modules:
//! - `models`: records, identifiers and the snapshot container
//! - `types`: capability and collaborator traits
//! - `services`: request executor, entity resolver, price aggregator,
//!   snapshot and image stores, HTTP transport
//! - `providers`: catalog and price-guide providers
//! - `manager`: the fallback/cross-population front

pub mod error;
pub mod manager;
pub mod models;
pub mod providers;
pub mod services;
pub mod types;

pub use error::{CacheError, CacheResult, RequestError};
pub use manager::CacheManager;
pub use models::{BrickRecord, CatalogId, ColorRecord, PriceBand, PriceRecord, VariationRecord};
pub use services::EncodedImage;
