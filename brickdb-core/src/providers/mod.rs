//! Concrete data sources
//!
//! Each provider owns its tables and its snapshot directory
//! (`<cache root>/<provider name>/`).

pub mod catalog;
pub mod price_guide;

pub use catalog::{CatalogProvider, CATALOG_PROVIDER};
pub use price_guide::{PriceGuideProvider, PRICE_GUIDE_PROVIDER};
