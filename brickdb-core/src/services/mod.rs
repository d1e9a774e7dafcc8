//! Building blocks shared by the providers

pub mod entity_resolver;
pub mod http_transport;
pub mod image_store;
pub mod price_aggregator;
pub mod request_executor;
pub mod snapshot_store;

pub use entity_resolver::{resolve, MatchScore};
pub use http_transport::HttpTransport;
pub use image_store::{EncodedImage, ImageStore};
pub use price_aggregator::{aggregate, mean_band};
pub use request_executor::{RequestExecutor, RetryPolicy};
pub use snapshot_store::{MergeReport, RecordRefresher, SnapshotStore, INDEX_FILE};
