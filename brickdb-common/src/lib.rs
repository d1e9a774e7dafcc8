//! # brickdb common library
//!
//! Shared plumbing for the brick catalog cache:
//! - Error and result types
//! - Configuration loading and cache directory resolution
//! - Diagnostic event bus (the observer the core reports through)
//! - Logging initialisation
//! - Atomic file replacement and timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod fs;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
pub use events::{CacheEvent, EventBus};
