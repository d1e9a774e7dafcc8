//! Snapshot persistence for one provider's tables
//!
//! The file is a single self-describing JSON document (`index.db`) replaced
//! atomically on every save. Loading never mutates memory until the whole
//! file has parsed, so a corrupt snapshot leaves the tables exactly as they
//! were.
//!
//! **Merge precedence:** for bricks and prices the record with the newer
//! `fetched_at` wins (ties keep the in-memory copy); colors follow the same
//! rule.
//!
//! **TTL sweep (after merge):** every stale brick, every incomplete brick and
//! one brick per stale color is re-fetched exactly once through a
//! `RecordRefresher`; stale price guides are refreshed the same way. Bricks
//! with a non-positive design id or without a variation list are then
//! dropped.

use crate::error::{CacheError, CacheResult};
use crate::models::{CatalogTables, DesignId, Snapshot, SNAPSHOT_FORMAT, SNAPSHOT_VERSION};
use async_trait::async_trait;
use brickdb_common::{fs as atomic, time, CacheEvent, EventBus};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Snapshot file name inside a provider's directory
pub const INDEX_FILE: &str = "index.db";

/// Re-fetches single records during the post-load sweep
///
/// Implementations update `tables` in place. A failed refresh removes the
/// record; it never aborts the sweep.
#[async_trait]
pub trait RecordRefresher: Send {
    async fn refresh_brick(&mut self, tables: &mut CatalogTables, design_id: DesignId);

    async fn refresh_price(&mut self, tables: &mut CatalogTables, design_id: DesignId);
}

/// Counts from one load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Records taken from the file
    pub merged: usize,
    /// Records kept in memory because they were at least as fresh
    pub kept: usize,
    pub refreshed: usize,
    pub pruned: usize,
}

/// Reads and writes one provider's snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    provider: String,
    path: PathBuf,
    events: EventBus,
}

impl SnapshotStore {
    /// Store for `<dir>/index.db`
    pub fn new(provider: impl Into<String>, dir: &Path, events: EventBus) -> Self {
        Self {
            provider: provider.into(),
            path: dir.join(INDEX_FILE),
            events,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Atomically replace the snapshot with the current tables
    pub fn save(&self, tables: &CatalogTables) -> CacheResult<()> {
        let snapshot = tables.to_snapshot();
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(brickdb_common::Error::from)?;
        atomic::write_atomic(&self.path, &bytes)?;

        debug!(
            provider = %self.provider,
            path = %self.path.display(),
            bricks = snapshot.bricks.len(),
            colors = snapshot.colors.len(),
            "Snapshot saved"
        );
        self.events.emit_lossy(CacheEvent::SnapshotSaved {
            provider: self.provider.clone(),
            bricks: snapshot.bricks.len(),
            colors: snapshot.colors.len(),
            prices: snapshot.prices.len(),
            timestamp: time::now(),
        });
        Ok(())
    }

    /// Parse the snapshot file; `None` when there is none
    pub fn read(&self) -> CacheResult<Option<Snapshot>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.reject(e.to_string())),
        };

        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| self.reject(e.to_string()))?;

        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(self.reject(format!("unknown format marker '{}'", snapshot.format)));
        }
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(self.reject(format!("unsupported version {}", snapshot.version)));
        }

        Ok(Some(snapshot))
    }

    /// Delete the snapshot file (missing file is fine)
    pub fn delete(&self) -> CacheResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Merge the file into `tables`, then run the TTL sweep
    ///
    /// No-op when the file does not exist. On a corrupt file `tables` is
    /// untouched and `CorruptSnapshot` is returned.
    pub async fn load_merge<R>(
        &self,
        tables: &mut CatalogTables,
        ttl: Duration,
        refresher: &mut R,
    ) -> CacheResult<MergeReport>
    where
        R: RecordRefresher + ?Sized,
    {
        let Some(snapshot) = self.read()? else {
            debug!(provider = %self.provider, path = %self.path.display(), "No snapshot to load");
            return Ok(MergeReport::default());
        };

        let (bricks, colors, prices) = (
            snapshot.bricks.len(),
            snapshot.colors.len(),
            snapshot.prices.len(),
        );
        let mut report = merge_into(snapshot, tables);

        self.events.emit_lossy(CacheEvent::SnapshotLoaded {
            provider: self.provider.clone(),
            bricks,
            colors,
            prices,
            timestamp: time::now(),
        });

        let now = time::now();
        let (stale_bricks, stale_prices) = stale_records(tables, ttl, now);
        for design_id in stale_bricks {
            refresher.refresh_brick(tables, design_id).await;
            self.refreshed(design_id);
            report.refreshed += 1;
        }
        for design_id in stale_prices {
            refresher.refresh_price(tables, design_id).await;
            self.refreshed(design_id);
            report.refreshed += 1;
        }

        report.pruned = prune(tables);

        info!(
            provider = %self.provider,
            merged = report.merged,
            kept = report.kept,
            refreshed = report.refreshed,
            pruned = report.pruned,
            "Snapshot merged"
        );
        Ok(report)
    }

    /// Replace `tables` with the file's contents (merge into empty tables)
    ///
    /// On failure the previous tables are restored.
    pub async fn load<R>(
        &self,
        tables: &mut CatalogTables,
        ttl: Duration,
        refresher: &mut R,
    ) -> CacheResult<MergeReport>
    where
        R: RecordRefresher + ?Sized,
    {
        let backup = std::mem::take(tables);
        match self.load_merge(tables, ttl, refresher).await {
            Ok(report) => Ok(report),
            Err(e) => {
                *tables = backup;
                Err(e)
            }
        }
    }

    fn refreshed(&self, design_id: DesignId) {
        self.events.emit_lossy(CacheEvent::RecordRefreshed {
            provider: self.provider.clone(),
            id: design_id,
            timestamp: time::now(),
        });
    }

    fn reject(&self, reason: String) -> CacheError {
        warn!(
            provider = %self.provider,
            path = %self.path.display(),
            reason = %reason,
            "Snapshot rejected, keeping in-memory tables"
        );
        self.events.emit_lossy(CacheEvent::SnapshotRejected {
            provider: self.provider.clone(),
            reason: reason.clone(),
            timestamp: time::now(),
        });
        CacheError::CorruptSnapshot {
            path: self.path.display().to_string(),
            reason,
        }
    }
}

/// Fold a parsed snapshot into `tables`; newer `fetched_at` wins
pub fn merge_into(snapshot: Snapshot, tables: &mut CatalogTables) -> MergeReport {
    let mut report = MergeReport::default();

    for brick in snapshot.bricks {
        take_newer(&mut tables.bricks, brick.design_id, brick, |b| b.fetched_at, &mut report);
    }
    for color in snapshot.colors {
        take_newer(&mut tables.colors, color.id, color, |c| c.fetched_at, &mut report);
    }
    for price in snapshot.prices {
        take_newer(&mut tables.prices, price.design_id, price, |p| p.fetched_at, &mut report);
    }

    report
}

fn take_newer<V>(
    table: &mut std::collections::BTreeMap<i32, V>,
    key: i32,
    incoming: V,
    fetched_at: impl Fn(&V) -> DateTime<Utc>,
    report: &mut MergeReport,
) {
    match table.get(&key) {
        Some(current) if fetched_at(current) >= fetched_at(&incoming) => report.kept += 1,
        _ => {
            table.insert(key, incoming);
            report.merged += 1;
        }
    }
}

/// Designs whose brick and price records need a re-fetch, deduplicated
pub fn stale_records(
    tables: &CatalogTables,
    ttl: Duration,
    now: DateTime<Utc>,
) -> (BTreeSet<DesignId>, BTreeSet<DesignId>) {
    let mut bricks: BTreeSet<DesignId> = tables
        .bricks
        .values()
        .filter(|b| b.is_present())
        .filter(|b| time::is_stale(b.fetched_at, ttl, now) || b.is_incomplete())
        .map(|b| b.design_id)
        .collect();

    // A color is only ever learned through a brick, so refreshing one brick
    // that uses it refreshes the color
    for color in tables.colors.values() {
        if time::is_stale(color.fetched_at, ttl, now) {
            if let Some(design_id) = tables.design_with_color(color.id) {
                bricks.insert(design_id);
            }
        }
    }

    let prices = tables
        .prices
        .values()
        .filter(|p| p.design_id > 0 && time::is_stale(p.fetched_at, ttl, now))
        .map(|p| p.design_id)
        .collect();

    (bricks, prices)
}

/// Drop bricks that can never be served; returns how many went
pub fn prune(tables: &mut CatalogTables) -> usize {
    let before = tables.bricks.len();
    tables
        .bricks
        .retain(|_, b| b.is_present() && b.variations.is_some());
    tables.prices.retain(|id, _| *id > 0);
    before - tables.bricks.len()
}
