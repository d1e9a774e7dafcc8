//! Atomic file replacement

use crate::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Temp file used while replacing `target`
pub fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Replace `target` with `contents` (write temp file, fsync, rename).
///
/// A crash mid-write leaves the previous file intact. The temp file is
/// removed if the write itself fails.
pub fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp = temp_path_for(target);
    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp)?;
        file.write_all(contents)?;
        file.sync_all()
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }

    fs::rename(&temp, target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_target_and_cleans_temp() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("index.db");

        write_atomic(&target, b"first").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"first");
        assert!(!temp_dir.path().join("index.db.tmp").exists());
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("index.db");

        write_atomic(&target, b"first").unwrap();
        write_atomic(&target, b"second").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"second");
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("a").join("b").join("index.db");

        write_atomic(&target, b"nested").unwrap();
        assert!(target.exists());
    }
}
