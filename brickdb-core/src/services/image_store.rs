//! On-disk reference images (`part-<id>.<ext>`)

use crate::error::{CacheError, CacheResult};
use crate::models::PartId;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use brickdb_common::fs::write_atomic;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const FILE_PREFIX: &str = "part-";
const FALLBACK_EXTENSION: &str = "dat";
const FALLBACK_MIME: &str = "application/octet-stream";

/// An image ready to hand to a front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub part_id: PartId,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl EncodedImage {
    /// `data:<mime>;base64,...`
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }
}

/// Image files of one provider
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
    min_edge_px: u32,
}

impl ImageStore {
    /// Images smaller than `min_edge_px` on either side count as placeholders
    pub fn new(dir: &Path, min_edge_px: u32) -> Self {
        Self {
            dir: dir.to_path_buf(),
            min_edge_px,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Existing file for `part_id`, whatever its extension
    pub fn find(&self, part_id: PartId) -> Option<PathBuf> {
        let prefix = format!("{FILE_PREFIX}{part_id}.");
        fs::read_dir(&self.dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix) && !n.ends_with(".tmp"))
            })
    }

    /// Store an image, replacing any earlier file for the same part
    ///
    /// The extension follows the sniffed content type.
    pub fn write(&self, part_id: PartId, bytes: &[u8]) -> CacheResult<PathBuf> {
        self.remove(part_id)?;
        let extension = infer::get(bytes)
            .map(|kind| kind.extension())
            .unwrap_or(FALLBACK_EXTENSION);
        let path = self.dir.join(format!("{FILE_PREFIX}{part_id}.{extension}"));
        write_atomic(&path, bytes)?;
        debug!(part_id, path = %path.display(), size = bytes.len(), "Image stored");
        Ok(path)
    }

    /// Stored image for `part_id`, if any
    pub fn read(&self, part_id: PartId) -> CacheResult<Option<EncodedImage>> {
        let Some(path) = self.find(part_id) else {
            return Ok(None);
        };
        let bytes = fs::read(&path)?;
        let mime = infer::get(&bytes)
            .map(|kind| kind.mime_type())
            .unwrap_or(FALLBACK_MIME)
            .to_string();
        Ok(Some(EncodedImage {
            part_id,
            mime,
            bytes,
        }))
    }

    /// Pixel dimensions of an encoded image
    pub fn dimensions(bytes: &[u8]) -> CacheResult<(u32, u32)> {
        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| CacheError::Image(e.to_string()))?
            .into_dimensions()
            .map_err(|e| CacheError::Image(e.to_string()))
    }

    /// Placeholder check: both edges below the threshold. Undecodable data
    /// counts as undersized; a wide or tall render with one short edge does
    /// not.
    pub fn is_undersized(&self, bytes: &[u8]) -> bool {
        match Self::dimensions(bytes) {
            Ok((width, height)) => width < self.min_edge_px && height < self.min_edge_px,
            Err(e) => {
                warn!(error = %e, "Image could not be decoded");
                true
            }
        }
    }

    pub fn remove(&self, part_id: PartId) -> CacheResult<()> {
        while let Some(path) = self.find(part_id) {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Delete every image file; returns how many were removed
    pub fn clear(&self) -> CacheResult<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX));
            if is_image && path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        image::RgbaImage::new(width, height)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_write_names_file_by_content_type() {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path(), 192);

        let path = store.write(300121, &png(4, 4)).unwrap();
        assert_eq!(path.file_name().unwrap(), "part-300121.png");

        let path = store.write(300121, b"not an image").unwrap();
        assert_eq!(path.file_name().unwrap(), "part-300121.dat");
        assert!(!dir.path().join("part-300121.png").exists());
    }

    #[test]
    fn test_read_sniffs_mime_and_encodes() {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path(), 192);
        store.write(300121, &png(2, 2)).unwrap();

        let image = store.read(300121).unwrap().unwrap();
        assert_eq!(image.mime, "image/png");
        assert!(image.to_data_uri().starts_with("data:image/png;base64,iVBOR"));
        assert!(store.read(300101).unwrap().is_none());
    }

    #[test]
    fn test_undersized_detection() {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path(), 192);

        assert!(store.is_undersized(&png(64, 64)));
        assert!(store.is_undersized(&png(191, 191)));
        assert!(!store.is_undersized(&png(256, 100)));
        assert!(!store.is_undersized(&png(400, 150)));
        assert!(!store.is_undersized(&png(150, 400)));
        assert!(!store.is_undersized(&png(192, 200)));
        assert!(store.is_undersized(b"garbage"));
    }

    #[test]
    fn test_clear_only_touches_images() {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path(), 192);
        store.write(1, &png(1, 1)).unwrap();
        store.write(2, &png(1, 1)).unwrap();
        std::fs::write(dir.path().join("index.db"), b"{}").unwrap();

        assert_eq!(store.clear().unwrap(), 2);
        assert!(dir.path().join("index.db").exists());
        assert!(store.find(1).is_none());
    }
}
