//! Read-only tile storage addressed by `<root>/<layer>/<z>/<x>/<y>.jpeg`

use std::fs;
use std::io;

use super::tile::TileKey;
use crate::error::{MapError, Result};

/// Source of raw tile bytes
///
/// `load` blocks on storage I/O and never retries; retry policy belongs to the caller.
pub trait TileStore: Send + Sync {
    fn load(&self, key: &TileKey) -> Result<Vec<u8>>;
}

/// Tile tree on a mounted filesystem (SD card)
#[derive(Clone, Debug)]
pub struct FsTileStore {
    maps_root: String,
    layer: String,
}

impl FsTileStore {
    pub fn new(maps_root: impl Into<String>, layer: impl Into<String>) -> Self {
        let maps_root: String = maps_root.into();
        Self {
            maps_root: maps_root.trim_end_matches('/').to_string(),
            layer: layer.into(),
        }
    }

    /// Storage path of a tile
    pub fn tile_path(&self, key: &TileKey) -> String {
        format!(
            "{}/{}/{}/{}/{}.jpeg",
            self.maps_root, self.layer, key.zoom, key.x, key.y
        )
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }
}

impl TileStore for FsTileStore {
    fn load(&self, key: &TileKey) -> Result<Vec<u8>> {
        let path = self.tile_path(key);
        match fs::read(&path) {
            Ok(bytes) => {
                log::debug!("Read tile {} ({} bytes) from {}", key, bytes.len(), path);
                Ok(bytes)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(MapError::TileNotFound(*key)),
            Err(source) => Err(MapError::TileIo { key: *key, source }),
        }
    }
}

/// Decode tile bytes into an RGBA image
pub fn decode_tile_image(key: &TileKey, data: &[u8]) -> Result<image::RgbaImage> {
    let img = image::load_from_memory(data).map_err(|source| MapError::TileDecode { key: *key, source })?;
    Ok(img.to_rgba8())
}
