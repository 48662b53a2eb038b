//! Error taxonomy for the map core

use std::io;

use thiserror::Error;

use crate::map::tile::TileKey;

/// Errors produced by the map core
#[derive(Debug, Error)]
pub enum MapError {
    /// Latitude outside the Mercator range, or a non-finite coordinate
    #[error("invalid coordinate lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("zoom level {0} is outside 0..=19")]
    InvalidZoom(u8),

    /// Expected when the map has no coverage for a tile
    #[error("tile {0} not found")]
    TileNotFound(TileKey),

    #[error("failed to read tile {key}")]
    TileIo {
        key: TileKey,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode tile {key}")]
    TileDecode {
        key: TileKey,
        #[source]
        source: image::ImageError,
    },

    /// A single payload larger than the whole cache budget
    #[error("payload of {size} bytes exceeds cache capacity of {capacity} bytes")]
    CacheCapacityExceeded { size: usize, capacity: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("display flush failed")]
    Display(#[source] io::Error),
}

impl MapError {
    /// Missing coverage is a normal condition, everything else is worth a warning
    pub fn is_not_found(&self) -> bool {
        matches!(self, MapError::TileNotFound(_))
    }
}

pub type Result<T, E = MapError> = std::result::Result<T, E>;
