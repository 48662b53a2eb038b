//! Tile coordinate system and conversions
//! Uses Web Mercator projection (EPSG:3857), slippy-map tile numbering

use std::f64::consts::PI;
use std::fmt;

use crate::error::{MapError, Result};

/// Highest zoom level the projection helpers accept
pub const MAX_PROJECTION_ZOOM: u8 = 19;

/// Latitude limit of the Mercator projection
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Unique identifier for a map tile
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct TileKey {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// Number of tiles along one axis at this zoom level
    pub fn tiles_per_axis(&self) -> u32 {
        1 << self.zoom
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

fn check_domain(lat: f64, lon: f64, zoom: u8) -> Result<()> {
    if zoom > MAX_PROJECTION_ZOOM {
        return Err(MapError::InvalidZoom(zoom));
    }
    if !lat.is_finite() || !lon.is_finite() || lat.abs() >= MAX_LATITUDE {
        return Err(MapError::InvalidCoordinate { lat, lon });
    }
    Ok(())
}

/// Convert latitude/longitude to fractional tile coordinates (for sub-tile positioning)
pub fn fractional_tile(lat: f64, lon: f64, zoom: u8) -> Result<(f64, f64)> {
    check_domain(lat, lon, zoom)?;
    let n = (1_u64 << zoom) as f64;

    let x = (normalize_longitude(lon) + 180.0) / 360.0 * n;

    let lat_rad = lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n;

    Ok((x, y))
}

/// Convert latitude/longitude to the index of the containing tile
pub fn tile_for_position(lat: f64, lon: f64, zoom: u8) -> Result<(u32, u32)> {
    let (x, y) = fractional_tile(lat, lon, zoom)?;

    // x == n is the antimeridian again, y stays inside the Mercator band
    let max_tile = (1_u32 << zoom) - 1;
    Ok((wrap_tile_x(x.floor() as i64, zoom), (y.floor() as u32).min(max_tile)))
}

/// Pixel position of the coordinate inside its containing tile, in `[0, tile_size)`
pub fn pixel_offset_within_tile(lat: f64, lon: f64, zoom: u8, tile_size: u32) -> Result<(f64, f64)> {
    let (x, y) = fractional_tile(lat, lon, zoom)?;
    let size = tile_size as f64;
    Ok((fraction_to_pixels(x, size), fraction_to_pixels(y, size)))
}

/// Fractional part of a tile coordinate scaled to pixels
pub(crate) fn fraction_to_pixels(coord: f64, tile_size: f64) -> f64 {
    let px = (coord - coord.floor()) * tile_size;
    // rounding can land on tile_size for non power-of-two sizes
    px.min(tile_size - tile_size * f64::EPSILON)
}

/// Convert fractional tile coordinates back to (latitude, longitude)
pub fn position_for_tile(x: f64, y: f64, zoom: u8) -> (f64, f64) {
    let n = (1_u64 << zoom) as f64;

    let lon = x / n * 360.0 - 180.0;
    let lat_rad = (PI * (1.0 - 2.0 * y / n)).sinh().atan();

    (lat_rad.to_degrees(), lon)
}

/// Wrap X coordinate for horizontal world repetition
pub fn wrap_tile_x(x: i64, zoom: u8) -> u32 {
    let max_tiles = 1_i64 << zoom;
    x.rem_euclid(max_tiles) as u32
}

/// Check if Y coordinate is valid (no wrapping for latitude)
pub fn is_valid_tile_y(y: i64, zoom: u8) -> bool {
    let max_tiles = 1_i64 << zoom;
    y >= 0 && y < max_tiles
}

/// Normalize longitude to [-180, 180), the antimeridian maps to -180
pub fn normalize_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Speed-driven zoom selection used while no manual zoom is pinned
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoomPolicy {
    /// Below this speed the device counts as stationary
    pub slow_below_kmh: f64,
    /// At or above this speed the device counts as driving
    pub fast_from_kmh: f64,
    pub slow_zoom: u8,
    pub medium_zoom: u8,
    pub fast_zoom: u8,
}

impl ZoomPolicy {
    pub fn zoom_for_speed(&self, speed_kmh: f64) -> u8 {
        if speed_kmh < self.slow_below_kmh {
            self.slow_zoom
        } else if speed_kmh < self.fast_from_kmh {
            self.medium_zoom
        } else {
            self.fast_zoom
        }
    }
}

impl Default for ZoomPolicy {
    fn default() -> Self {
        Self {
            slow_below_kmh: 5.0,
            fast_from_kmh: 20.0,
            slow_zoom: 15,
            medium_zoom: 13,
            fast_zoom: 12,
        }
    }
}
