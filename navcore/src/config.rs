//! Device configuration for the map core

use std::f64::consts::PI;
use std::time::Duration;

use image::Rgba;

use crate::error::{MapError, Result};
use crate::map::tile::{MAX_PROJECTION_ZOOM, ZoomPolicy};

/// Largest marker radius accepted, in pixels
pub const MAX_MARKER_RADIUS: i32 = 1024;

/// What to draw at the fix position while the receiver reports no valid fix
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidFixMarker {
    Hide,
    /// Draw the icon in the inactive colour
    Inactive,
}

/// Appearance of the position marker and heading arrow
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarkerStyle {
    pub radius: i32,
    pub edge_width: i32,
    /// Half-angle of the arrow head, radians
    pub arrow_angle: f64,
    pub fill: Rgba<u8>,
    pub active: Rgba<u8>,
    pub inactive: Rgba<u8>,
    pub invalid_fix: InvalidFixMarker,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            radius: 14,
            edge_width: 3,
            arrow_angle: PI / 6.0,
            fill: Rgba([255, 255, 255, 255]),
            active: Rgba([0, 128, 0, 255]),
            inactive: Rgba([128, 128, 128, 255]),
            invalid_fix: InvalidFixMarker::Hide,
        }
    }
}

/// Map core configuration
#[derive(Clone, Debug)]
pub struct MapConfig {
    /// Edge length of a square tile in pixels
    pub tile_size: u32,
    pub screen_width: u32,
    pub screen_height: u32,

    /// Root directory of the tile tree and the layer below it
    pub maps_root: String,
    pub layer: String,

    /// Byte budget for cached tile payloads
    pub cache_capacity_bytes: usize,

    pub min_zoom: u8,
    pub max_zoom: u8,
    pub zoom_policy: ZoomPolicy,

    /// Upper bound on how long the render loop sleeps without a signal
    pub signal_timeout: Duration,

    /// Scroll the previous frame for sub-tile moves instead of redrawing the grid
    pub incremental_scroll: bool,

    /// Buffer area not covered by any tile
    pub background: Rgba<u8>,
    /// Grid cell whose tile is missing or unreadable
    pub placeholder: Rgba<u8>,
    pub marker: MarkerStyle,
}

impl MapConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(MapError::InvalidConfig("tile_size must be positive".into()));
        }
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err(MapError::InvalidConfig(format!(
                "screen size {}x{} is empty",
                self.screen_width, self.screen_height
            )));
        }
        if self.cache_capacity_bytes == 0 {
            return Err(MapError::InvalidConfig("cache capacity must be positive".into()));
        }
        if self.min_zoom > self.max_zoom || self.max_zoom > MAX_PROJECTION_ZOOM {
            return Err(MapError::InvalidConfig(format!(
                "zoom range {}..={} is not within 0..={}",
                self.min_zoom, self.max_zoom, MAX_PROJECTION_ZOOM
            )));
        }
        let marker = &self.marker;
        if !(1..=MAX_MARKER_RADIUS).contains(&marker.radius)
            || !(0..=marker.radius).contains(&marker.edge_width)
        {
            return Err(MapError::InvalidConfig(format!(
                "marker radius {} with edge {} is not within 1..={}",
                marker.radius, marker.edge_width, MAX_MARKER_RADIUS
            )));
        }
        Ok(())
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        // M5Stack Tab5 with Swisstopo pixel map tiles
        Self {
            tile_size: 256,
            screen_width: 720,
            screen_height: 1280,
            maps_root: "/maps".to_string(),
            layer: "pixelkarte-farbe".to_string(),
            cache_capacity_bytes: 1024 * 1024,
            min_zoom: 1,
            max_zoom: MAX_PROJECTION_ZOOM,
            zoom_policy: ZoomPolicy::default(),
            signal_timeout: Duration::from_millis(10),
            incremental_scroll: true,
            background: Rgba([0, 0, 0, 255]),
            placeholder: Rgba([0, 128, 128, 255]),
            marker: MarkerStyle::default(),
        }
    }
}
