//! Viewport geometry: centre tile, sub-tile offset, grid extent and buffer placement

use super::framebuffer::PixelRect;
use super::tile::{TileKey, is_valid_tile_y, pixel_offset_within_tile, tile_for_position, wrap_tile_x};
use crate::config::MapConfig;
use crate::error::Result;

/// Per-cycle view of the map, recomputed from scratch every render
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportState {
    pub center_lat: f64,
    pub center_lon: f64,
    pub zoom: u8,
    pub heading_degrees: f64,
    pub center_tile: TileKey,
    /// Position of the centre point inside its tile, in `[0, tile_size)`
    pub pixel_offset_x: f64,
    pub pixel_offset_y: f64,
    /// Screen position of the centre tile's top-left corner
    pub draw_origin_x: i32,
    pub draw_origin_y: i32,
}

/// One grid position to fill with a tile
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridCell {
    /// `None` when the row lies beyond the poles
    pub key: Option<TileKey>,
    /// Buffer-space rectangle of the tile
    pub rect: PixelRect,
}

/// Smallest odd grid that keeps the screen covered for any sub-tile offset
pub fn grid_dimension(screen_width: u32, screen_height: u32, tile_size: u32) -> u32 {
    let half_extent = screen_width.max(screen_height).div_ceil(2) + tile_size;
    let rings = half_extent.div_ceil(tile_size);
    2 * rings + 1
}

/// Fixed screen/tile geometry of the device
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapCamera {
    pub tile_size: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub grid_dimension: u32,
}

impl MapCamera {
    pub fn new(tile_size: u32, screen_width: u32, screen_height: u32) -> Self {
        Self {
            tile_size,
            screen_width,
            screen_height,
            grid_dimension: grid_dimension(screen_width, screen_height, tile_size),
        }
    }

    pub fn from_config(config: &MapConfig) -> Self {
        Self::new(config.tile_size, config.screen_width, config.screen_height)
    }

    /// Edge length of the square screen buffer
    pub fn buffer_size(&self) -> u32 {
        self.grid_dimension * self.tile_size
    }

    /// Screen position of the buffer's top-left corner (buffer is centred on the screen)
    pub fn present_offset(&self) -> (i32, i32) {
        let buffer = self.buffer_size() as i32;
        (
            (self.screen_width as i32 - buffer) / 2,
            (self.screen_height as i32 - buffer) / 2,
        )
    }

    pub fn screen_center(&self) -> (i32, i32) {
        (self.screen_width as i32 / 2, self.screen_height as i32 / 2)
    }

    pub fn screen_to_buffer(&self, x: i32, y: i32) -> (i32, i32) {
        let (ox, oy) = self.present_offset();
        (x - ox, y - oy)
    }

    /// Screen area expressed in buffer coordinates
    pub fn screen_rect_in_buffer(&self) -> PixelRect {
        let (x, y) = self.screen_to_buffer(0, 0);
        PixelRect::new(x, y, self.screen_width as i32, self.screen_height as i32)
    }

    /// Compute the viewport that puts (lat, lon) at the screen centre
    pub fn viewport(&self, lat: f64, lon: f64, zoom: u8, heading_degrees: f64) -> Result<ViewportState> {
        let (tile_x, tile_y) = tile_for_position(lat, lon, zoom)?;
        let (pixel_offset_x, pixel_offset_y) = pixel_offset_within_tile(lat, lon, zoom, self.tile_size)?;
        let (cx, cy) = self.screen_center();

        Ok(ViewportState {
            center_lat: lat,
            center_lon: lon,
            zoom,
            heading_degrees,
            center_tile: TileKey::new(zoom, tile_x, tile_y),
            pixel_offset_x,
            pixel_offset_y,
            draw_origin_x: cx - pixel_offset_x.floor() as i32,
            draw_origin_y: cy - pixel_offset_y.floor() as i32,
        })
    }

    /// Buffer-space position of the centre tile's top-left corner
    pub fn buffer_origin(&self, viewport: &ViewportState) -> (i32, i32) {
        self.screen_to_buffer(viewport.draw_origin_x, viewport.draw_origin_y)
    }

    /// All grid cells around the centre tile, row by row
    pub fn grid_cells(&self, viewport: &ViewportState) -> Vec<GridCell> {
        let half = (self.grid_dimension / 2) as i64;
        let size = self.tile_size as i32;
        let (origin_x, origin_y) = self.buffer_origin(viewport);
        let center = viewport.center_tile;

        let mut cells = Vec::with_capacity((self.grid_dimension * self.grid_dimension) as usize);
        for dy in -half..=half {
            for dx in -half..=half {
                let ty = center.y as i64 + dy;
                let key = is_valid_tile_y(ty, center.zoom).then(|| {
                    TileKey::new(center.zoom, wrap_tile_x(center.x as i64 + dx, center.zoom), ty as u32)
                });
                let rect = PixelRect::new(origin_x + dx as i32 * size, origin_y + dy as i32 * size, size, size);
                cells.push(GridCell { key, rect });
            }
        }
        cells
    }
}
