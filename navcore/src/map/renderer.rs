//! Viewport compositor: tile grid to screen buffer, full redraw or incremental scroll

use std::io;
use std::sync::Arc;

use image::RgbaImage;

use super::cache::TileCache;
use super::camera::{MapCamera, ViewportState};
use super::framebuffer::{PixelRect, ScreenBuffer};
use super::overlay::{MarkerState, draw_marker, normalize_heading};
use super::store::{TileStore, decode_tile_image};
use super::tile::{MAX_LATITUDE, TileKey, fractional_tile, position_for_tile};
use crate::config::MapConfig;
use crate::error::{MapError, Result};
use crate::state::{PanOffset, PositionFix};

/// Receives composited frames
pub trait DisplaySink {
    /// Present `frame` with its top-left corner at screen position (x, y)
    fn flush(&mut self, frame: &ScreenBuffer, x: i32, y: i32) -> io::Result<()>;
}

/// Snapshot the compositor works from for one cycle
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameInput {
    pub fix: PositionFix,
    pub zoom: u8,
    pub pan: Option<PanOffset>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedrawKind {
    Full,
    /// Map layer moved by (dx, dy) pixels, only exposed edges were drawn
    Scroll { dx: i32, dy: i32 },
    None,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderOutcome {
    pub viewport: ViewportState,
    pub redraw: RedrawKind,
    pub flushed: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompositorStats {
    pub cycles: u64,
    pub full_redraws: u64,
    pub scrolls: u64,
    pub flushes: u64,
    pub cache_hits: u64,
    pub store_reads: u64,
    pub missing_tiles: u64,
    pub failed_tiles: u64,
    /// Tiles drawn but too large to keep in the cache
    pub uncached_tiles: u64,
}

impl CompositorStats {
    /// Tiles drawn from either the cache or the store
    pub fn tile_requests(&self) -> u64 {
        self.cache_hits + self.store_reads + self.missing_tiles
    }
}

/// What the map layer currently shows
#[derive(Clone, Copy, Debug)]
struct LayerState {
    center_tile: TileKey,
    origin: (i32, i32),
}

/// Look up a tile in the cache, loading and caching it on a miss
///
/// Failures are logged and yield `None` so the cell stays blank.
fn fetch_tile<S: TileStore>(
    store: &S,
    cache: &TileCache,
    stats: &mut CompositorStats,
    key: &TileKey,
) -> Option<RgbaImage> {
    let payload = match cache.get(key) {
        Some(record) => {
            stats.cache_hits += 1;
            record.payload
        }
        None => match store.load(key) {
            Ok(bytes) => {
                stats.store_reads += 1;
                let payload: Arc<[u8]> = bytes.into();
                if let Err(e) = cache.put(*key, Arc::clone(&payload)) {
                    // Still drawn this cycle, just not kept
                    stats.uncached_tiles += 1;
                    log::debug!("Drawing tile {} uncached: {}", key, e);
                }
                payload
            }
            Err(MapError::TileNotFound(_)) => {
                stats.missing_tiles += 1;
                log::debug!("No tile {} in store", key);
                return None;
            }
            Err(e) => {
                stats.failed_tiles += 1;
                log::warn!("Failed to load tile {}: {}", key, e);
                return None;
            }
        },
    };

    match decode_tile_image(key, &payload) {
        Ok(image) => Some(image),
        Err(e) => {
            stats.failed_tiles += 1;
            log::warn!("Failed to decode tile {:?}: {}", key, e);
            None
        }
    }
}

/// Builds screen frames from the tile grid around the current position
pub struct Compositor<S: TileStore> {
    camera: MapCamera,
    config: MapConfig,
    store: S,
    cache: Arc<TileCache>,
    map_layer: ScreenBuffer,
    frame: ScreenBuffer,
    layer: Option<LayerState>,
    /// Overlay of the last flushed frame, `None` until the first flush
    flushed_marker: Option<Option<MarkerState>>,
    stats: CompositorStats,
}

impl<S: TileStore> Compositor<S> {
    pub fn new(config: MapConfig, store: S, cache: Arc<TileCache>) -> Result<Self> {
        config.validate()?;
        let camera = MapCamera::from_config(&config);
        let size = camera.buffer_size();
        log::info!(
            "Compositor {}x{} screen, {}x{} tile grid, {}px buffer",
            camera.screen_width,
            camera.screen_height,
            camera.grid_dimension,
            camera.grid_dimension,
            size
        );

        Ok(Self {
            camera,
            map_layer: ScreenBuffer::new(size, size, config.background),
            frame: ScreenBuffer::new(size, size, config.background),
            config,
            store,
            cache,
            layer: None,
            flushed_marker: None,
            stats: CompositorStats::default(),
        })
    }

    pub fn camera(&self) -> &MapCamera {
        &self.camera
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    pub fn stats(&self) -> CompositorStats {
        self.stats
    }

    /// Last flushed frame (map plus overlay)
    pub fn frame(&self) -> &ScreenBuffer {
        &self.frame
    }

    /// Tiles only, without the overlay
    pub fn map_layer(&self) -> &ScreenBuffer {
        &self.map_layer
    }

    /// Forget the previous frame so the next cycle redraws everything
    pub fn invalidate(&mut self) {
        self.layer = None;
        self.flushed_marker = None;
    }

    /// Geographic point to put at the screen centre
    fn view_center(&self, input: &FrameInput) -> Result<(f64, f64)> {
        let Some(pan) = input.pan else {
            return Ok((input.fix.latitude, input.fix.longitude));
        };

        let (anchor_x, anchor_y) = fractional_tile(pan.anchor_lat, pan.anchor_lon, input.zoom)?;
        let (dx, dy) = pan.offset_at(input.zoom);
        let size = self.camera.tile_size as f64;
        let (lat, lon) = position_for_tile(anchor_x - dx / size, anchor_y - dy / size, input.zoom);

        // Keep a dragged view inside the projectable band
        let limit = MAX_LATITUDE - 1e-6;
        Ok((lat.clamp(-limit, limit), lon))
    }

    /// Buffer-space marker position for the live fix
    fn marker_state(&self, input: &FrameInput, viewport: &ViewportState) -> Option<MarkerState> {
        let (origin_x, origin_y) = self.camera.buffer_origin(viewport);
        let (x, y) = if input.pan.is_none() {
            // The centre point is drawn at the screen centre by construction
            (
                origin_x + viewport.pixel_offset_x.floor() as i32,
                origin_y + viewport.pixel_offset_y.floor() as i32,
            )
        } else {
            let (fx, fy) = fractional_tile(input.fix.latitude, input.fix.longitude, viewport.zoom).ok()?;
            let size = self.camera.tile_size as f64;
            let n = (1_u64 << viewport.zoom) as f64;
            let mut rel_x = fx - viewport.center_tile.x as f64;
            // Take the short way around the antimeridian
            if rel_x > n / 2.0 {
                rel_x -= n;
            } else if rel_x < -n / 2.0 {
                rel_x += n;
            }
            let rel_y = fy - viewport.center_tile.y as f64;
            (
                origin_x + (rel_x * size).floor() as i32,
                origin_y + (rel_y * size).floor() as i32,
            )
        };

        Some(MarkerState {
            x,
            y,
            heading_degrees: normalize_heading(input.fix.heading_degrees),
            fix_valid: input.fix.fix_valid,
        })
    }

    fn decide(&self, viewport: &ViewportState, origin: (i32, i32)) -> RedrawKind {
        let Some(previous) = self.layer else {
            return RedrawKind::Full;
        };
        if previous.center_tile != viewport.center_tile {
            return RedrawKind::Full;
        }

        let dx = origin.0 - previous.origin.0;
        let dy = origin.1 - previous.origin.1;
        let tile = self.camera.tile_size as i32;
        if dx == 0 && dy == 0 {
            RedrawKind::None
        } else if dx.abs() >= tile || dy.abs() >= tile || !self.config.incremental_scroll {
            RedrawKind::Full
        } else {
            RedrawKind::Scroll { dx, dy }
        }
    }

    /// Draw every grid cell that intersects `clip`, writing only inside `clip`
    fn draw_cells(&mut self, viewport: &ViewportState, clip: PixelRect) {
        for cell in self.camera.grid_cells(viewport) {
            let area = cell.rect.intersect(&clip);
            if area.is_empty() {
                continue;
            }
            self.map_layer.fill_rect(area, self.config.placeholder);

            let Some(key) = cell.key else {
                continue;
            };
            if let Some(tile) = fetch_tile(&self.store, &self.cache, &mut self.stats, &key) {
                self.map_layer.blit(&tile, cell.rect.x, cell.rect.y, area);
            }
        }
    }

    /// Run one compositing cycle and flush the frame if anything visible changed
    pub fn render(&mut self, input: &FrameInput, sink: &mut dyn DisplaySink) -> Result<RenderOutcome> {
        self.stats.cycles += 1;

        let (lat, lon) = self.view_center(input)?;
        let viewport = self
            .camera
            .viewport(lat, lon, input.zoom, input.fix.heading_degrees)?;
        let origin = self.camera.buffer_origin(&viewport);

        let redraw = self.decide(&viewport, origin);
        match redraw {
            RedrawKind::Full => {
                log::debug!("Full redraw around tile {}", viewport.center_tile);
                self.stats.full_redraws += 1;
                self.map_layer.clear(self.config.background);
                let bounds = self.map_layer.bounds();
                self.draw_cells(&viewport, bounds);
            }
            RedrawKind::Scroll { dx, dy } => {
                log::trace!("Scroll by ({}, {})", dx, dy);
                self.stats.scrolls += 1;
                let exposed = self.map_layer.scroll(dx, dy, self.config.background);
                for strip in exposed {
                    self.draw_cells(&viewport, strip);
                }
            }
            RedrawKind::None => {}
        }
        self.layer = Some(LayerState {
            center_tile: viewport.center_tile,
            origin,
        });

        let marker = self.marker_state(input, &viewport);
        let overlay_changed = self.flushed_marker != Some(marker);
        let flushed = redraw != RedrawKind::None || overlay_changed;

        if flushed {
            self.frame.copy_from(&self.map_layer);
            if let Some(marker) = &marker {
                draw_marker(&mut self.frame, &self.config.marker, marker);
            }

            let (x, y) = self.camera.present_offset();
            sink.flush(&self.frame, x, y).map_err(MapError::Display)?;
            self.flushed_marker = Some(marker);
            self.stats.flushes += 1;
        }

        Ok(RenderOutcome {
            viewport,
            redraw,
            flushed,
        })
    }
}
