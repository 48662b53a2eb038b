//! State shared between the position, input and render threads
//!
//! Each group of fields sits behind its own mutex, and no method holds two of
//! them at once. Readers always copy a whole snapshot out under the lock.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::MapConfig;
use crate::map::renderer::FrameInput;
use crate::map::tile::{TileKey, ZoomPolicy};

/// Latest solution from the position source
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed_kmh: f64,
    pub heading_degrees: f64,
    pub fix_valid: bool,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
            speed_kmh: 0.0,
            heading_degrees: 0.0,
            fix_valid: true,
        }
    }
}

/// Variometer readings, consumed by the telemetry display
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Telemetry {
    pub pressure_hpa: f64,
    pub temperature_c: f64,
    pub altitude_m: f64,
    pub vertical_speed_mps: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ZoomMode {
    /// Zoom follows speed
    #[default]
    Auto,
    Manual(u8),
}

/// Manual drag of the map away from the fix
///
/// Offsets are in pixels at `zoom`; the view centre is the anchor moved against the drag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PanOffset {
    pub anchor_lat: f64,
    pub anchor_lon: f64,
    pub dx: f64,
    pub dy: f64,
    pub zoom: u8,
}

impl PanOffset {
    /// Offsets converted to pixels at another zoom level
    pub fn offset_at(&self, zoom: u8) -> (f64, f64) {
        let scale = 2f64.powi(zoom as i32 - self.zoom as i32);
        (self.dx * scale, self.dy * scale)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MapControl {
    pub zoom: ZoomMode,
    /// Set while the map is in manual drag mode
    pub pan: Option<PanOffset>,
}

/// Tile grid currently on screen, published by the render path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    pub center: TileKey,
    pub dimension: u32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Writers replace whole values, a poisoned guard still holds a complete snapshot
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared device state
pub struct SharedState {
    position: Mutex<Option<PositionFix>>,
    telemetry: Mutex<Telemetry>,
    control: Mutex<MapControl>,
    grid: Mutex<Option<TileGrid>>,
    min_zoom: u8,
    max_zoom: u8,
    zoom_policy: ZoomPolicy,
}

impl SharedState {
    pub fn new(config: &MapConfig) -> Self {
        Self {
            position: Mutex::new(None),
            telemetry: Mutex::new(Telemetry::default()),
            control: Mutex::new(MapControl::default()),
            grid: Mutex::new(None),
            min_zoom: config.min_zoom,
            max_zoom: config.max_zoom,
            zoom_policy: config.zoom_policy,
        }
    }

    pub fn publish_fix(&self, fix: PositionFix) {
        *lock(&self.position) = Some(fix);
    }

    pub fn fix(&self) -> Option<PositionFix> {
        *lock(&self.position)
    }

    pub fn publish_telemetry(&self, telemetry: Telemetry) {
        *lock(&self.telemetry) = telemetry;
    }

    pub fn telemetry(&self) -> Telemetry {
        *lock(&self.telemetry)
    }

    pub fn map_control(&self) -> MapControl {
        *lock(&self.control)
    }

    pub fn publish_grid(&self, center: TileKey, dimension: u32) {
        *lock(&self.grid) = Some(TileGrid { center, dimension });
    }

    pub fn tile_grid(&self) -> Option<TileGrid> {
        *lock(&self.grid)
    }

    /// Zoom that applies to the given fix under the current zoom mode
    fn effective_zoom(&self, mode: ZoomMode, fix: Option<&PositionFix>) -> u8 {
        match mode {
            ZoomMode::Manual(zoom) => zoom,
            ZoomMode::Auto => {
                let speed = fix.map_or(0.0, |f| f.speed_kmh);
                self.zoom_policy
                    .zoom_for_speed(speed)
                    .clamp(self.min_zoom, self.max_zoom)
            }
        }
    }

    /// Zoom level currently displayed, falling back to the policy before the first frame
    pub fn displayed_zoom(&self) -> u8 {
        if let Some(grid) = self.tile_grid() {
            return grid.center.zoom;
        }
        let fix = self.fix();
        let mode = self.map_control().zoom;
        self.effective_zoom(mode, fix.as_ref())
    }

    /// Pin the zoom level, clamped to the configured range
    pub fn set_manual_zoom(&self, zoom: u8) -> u8 {
        let zoom = zoom.clamp(self.min_zoom, self.max_zoom);
        lock(&self.control).zoom = ZoomMode::Manual(zoom);
        log::info!("Manual zoom level {}", zoom);
        zoom
    }

    /// One step in; starts from the displayed zoom when zoom is automatic
    pub fn zoom_in(&self) -> u8 {
        self.step_zoom(1)
    }

    pub fn zoom_out(&self) -> u8 {
        self.step_zoom(-1)
    }

    fn step_zoom(&self, delta: i32) -> u8 {
        let base = match self.map_control().zoom {
            ZoomMode::Manual(zoom) => zoom,
            ZoomMode::Auto => self.displayed_zoom(),
        };
        let target = (base as i32 + delta).clamp(0, u8::MAX as i32) as u8;
        self.set_manual_zoom(target)
    }

    /// Return to speed-driven zoom
    pub fn reset_zoom(&self) {
        lock(&self.control).zoom = ZoomMode::Auto;
    }

    /// Drag the map by screen pixels, entering manual map mode if needed
    ///
    /// Returns false when there is no position to anchor the drag to.
    pub fn pan_by(&self, dx: f64, dy: f64) -> bool {
        let displayed = self.displayed_zoom();
        let fix = self.fix();

        let mut control = lock(&self.control);
        match control.pan.as_mut() {
            Some(pan) => {
                let scale = 2f64.powi(pan.zoom as i32 - displayed as i32);
                pan.dx += dx * scale;
                pan.dy += dy * scale;
            }
            None => {
                let Some(fix) = fix else {
                    return false;
                };
                control.pan = Some(PanOffset {
                    anchor_lat: fix.latitude,
                    anchor_lon: fix.longitude,
                    dx,
                    dy,
                    zoom: displayed,
                });
                log::info!("Manual map mode engaged");
            }
        }
        true
    }

    /// Leave manual map mode and follow the fix again
    pub fn release_pan(&self) {
        if lock(&self.control).pan.take().is_some() {
            log::info!("Manual map mode released");
        }
    }

    pub fn manual_map_mode(&self) -> bool {
        self.map_control().pan.is_some()
    }

    /// Consistent per-cycle snapshot for the compositor, `None` before the first fix
    pub fn frame_input(&self) -> Option<FrameInput> {
        let fix = self.fix()?;
        let control = self.map_control();
        Some(FrameInput {
            zoom: self.effective_zoom(control.zoom, Some(&fix)),
            fix,
            pan: control.pan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SharedState {
        SharedState::new(&MapConfig::default())
    }

    #[test]
    fn test_no_frame_before_first_fix() {
        assert!(state().frame_input().is_none());
    }

    #[test]
    fn test_auto_zoom_follows_speed() {
        let state = state();
        let mut fix = PositionFix::new(46.9, 7.4);
        state.publish_fix(fix);
        assert_eq!(state.frame_input().unwrap().zoom, 15);

        fix.speed_kmh = 12.0;
        state.publish_fix(fix);
        assert_eq!(state.frame_input().unwrap().zoom, 13);

        fix.speed_kmh = 80.0;
        state.publish_fix(fix);
        assert_eq!(state.frame_input().unwrap().zoom, 12);
    }

    #[test]
    fn test_manual_zoom_is_clamped_and_overrides_speed() {
        let state = state();
        state.publish_fix(PositionFix {
            speed_kmh: 80.0,
            ..PositionFix::new(46.9, 7.4)
        });

        assert_eq!(state.set_manual_zoom(25), 19);
        assert_eq!(state.set_manual_zoom(0), 1);
        assert_eq!(state.frame_input().unwrap().zoom, 1);

        state.reset_zoom();
        assert_eq!(state.frame_input().unwrap().zoom, 12);
    }

    #[test]
    fn test_zoom_steps_start_from_displayed_zoom() {
        let state = state();
        state.publish_fix(PositionFix::new(46.9, 7.4));
        state.publish_grid(TileKey::new(15, 1, 1), 9);

        assert_eq!(state.zoom_in(), 16);
        assert_eq!(state.zoom_in(), 17);
        assert_eq!(state.zoom_out(), 16);

        state.set_manual_zoom(19);
        assert_eq!(state.zoom_in(), 19);
        state.set_manual_zoom(1);
        assert_eq!(state.zoom_out(), 1);
    }

    #[test]
    fn test_pan_is_sticky_until_released() {
        let state = state();
        assert!(!state.pan_by(10.0, 0.0));

        state.publish_fix(PositionFix::new(46.9, 7.4));
        state.publish_grid(TileKey::new(15, 1, 1), 9);
        assert!(state.pan_by(10.0, -4.0));
        assert!(state.pan_by(6.0, 0.0));

        // New fixes, valid or not, keep the map where the user dragged it
        state.publish_fix(PositionFix {
            fix_valid: false,
            ..PositionFix::new(47.0, 7.5)
        });
        state.publish_fix(PositionFix::new(47.1, 7.6));

        let pan = state.frame_input().unwrap().pan.unwrap();
        assert_eq!((pan.anchor_lat, pan.anchor_lon), (46.9, 7.4));
        assert_eq!((pan.dx, pan.dy), (16.0, -4.0));
        assert!(state.manual_map_mode());

        state.release_pan();
        assert!(!state.manual_map_mode());
        assert!(state.frame_input().unwrap().pan.is_none());
    }

    #[test]
    fn test_pan_offsets_rescale_with_zoom() {
        let pan = PanOffset {
            anchor_lat: 0.0,
            anchor_lon: 0.0,
            dx: 8.0,
            dy: -2.0,
            zoom: 14,
        };
        assert_eq!(pan.offset_at(15), (16.0, -4.0));
        assert_eq!(pan.offset_at(13), (4.0, -1.0));

        let state = state();
        state.publish_fix(PositionFix::new(46.9, 7.4));
        state.publish_grid(TileKey::new(14, 1, 1), 9);
        state.pan_by(8.0, 0.0);
        // Drag made while zoomed in one level counts half at the anchor zoom
        state.publish_grid(TileKey::new(15, 1, 1), 9);
        state.pan_by(8.0, 0.0);
        assert_eq!(state.map_control().pan.unwrap().dx, 12.0);
    }

    #[test]
    fn test_telemetry_round_trip() {
        let state = state();
        let telemetry = Telemetry {
            pressure_hpa: 1003.2,
            temperature_c: 18.5,
            altitude_m: 512.0,
            vertical_speed_mps: 1.4,
        };
        state.publish_telemetry(telemetry);
        assert_eq!(state.telemetry(), telemetry);
    }
}
