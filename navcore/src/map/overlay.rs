//! Position marker with heading arrow, drawn on top of the composited map

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_polygon_mut};
use imageproc::point::Point;

use super::framebuffer::ScreenBuffer;
use crate::config::{InvalidFixMarker, MarkerStyle};

/// Overlay inputs of one frame; a change forces a re-flush even if the map did not move
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarkerState {
    /// Buffer-space centre of the icon
    pub x: i32,
    pub y: i32,
    pub heading_degrees: f64,
    pub fix_valid: bool,
}

/// Rotate a point given relative to the icon centre (y down, heading clockwise from north)
fn rotate(px: f64, py: f64, heading_degrees: f64) -> (f64, f64) {
    let (sin, cos) = heading_degrees.to_radians().sin_cos();
    (px * cos - py * sin, px * sin + py * cos)
}

/// Heading folded into `[0, 360)`; a heading the receiver could not compute counts as north
pub fn normalize_heading(heading_degrees: f64) -> f64 {
    if heading_degrees.is_finite() {
        heading_degrees.rem_euclid(360.0)
    } else {
        0.0
    }
}

/// Fill a polygon, skipping shapes that collapsed to a point or a line
fn fill_polygon(image: &mut RgbaImage, points: &[Point<i32>], color: Rgba<u8>) {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return;
    };
    if points.len() < 3 || first == last {
        return;
    }
    draw_polygon_mut(image, points, color);
}

/// Colour the icon is drawn in, or `None` when it is suppressed
pub fn marker_color(style: &MarkerStyle, fix_valid: bool) -> Option<Rgba<u8>> {
    if fix_valid {
        Some(style.active)
    } else {
        match style.invalid_fix {
            InvalidFixMarker::Hide => None,
            InvalidFixMarker::Inactive => Some(style.inactive),
        }
    }
}

/// Draw the direction icon: ringed disc with an arrow head pointing along the heading
pub fn draw_marker(buffer: &mut ScreenBuffer, style: &MarkerStyle, marker: &MarkerState) {
    let Some(color) = marker_color(style, marker.fix_valid) else {
        return;
    };

    let r = style.radius;
    // Skip when the icon cannot touch the buffer
    if marker.x <= -r
        || marker.y <= -r
        || marker.x >= buffer.width() as i32 + r
        || marker.y >= buffer.height() as i32 + r
    {
        log::debug!("Marker at ({}, {}) is outside the buffer", marker.x, marker.y);
        return;
    }

    let inner = r - style.edge_width;
    let image = buffer.image_mut();
    draw_filled_circle_mut(image, (marker.x, marker.y), r, color);
    if inner > 0 {
        draw_filled_circle_mut(image, (marker.x, marker.y), inner, style.fill);
    }

    let inner = inner.max(0) as f64;
    let (sin_a, cos_a) = style.arrow_angle.sin_cos();
    let tip = (0.0, -inner);
    let right = (inner * sin_a, inner * cos_a);
    let left = (-inner * sin_a, inner * cos_a);
    let notch = (0.0, r as f64 * 0.2);

    let heading = normalize_heading(marker.heading_degrees);
    let place = |p: (f64, f64)| {
        let (x, y) = rotate(p.0, p.1, heading);
        Point::new(marker.x + x.round() as i32, marker.y + y.round() as i32)
    };

    fill_polygon(image, &[place(tip), place(right), place(left)], color);
    fill_polygon(image, &[place(notch), place(right), place(left)], style.fill);
}
