//! Off-screen RGBA pixel surface with clipped blits and in-place scrolling

use image::{Rgba, RgbaImage};

const BYTES_PER_PIXEL: usize = 4;

/// Axis-aligned pixel rectangle, may extend past the buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn intersect(&self, other: &PixelRect) -> PixelRect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        PixelRect::new(x, y, (right - x).max(0), (bottom - y).max(0))
    }

    pub fn intersects(&self, other: &PixelRect) -> bool {
        !self.intersect(other).is_empty()
    }
}

/// Screen buffer backed by an `image::RgbaImage`
#[derive(Clone, Debug, PartialEq)]
pub struct ScreenBuffer {
    image: RgbaImage,
}

impl ScreenBuffer {
    pub fn new(width: u32, height: u32, color: Rgba<u8>) -> Self {
        Self {
            image: RgbaImage::from_pixel(width, height, color),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width() as i32, self.height() as i32)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Mutable pixel store, for drawing with `imageproc`
    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    /// Raw RGBA8 bytes, row-major
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        if x < self.width() && y < self.height() {
            Some(*self.image.get_pixel(x, y))
        } else {
            None
        }
    }

    pub fn clear(&mut self, color: Rgba<u8>) {
        for px in self.image.pixels_mut() {
            *px = color;
        }
    }

    /// Overwrite this buffer with another of the same size
    pub fn copy_from(&mut self, other: &ScreenBuffer) {
        if self.image.dimensions() == other.image.dimensions() {
            self.image.copy_from_slice(other.image.as_raw());
        } else {
            self.image = other.image.clone();
        }
    }

    pub fn fill_rect(&mut self, rect: PixelRect, color: Rgba<u8>) {
        let r = rect.intersect(&self.bounds());
        if r.is_empty() {
            return;
        }
        for y in r.y..r.bottom() {
            for x in r.x..r.right() {
                self.image.put_pixel(x as u32, y as u32, color);
            }
        }
    }

    /// Copy `src` with its top-left at (x, y), writing only inside `clip`
    pub fn blit(&mut self, src: &RgbaImage, x: i32, y: i32, clip: PixelRect) {
        let target = PixelRect::new(x, y, src.width() as i32, src.height() as i32)
            .intersect(&clip)
            .intersect(&self.bounds());
        if target.is_empty() {
            return;
        }

        let row_bytes = target.width as usize * BYTES_PER_PIXEL;
        let src_stride = src.width() as usize * BYTES_PER_PIXEL;
        let dst_stride = self.width() as usize * BYTES_PER_PIXEL;
        let src_raw = src.as_raw();
        let dst_raw: &mut [u8] = &mut self.image;

        for row in 0..target.height {
            let dy = (target.y + row) as usize;
            let sy = (target.y + row - y) as usize;
            let sx = (target.x - x) as usize;
            let src_start = sy * src_stride + sx * BYTES_PER_PIXEL;
            let dst_start = dy * dst_stride + target.x as usize * BYTES_PER_PIXEL;
            dst_raw[dst_start..dst_start + row_bytes]
                .copy_from_slice(&src_raw[src_start..src_start + row_bytes]);
        }
    }

    /// Move the contents by (dx, dy) pixels and fill the uncovered edges with `fill`
    ///
    /// Returns the uncovered strips (at most one per axis).
    pub fn scroll(&mut self, dx: i32, dy: i32, fill: Rgba<u8>) -> Vec<PixelRect> {
        let w = self.width() as i32;
        let h = self.height() as i32;

        if dx.abs() >= w || dy.abs() >= h {
            self.clear(fill);
            return vec![self.bounds()];
        }

        let span = (w - dx.abs()) as usize * BYTES_PER_PIXEL;
        let stride = w as usize * BYTES_PER_PIXEL;
        let src_x = (-dx).max(0) as usize * BYTES_PER_PIXEL;
        let dst_x = dx.max(0) as usize * BYTES_PER_PIXEL;
        let raw: &mut [u8] = &mut self.image;

        let copy_row = |raw: &mut [u8], dst_y: i32| {
            let src_y = dst_y - dy;
            let src = src_y as usize * stride + src_x;
            let dst = dst_y as usize * stride + dst_x;
            raw.copy_within(src..src + span, dst);
        };

        // Walk rows so that no source row is overwritten before it is read
        if dy > 0 {
            for dst_y in (dy..h).rev() {
                copy_row(raw, dst_y);
            }
        } else {
            for dst_y in 0..(h + dy) {
                copy_row(raw, dst_y);
            }
        }

        let mut exposed = Vec::with_capacity(2);
        if dx > 0 {
            exposed.push(PixelRect::new(0, 0, dx, h));
        } else if dx < 0 {
            exposed.push(PixelRect::new(w + dx, 0, -dx, h));
        }
        if dy > 0 {
            exposed.push(PixelRect::new(0, 0, w, dy));
        } else if dy < 0 {
            exposed.push(PixelRect::new(0, h + dy, w, -dy));
        }
        for strip in &exposed {
            self.fill_rect(*strip, fill);
        }
        exposed
    }
}
