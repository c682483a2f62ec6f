use core::convert::Infallible;

use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;

/// Visible pixels per row.
pub const WIDTH: u32 = 122;
/// Rows.
pub const HEIGHT: u32 = 250;
/// Rows are padded to 128 pixels in controller RAM.
pub const ROW_BYTES: usize = 16;
pub const BUFFER_LEN: usize = ROW_BYTES * HEIGHT as usize;

/// 1 bit per pixel, most significant bit leftmost. A set bit is white paper,
/// [`BinaryColor::On`] is black ink.
pub struct FrameBuffer {
    buf: [u8; BUFFER_LEN],
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    /// A blank (white) frame.
    pub const fn new() -> Self {
        Self {
            buf: [0xff; BUFFER_LEN],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn fill(&mut self, color: BinaryColor) {
        let byte = match color {
            BinaryColor::On => 0x00,
            BinaryColor::Off => 0xff,
        };
        self.buf.fill(byte);
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: BinaryColor) {
        if x >= WIDTH || y >= HEIGHT {
            return;
        }
        let idx = y as usize * ROW_BYTES + x as usize / 8;
        let mask = 0x80 >> (x % 8);
        match color {
            BinaryColor::On => self.buf[idx] &= !mask,
            BinaryColor::Off => self.buf[idx] |= mask,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<BinaryColor> {
        if x >= WIDTH || y >= HEIGHT {
            return None;
        }
        let idx = y as usize * ROW_BYTES + x as usize / 8;
        let mask = 0x80 >> (x % 8);
        Some(if self.buf[idx] & mask == 0 {
            BinaryColor::On
        } else {
            BinaryColor::Off
        })
    }

    /// Number of black pixels, handy for checking that something was drawn.
    pub fn ink(&self) -> usize {
        (0..HEIGHT)
            .flat_map(|y| (0..WIDTH).map(move |x| (x, y)))
            .filter(|&(x, y)| self.pixel(x, y) == Some(BinaryColor::On))
            .count()
    }
}

impl DrawTarget for FrameBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(Point { x, y }, color) in pixels {
            if x >= 0 && y >= 0 {
                self.set_pixel(x as u32, y as u32, color);
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.fill(color);
        Ok(())
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        Size::new(WIDTH, HEIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_layout() {
        let mut fb = FrameBuffer::new();
        assert!(fb.as_bytes().iter().all(|b| *b == 0xff));
        fb.set_pixel(0, 0, BinaryColor::On);
        fb.set_pixel(9, 1, BinaryColor::On);
        assert_eq!(fb.as_bytes()[0], 0x7f);
        assert_eq!(fb.as_bytes()[ROW_BYTES + 1], 0xbf);
        assert_eq!(fb.ink(), 2);

        fb.set_pixel(9, 1, BinaryColor::Off);
        assert_eq!(fb.pixel(9, 1), Some(BinaryColor::Off));
        assert_eq!(fb.pixel(WIDTH, 0), None);
    }

    #[test]
    fn test_draw_clips() {
        let mut fb = FrameBuffer::new();
        fb.draw_iter([
            Pixel(Point::new(-1, 0), BinaryColor::On),
            Pixel(Point::new(WIDTH as i32, 0), BinaryColor::On),
            Pixel(Point::new(0, HEIGHT as i32), BinaryColor::On),
        ])
        .unwrap();
        assert_eq!(fb.ink(), 0);
        fb.clear(BinaryColor::On).unwrap();
        assert_eq!(fb.ink(), (WIDTH * HEIGHT) as usize);
    }
}
