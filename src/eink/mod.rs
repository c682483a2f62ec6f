//! E-ink panel: frame buffer, text layout and the SPI driver.

mod epd;
mod framebuffer;

use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};

pub use epd::{Epd2in13, EpdError};
pub use framebuffer::{FrameBuffer, BUFFER_LEN, HEIGHT, ROW_BYTES, WIDTH};

const MARGIN: i32 = 10;
const LINE_PITCH: i32 = 12;
const CHAR_WIDTH: u32 = 6;

/// Characters that fit one text line inside the margins.
pub const LINE_CHARS: usize = ((WIDTH - MARGIN as u32) / CHAR_WIDTH) as usize;

/// Commands accepted on the display command characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayCommand<'a> {
    Clear,
    Refresh,
    Unknown(&'a str),
}

impl<'a> DisplayCommand<'a> {
    /// Anything that is not UTF-8 is reported as an unknown, empty command.
    pub fn parse(data: &'a [u8]) -> Self {
        let text = core::str::from_utf8(data).unwrap_or("").trim();
        match text {
            "clear" => DisplayCommand::Clear,
            "refresh" => DisplayCommand::Refresh,
            other => DisplayCommand::Unknown(other),
        }
    }
}

/// Render `text` onto a white frame, one line per `\n`, wrapping long lines.
/// Returns the number of lines drawn.
pub fn draw_text(fb: &mut FrameBuffer, text: &str) -> usize {
    fb.fill(BinaryColor::Off);
    let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
    let mut y = MARGIN;
    let mut lines = 0;
    for line in text.lines() {
        let mut rest = line;
        loop {
            if y + LINE_PITCH > HEIGHT as i32 {
                return lines;
            }
            let cut = split_index(rest, LINE_CHARS);
            let (head, tail) = rest.split_at(cut);
            let _ = Text::with_baseline(head, Point::new(MARGIN, y), style, Baseline::Top).draw(fb);
            y += LINE_PITCH;
            lines += 1;
            if tail.is_empty() {
                break;
            }
            rest = tail;
        }
    }
    lines
}

/// Byte index after at most `max` characters of `s`.
fn split_index(s: &str, max: usize) -> usize {
    s.char_indices().nth(max).map(|(i, _)| i).unwrap_or(s.len())
}
