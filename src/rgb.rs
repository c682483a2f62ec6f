//! RGB LED colour payloads.

use core::fmt::Write;

use heapless::String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PayloadError {
    Empty,
    NotUtf8,
    /// Text did not hold exactly three tab-separated fields.
    FieldCount,
    /// A field was not a number in 0..=255.
    Component,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Decode a characteristic write.
    ///
    /// Exactly three bytes are taken as raw components. Anything else must be UTF-8 text of
    /// the form `R\tG\tB`, optionally newline terminated; a `Red...` header row decodes as
    /// [`Rgb::OFF`].
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() == 3 {
            return Ok(Self::new(payload[0], payload[1], payload[2]));
        }
        if payload.is_empty() {
            return Err(PayloadError::Empty);
        }
        let text = core::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
        let line = text.trim_end_matches(['\n', '\r']);
        if line.starts_with("Red") {
            return Ok(Self::OFF);
        }
        let mut fields = line.split('\t');
        let mut next = || -> Result<u8, PayloadError> {
            let field = fields.next().ok_or(PayloadError::FieldCount)?;
            field.trim().parse::<u8>().map_err(|_| PayloadError::Component)
        };
        let rgb = Self::new(next()?, next()?, next()?);
        if fields.next().is_some() {
            return Err(PayloadError::FieldCount);
        }
        Ok(rgb)
    }

    /// Lenient byte form: missing components are 0, extra bytes are ignored.
    pub fn from_prefix(payload: &[u8]) -> Self {
        let at = |i: usize| payload.get(i).copied().unwrap_or(0);
        Self::new(at(0), at(1), at(2))
    }

    pub const fn to_bytes(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// PWM duty cycle for one component, full scale at 255.
    pub const fn duty_u16(component: u8) -> u16 {
        component as u16 * 257
    }

    /// Duty cycle scaled to a PWM counter that wraps at `top`.
    pub fn duty_for_top(component: u8, top: u16) -> u16 {
        ((component as u32 * top as u32) / 255) as u16
    }

    /// Text payload `R\tG\tB\n`, as a central writes it.
    pub fn to_text(self) -> String<12> {
        let mut s = String::new();
        let _ = write!(s, "{}\t{}\t{}\n", self.r, self.g, self.b);
        s
    }

    /// Status line, e.g. `RGB: (255,0,64)`.
    pub fn status_text(self) -> String<24> {
        let mut s = String::new();
        // 24 bytes always fit the longest rendering
        let _ = write!(s, "RGB: ({},{},{})", self.r, self.g, self.b);
        s
    }
}

/// Something that can show a colour.
pub trait RgbLed {
    fn set_rgb(&mut self, rgb: Rgb);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw() {
        assert_eq!(Rgb::parse(&[1, 2, 3]), Ok(Rgb::new(1, 2, 3)));
        // three ASCII bytes are still raw components
        assert_eq!(Rgb::parse(b"0\t1"), Ok(Rgb::new(b'0', b'\t', b'1')));
    }

    #[test]
    fn test_parse_text() {
        assert_eq!(Rgb::parse(b"255\t128\t0\n"), Ok(Rgb::new(255, 128, 0)));
        assert_eq!(Rgb::parse(b"10\t20\t30\r\n"), Ok(Rgb::new(10, 20, 30)));
        assert_eq!(Rgb::parse(b" 10\t20 \t30"), Ok(Rgb::new(10, 20, 30)));
        assert_eq!(Rgb::parse(b"Red\tGreen\tBlue\n"), Ok(Rgb::OFF));
    }

    #[test]
    fn test_parse_malformed() {
        assert_eq!(Rgb::parse(b""), Err(PayloadError::Empty));
        assert_eq!(Rgb::parse(b"1\t2\n"), Err(PayloadError::FieldCount));
        assert_eq!(Rgb::parse(b"1\t2\t3\t4"), Err(PayloadError::FieldCount));
        assert_eq!(Rgb::parse(b"1\t2\t300"), Err(PayloadError::Component));
        assert_eq!(Rgb::parse(b"a\tb\tc"), Err(PayloadError::Component));
        assert_eq!(Rgb::parse(&[0xff, 0xfe, 0xfd, 0xfc]), Err(PayloadError::NotUtf8));
    }

    #[test]
    fn test_prefix() {
        assert_eq!(Rgb::from_prefix(&[]), Rgb::OFF);
        assert_eq!(Rgb::from_prefix(&[9]), Rgb::new(9, 0, 0));
        assert_eq!(Rgb::from_prefix(&[1, 2, 3, 4, 5]), Rgb::new(1, 2, 3));
    }

    #[test]
    fn test_duty() {
        assert_eq!(Rgb::duty_u16(0), 0);
        assert_eq!(Rgb::duty_u16(255), u16::MAX);
        assert_eq!(Rgb::duty_u16(128), 32896);
        assert_eq!(Rgb::duty_for_top(255, 1000), 1000);
        assert_eq!(Rgb::duty_for_top(51, 1000), 200);
    }

    #[test]
    fn test_text_parses_back() {
        let rgb = Rgb::new(255, 0, 64);
        assert_eq!(rgb.to_text().as_str(), "255\t0\t64\n");
        assert_eq!(Rgb::parse(rgb.to_text().as_bytes()), Ok(rgb));
    }

    #[test]
    fn test_status_text() {
        assert_eq!(Rgb::new(255, 255, 255).status_text().as_str(), "RGB: (255,255,255)");
        assert_eq!(Rgb::OFF.status_text().as_str(), "RGB: (0,0,0)");
    }
}
