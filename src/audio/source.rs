use super::packet::{AudioPacket, PacketError};

/// A 16-bit analog sample source, e.g. an ADC channel scaled to full range.
pub trait SampleSource {
    fn read_u16(&mut self) -> u16;
}

impl<F: FnMut() -> u16> SampleSource for F {
    fn read_u16(&mut self) -> u16 {
        self()
    }
}

/// Reduce a 16-bit reading to an unsigned 8-bit PCM sample.
pub const fn to_u8_sample(raw: u16) -> u8 {
    (raw >> 8) as u8
}

/// Assembles captured samples into sequenced packets.
#[derive(Debug)]
pub struct Framer<const CHUNK: usize> {
    samples: [u8; CHUNK],
    len: usize,
    seq: u16,
}

impl<const CHUNK: usize> Default for Framer<CHUNK> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CHUNK: usize> Framer<CHUNK> {
    pub const fn new() -> Self {
        Self {
            samples: [0; CHUNK],
            len: 0,
            seq: 0,
        }
    }

    /// Add one sample. Returns true once a full chunk is ready.
    pub fn push(&mut self, sample: u8) -> bool {
        if self.len < CHUNK {
            self.samples[self.len] = sample;
            self.len += 1;
        }
        self.len == CHUNK
    }

    pub fn is_ready(&self) -> bool {
        self.len == CHUNK
    }

    /// Samples collected for the current chunk.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop the current chunk; the sequence number carries on.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Encode the buffered samples into `out` and start a new chunk.
    pub fn take(&mut self, out: &mut [u8]) -> Result<usize, PacketError> {
        let packet = AudioPacket {
            seq: self.seq,
            samples: &self.samples[..self.len],
        };
        let n = packet.encode(out)?;
        self.seq = self.seq.wrapping_add(1);
        self.len = 0;
        Ok(n)
    }

    pub fn seq(&self) -> u16 {
        self.seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sequence() {
        let mut level = 0u16;
        let mut adc = || {
            level = level.wrapping_add(0x0100);
            level
        };
        let mut framer: Framer<4> = Framer::new();
        let mut ready = false;
        for _ in 0..4 {
            ready = framer.push(to_u8_sample(adc.read_u16()));
        }
        assert!(ready);

        let mut out = [0; 6];
        assert_eq!(framer.take(&mut out), Ok(6));
        assert_eq!(out, [0, 0, 1, 2, 3, 4]);
        assert!(!framer.is_ready());

        framer.push(7);
        assert_eq!(framer.len(), 1);
        framer.clear();
        assert!(framer.is_empty());
        framer.push(9);
        let n = framer.take(&mut out).unwrap();
        assert_eq!(&out[..n], &[1, 0, 9]);
        assert_eq!(framer.seq(), 2);
    }
}
