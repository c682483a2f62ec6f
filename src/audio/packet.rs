/// Length of the sequence number that prefixes every audio packet.
pub const HEADER_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketError {
    TooShort,
    /// Output buffer cannot hold header and payload.
    BufferTooSmall,
}

/// `seq: u16 LE` followed by raw PCM bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AudioPacket<'a> {
    pub seq: u16,
    pub samples: &'a [u8],
}

impl<'a> AudioPacket<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, PacketError> {
        if data.len() <= HEADER_LEN {
            return Err(PacketError::TooShort);
        }
        Ok(Self {
            seq: u16::from_le_bytes([data[0], data[1]]),
            samples: &data[HEADER_LEN..],
        })
    }

    /// Write the packet into `out`, returning the encoded length.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, PacketError> {
        let len = HEADER_LEN + self.samples.len();
        if out.len() < len {
            return Err(PacketError::BufferTooSmall);
        }
        out[..HEADER_LEN].copy_from_slice(&self.seq.to_le_bytes());
        out[HEADER_LEN..len].copy_from_slice(self.samples);
        Ok(len)
    }
}

/// Counts packets missing from a 16-bit wrapping sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SequenceTracker {
    expected: Option<u16>,
    lost: u32,
    late: u32,
}

impl SequenceTracker {
    pub const fn new() -> Self {
        Self {
            expected: None,
            lost: 0,
            late: 0,
        }
    }

    /// Record `seq` and return how many packets were skipped before it.
    ///
    /// A number from the past half of the sequence space is a late or duplicate packet: it is
    /// counted separately and does not move the expected number.
    pub fn observe(&mut self, seq: u16) -> u16 {
        let Some(expected) = self.expected else {
            self.expected = Some(seq.wrapping_add(1));
            return 0;
        };
        let gap = seq.wrapping_sub(expected);
        if gap >= 0x8000 {
            self.late += 1;
            return 0;
        }
        self.expected = Some(seq.wrapping_add(1));
        self.lost += gap as u32;
        gap
    }

    pub fn lost(&self) -> u32 {
        self.lost
    }

    pub fn late(&self) -> u32 {
        self.late
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let p = AudioPacket::parse(&[0x34, 0x12, 7, 8]).unwrap();
        assert_eq!(p.seq, 0x1234);
        assert_eq!(p.samples, &[7, 8]);
        assert_eq!(AudioPacket::parse(&[1, 2]), Err(PacketError::TooShort));

        let mut out = [0; 4];
        assert_eq!(p.encode(&mut out), Ok(4));
        assert_eq!(out, [0x34, 0x12, 7, 8]);
        assert_eq!(p.encode(&mut out[..3]), Err(PacketError::BufferTooSmall));
    }

    #[test]
    fn test_loss_across_wrap() {
        let mut t = SequenceTracker::new();
        assert_eq!(t.observe(65533), 0);
        assert_eq!(t.observe(65534), 0);
        // 65535 and 0 are missing
        assert_eq!(t.observe(1), 2);
        assert_eq!(t.observe(2), 0);
        assert_eq!(t.lost(), 2);
    }

    #[test]
    fn test_late_packets() {
        let mut t = SequenceTracker::new();
        t.observe(10);
        t.observe(11);
        assert_eq!(t.observe(5), 0);
        assert_eq!(t.late(), 1);
        assert_eq!(t.observe(12), 0);
        assert_eq!(t.lost(), 0);
    }
}
