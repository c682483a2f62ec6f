// Quarter wave of sin(x) for x in 0..=pi/2, 64 steps, full scale i16.
const SIN_Q: [i16; 65] = [
    0, 804, 1608, 2410, 3212, 4011, 4808, 5602, 6393, 7179, 7962, 8739, 9512, 10278, 11039, 11793, 12539, 13279,
    14010, 14732, 15446, 16151, 16846, 17530, 18204, 18868, 19519, 20159, 20787, 21403, 22005, 22594, 23170, 23731,
    24279, 24811, 25329, 25832, 26319, 26790, 27245, 27683, 28105, 28510, 28898, 29268, 29621, 29956, 30273, 30571,
    30852, 31113, 31356, 31580, 31785, 31971, 32137, 32285, 32412, 32521, 32609, 32678, 32728, 32757, 32767,
];

/// Sine of a 32-bit phase where `u32::MAX + 1` is one full turn.
fn isin(phase: u32) -> i16 {
    let a = phase >> 24;
    let i = (a % 64) as usize;
    match a / 64 {
        0 => SIN_Q[i],
        1 => SIN_Q[64 - i],
        2 => -SIN_Q[i],
        _ => -SIN_Q[64 - i],
    }
}

/// Phase-continuous sine generator producing 16-bit stereo little-endian frames.
#[derive(Debug, Clone, Copy)]
pub struct Tone {
    phase: u32,
    step: u32,
    /// Amplitude as a fraction of full scale, in percent.
    level: u8,
}

impl Tone {
    pub fn new(frequency_hz: u32, sample_rate: u32, level: u8) -> Self {
        let step = ((frequency_hz as u64) << 32) / sample_rate.max(1) as u64;
        Self {
            phase: 0,
            step: step as u32,
            level: level.min(100),
        }
    }

    /// The 440 Hz, half amplitude test tone.
    pub fn a440(sample_rate: u32) -> Self {
        Self::new(440, sample_rate, 50)
    }

    /// Fill whole stereo frames of `buf`; returns the bytes written.
    pub fn fill(&mut self, buf: &mut [u8]) -> usize {
        let len = buf.len() - buf.len() % 4;
        for frame in buf[..len].chunks_exact_mut(4) {
            let v = (isin(self.phase) as i32 * self.level as i32 / 100) as i16;
            let bytes = v.to_le_bytes();
            frame[..2].copy_from_slice(&bytes);
            frame[2..].copy_from_slice(&bytes);
            self.phase = self.phase.wrapping_add(self.step);
        }
        len
    }
}
