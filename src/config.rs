//! Settings shared by the demos.
//!
//! Every struct has a `Default` carrying the values the demos ship with; boards may override
//! individual fields before handing the config to a demo's `run`.

use embassy_time::Duration;

/// Max number of connections a peripheral demo serves at once.
pub const CONNECTIONS_MAX: usize = 1;

/// Max number of L2CAP channels.
pub const L2CAP_CHANNELS_MAX: usize = 3; // Signal + att + CoC

// PSMs from the dynamic range (0x0080-0x00FF) according to the Bluetooth
// Specification for L2CAP channels using LE Credit Based Flow Control mode.
//
// https://www.bluetooth.com/wp-content/uploads/Files/Specification/HTML/Core-60/out/en/host/logical-link-control-and-adaptation-protocol-specification.html#UUID-1ffdf913-7b8a-c7ba-531e-2a9c6f6da8fb
//
pub const PSM_L2CAP_ECHO: u16 = 0x0081;
pub const PSM_L2CAP_AUDIO: u16 = 0x0082;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingConfig {
    pub name: &'static str,
    /// Static random address.
    pub address: [u8; 6],
    pub interval: Duration,
}

impl AdvertisingConfig {
    pub const fn named(name: &'static str, address: [u8; 6]) -> Self {
        Self {
            name,
            address,
            interval: Duration::from_millis(100),
        }
    }
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        Self::named("Pico W BLE", [0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xff])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capConfig {
    pub psm: u16,
    pub mtu: u16,
}

impl Default for L2capConfig {
    fn default() -> Self {
        Self {
            psm: PSM_L2CAP_ECHO,
            mtu: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub bits_per_sample: u8,
    pub channels: u8,
    /// Payload bytes per packet.
    pub chunk_size: usize,
    /// Buffered bytes that start playback.
    pub prebuffer: usize,
    pub volume: u8,
    pub volume_step: u8,
}

impl AudioConfig {
    /// 8 kHz mono 8-bit capture, as streamed by the ADC source.
    pub const fn capture() -> Self {
        Self {
            sample_rate: 8_000,
            bits_per_sample: 8,
            channels: 1,
            chunk_size: 512,
            prebuffer: 1024,
            volume: 80,
            volume_step: 10,
        }
    }

    /// 44.1 kHz stereo 16-bit playback, as consumed by the I2S sink.
    pub const fn playback() -> Self {
        Self {
            sample_rate: 44_100,
            bits_per_sample: 16,
            channels: 2,
            chunk_size: 512,
            prebuffer: 2048,
            volume: 80,
            volume_step: 10,
        }
    }

    pub const fn bytes_per_frame(&self) -> usize {
        (self.bits_per_sample as usize / 8) * self.channels as usize
    }

    pub const fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.bytes_per_frame() as u32
    }

    /// Time one chunk of audio lasts.
    pub fn chunk_period(&self) -> Duration {
        let micros = self.chunk_size as u64 * 1_000_000 / self.bytes_per_second() as u64;
        Duration::from_micros(micros)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self::playback()
    }
}

/// Device Information service strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub software: &'static str,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            manufacturer: "pico-ble-demos",
            model: "Pico-W Audio Sink v1.0",
            software: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedConfig {
    pub pwm_frequency_hz: u32,
    /// Status LED period while a central is connected.
    pub blink: Duration,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            pwm_frequency_hz: 1_000,
            blink: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EinkConfig {
    pub spi_frequency_hz: u32,
    /// Upper bound for a busy wait on the panel.
    pub busy_timeout: Duration,
}

impl Default for EinkConfig {
    fn default() -> Self {
        Self {
            spi_frequency_hz: 4_000_000,
            busy_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_period() {
        assert_eq!(AudioConfig::capture().chunk_period(), Duration::from_millis(64));
        assert_eq!(AudioConfig::playback().bytes_per_second(), 176_400);
        assert_eq!(AudioConfig::playback().bytes_per_frame(), 4);
    }

    #[test]
    fn test_psms_in_dynamic_range() {
        for psm in [PSM_L2CAP_ECHO, PSM_L2CAP_AUDIO] {
            assert!((0x80..=0xff).contains(&psm));
        }
    }
}
