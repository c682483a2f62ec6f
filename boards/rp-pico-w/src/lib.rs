//! Pico W glue for the demos: radio firmware, the onboard LED behind the CYW43, the external
//! RGB LED and I2S amplifier, the RNG and a flash partition for bonds.
#![no_std]

use core::convert::Infallible;
use core::ops::Range;

use cyw43_pio::PioSpi;
use embassy_rp::gpio::Output;
use embassy_rp::peripherals::{DMA_CH0, PIO0, PIO1};
use embassy_rp::pio_programs::i2s::PioI2sOut;
use embassy_rp::pwm::{Config as PwmConfig, Pwm};
use embedded_storage_async::nor_flash::NorFlash;
use fixed::types::extra::U4;
use fixed::FixedU16;
use pico_ble_demos::audio::AudioOutput;
use pico_ble_demos::config::LedConfig;
use pico_ble_demos::indicator::StatusLed;
use pico_ble_demos::rgb::{Rgb, RgbLed};
use pico_ble_demos::security::{BondStore, SecretRecord, SecretStorage, StoreError, KEY_MAX, VALUE_MAX};
use rand_chacha::ChaCha12Rng;
use rand_core::{RngCore, SeedableRng};
use sequential_storage::cache::NoCache;
use sequential_storage::map::{Key, SerializationError};

#[cfg(not(feature = "skip-cyw43-firmware"))]
pub static FIRMWARE: &[u8] = include_bytes!("../cyw43-firmware/43439A0.bin");
#[cfg(not(feature = "skip-cyw43-firmware"))]
pub static CLM: &[u8] = include_bytes!("../cyw43-firmware/43439A0_clm.bin");
#[cfg(not(feature = "skip-cyw43-firmware"))]
pub static BT_FIRMWARE: &[u8] = include_bytes!("../cyw43-firmware/43439A0_btfw.bin");

#[cfg(feature = "skip-cyw43-firmware")]
pub static FIRMWARE: &[u8] = &[];
#[cfg(feature = "skip-cyw43-firmware")]
pub static CLM: &[u8] = &[];
#[cfg(feature = "skip-cyw43-firmware")]
pub static BT_FIRMWARE: &[u8] = &[];

#[embassy_executor::task]
pub async fn cyw43_task(runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>) -> ! {
    runner.run().await
}

/// The green LED on the Pico W hangs off the radio chip's GPIO 0.
pub struct OnboardLed(pub cyw43::Control<'static>);

impl StatusLed for OnboardLed {
    async fn set(&mut self, on: bool) {
        self.0.gpio_set(0, on).await;
    }
}

const PWM_TOP: u16 = u16::MAX;

/// Common-cathode RGB LED: red on GP17 and blue on GP16 share PWM slice 0, green on GP22
/// is slice 3 channel A.
pub struct PwmRgbLed<'d> {
    red_blue: Pwm<'d>,
    green: Pwm<'d>,
    red_blue_config: PwmConfig,
    green_config: PwmConfig,
}

impl<'d> PwmRgbLed<'d> {
    /// `red_blue` must be built with `Pwm::new_output_ab` on GP16/GP17 and `green` with
    /// `Pwm::new_output_a` on GP22, both from [`PwmRgbLed::config`].
    pub fn new(red_blue: Pwm<'d>, green: Pwm<'d>, led: &LedConfig) -> Self {
        let config = Self::config(led);
        Self {
            red_blue,
            green,
            red_blue_config: config.clone(),
            green_config: config,
        }
    }

    /// Slice configuration for `LedConfig::pwm_frequency_hz`, all channels off.
    pub fn config(led: &LedConfig) -> PwmConfig {
        let clock = embassy_rp::clocks::clk_sys_freq() as f32;
        let divider = clock / (led.pwm_frequency_hz as f32 * (PWM_TOP as f32 + 1.0));
        let mut config = PwmConfig::default();
        config.top = PWM_TOP;
        config.divider = FixedU16::<U4>::from_num(divider.clamp(1.0, 255.0));
        config.compare_a = 0;
        config.compare_b = 0;
        config
    }
}

impl RgbLed for PwmRgbLed<'_> {
    fn set_rgb(&mut self, rgb: Rgb) {
        self.red_blue_config.compare_a = Rgb::duty_u16(rgb.b);
        self.red_blue_config.compare_b = Rgb::duty_u16(rgb.r);
        self.green_config.compare_a = Rgb::duty_u16(rgb.g);
        self.red_blue.set_config(&self.red_blue_config);
        self.green.set_config(&self.green_config);
    }
}

const I2S_WORDS: usize = 256;

/// UDA1334A style DAC on PIO1: BCK GP16, WS GP17, DIN GP18 and an active-low mute on GP22.
pub struct I2sOutput<'d> {
    i2s: PioI2sOut<'d, PIO1, 0>,
    mute: Output<'d>,
    words: [u32; I2S_WORDS],
}

impl<'d> I2sOutput<'d> {
    pub fn new(mut i2s: PioI2sOut<'d, PIO1, 0>, mut mute: Output<'d>) -> Self {
        mute.set_high();
        i2s.start();
        Self {
            i2s,
            mute,
            words: [0; I2S_WORDS],
        }
    }
}

impl AudioOutput for I2sOutput<'_> {
    type Error = Infallible;

    async fn write(&mut self, samples: &[u8]) -> Result<(), Infallible> {
        for chunk in samples.chunks(I2S_WORDS * 4) {
            let mut n = 0;
            for frame in chunk.chunks_exact(4) {
                let left = u16::from_le_bytes([frame[0], frame[1]]) as u32;
                let right = u16::from_le_bytes([frame[2], frame[3]]) as u32;
                self.words[n] = (left << 16) | right;
                n += 1;
            }
            self.i2s.write(&self.words[..n]).await;
        }
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) {
        if muted {
            self.mute.set_low();
        } else {
            self.mute.set_high();
        }
    }
}

/// The RP2040 has no TRNG; seed a ChaCha generator from the ring oscillator.
pub fn chacha_from_rosc() -> ChaCha12Rng {
    let mut seed = <ChaCha12Rng as SeedableRng>::Seed::default();
    embassy_rp::clocks::RoscRng.fill_bytes(&mut seed);
    ChaCha12Rng::from_seed(seed)
}

/// Size of the Pico W's flash chip.
pub const FLASH_SIZE: usize = 2 * 1024 * 1024;

/// The last 64K of flash hold the bonds. `memory.x` keeps the program out of it.
pub const SECRETS_RANGE: Range<u32> = (FLASH_SIZE as u32 - 64 * 1024)..FLASH_SIZE as u32;

/// Map key of a stored secret: its kind, then the length-prefixed key bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SecretKey {
    kind: u8,
    key: heapless::Vec<u8, KEY_MAX>,
}

impl Key for SecretKey {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        let len = 2 + self.key.len();
        if buffer.len() < len {
            return Err(SerializationError::BufferTooSmall);
        }
        buffer[0] = self.kind;
        buffer[1] = self.key.len() as u8;
        buffer[2..len].copy_from_slice(&self.key);
        Ok(len)
    }

    fn deserialize_from(buffer: &[u8]) -> Result<(Self, usize), SerializationError> {
        let [kind, len, rest @ ..] = buffer else {
            return Err(SerializationError::BufferTooSmall);
        };
        let bytes = rest.get(..*len as usize).ok_or(SerializationError::BufferTooSmall)?;
        let key = heapless::Vec::from_slice(bytes).map_err(|_| SerializationError::InvalidData)?;
        Ok((Self { kind: *kind, key }, 2 + bytes.len()))
    }
}

#[derive(Debug)]
pub enum SecretsError<E> {
    Flash(sequential_storage::Error<E>),
    Store(StoreError),
}

impl<E> From<sequential_storage::Error<E>> for SecretsError<E> {
    fn from(e: sequential_storage::Error<E>) -> Self {
        Self::Flash(e)
    }
}

/// Secrets kept in a sequential-storage map on a NOR flash range.
pub struct FlashSecrets<F> {
    flash: F,
    range: Range<u32>,
    buffer: [u8; 2 + KEY_MAX + VALUE_MAX + 30],
}

impl<F: NorFlash> FlashSecrets<F> {
    pub fn new(flash: F, range: Range<u32>) -> Self {
        Self {
            flash,
            range,
            buffer: [0; 2 + KEY_MAX + VALUE_MAX + 30],
        }
    }
}

impl<F: NorFlash> SecretStorage for FlashSecrets<F> {
    type Error = SecretsError<F::Error>;

    async fn load<const N: usize>(&mut self, store: &mut BondStore<N>) -> Result<(), Self::Error> {
        let mut cache = NoCache::new();
        let mut items = sequential_storage::map::fetch_all_items::<SecretKey, _, _>(
            &mut self.flash,
            self.range.clone(),
            &mut cache,
            &mut self.buffer,
        )
        .await?;
        // later items supersede earlier ones with the same key
        while let Some((key, value)) = items.next::<&[u8]>(&mut self.buffer).await? {
            store.set(key.kind, &key.key, Some(value)).map_err(SecretsError::Store)?;
        }
        defmt::info!("[flash] loaded {} secrets", store.len());
        Ok(())
    }

    async fn save(&mut self, record: &SecretRecord) -> Result<(), Self::Error> {
        let key = SecretKey {
            kind: record.kind,
            key: record.key.clone(),
        };
        if record.is_deletion() {
            sequential_storage::map::remove_item(
                &mut self.flash,
                self.range.clone(),
                &mut NoCache::new(),
                &mut self.buffer,
                &key,
            )
            .await?;
        } else {
            sequential_storage::map::store_item(
                &mut self.flash,
                self.range.clone(),
                &mut NoCache::new(),
                &mut self.buffer,
                &key,
                &record.value.as_slice(),
            )
            .await?;
        }
        Ok(())
    }
}
