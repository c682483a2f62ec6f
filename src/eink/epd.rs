//! Driver for the Waveshare 2.13" V4 e-paper panel (SSD1680 class controller).

use embassy_time::{with_timeout, Duration};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;
use embedded_hal_async::spi::SpiDevice;

use super::framebuffer::{FrameBuffer, BUFFER_LEN, HEIGHT, ROW_BYTES};

mod cmd {
    pub const DRIVER_OUTPUT: u8 = 0x01;
    pub const DEEP_SLEEP: u8 = 0x10;
    pub const DATA_ENTRY_MODE: u8 = 0x11;
    pub const SW_RESET: u8 = 0x12;
    pub const TEMPERATURE_SENSOR: u8 = 0x18;
    pub const MASTER_ACTIVATION: u8 = 0x20;
    pub const UPDATE_CONTROL_1: u8 = 0x21;
    pub const UPDATE_CONTROL_2: u8 = 0x22;
    pub const WRITE_RAM_BW: u8 = 0x24;
    pub const BORDER_WAVEFORM: u8 = 0x3c;
    pub const RAM_X_RANGE: u8 = 0x44;
    pub const RAM_Y_RANGE: u8 = 0x45;
    pub const RAM_X_COUNTER: u8 = 0x4e;
    pub const RAM_Y_COUNTER: u8 = 0x4f;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EpdError<S, P> {
    Spi(S),
    Pin(P),
    /// The panel held BUSY longer than allowed.
    BusyTimeout,
}

pub struct Epd2in13<SPI, DC, RST, BUSY, D> {
    spi: SPI,
    dc: DC,
    rst: RST,
    busy: BUSY,
    delay: D,
    busy_timeout: Duration,
}

type Result<T, SPI, DC> =
    core::result::Result<T, EpdError<<SPI as embedded_hal_async::spi::ErrorType>::Error, <DC as embedded_hal::digital::ErrorType>::Error>>;

impl<SPI, DC, RST, BUSY, D> Epd2in13<SPI, DC, RST, BUSY, D>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin<Error = DC::Error>,
    BUSY: Wait<Error = DC::Error>,
    D: DelayNs,
{
    pub fn new(spi: SPI, dc: DC, rst: RST, busy: BUSY, delay: D, busy_timeout: Duration) -> Self {
        Self {
            spi,
            dc,
            rst,
            busy,
            delay,
            busy_timeout,
        }
    }

    /// Give back the bus and pins.
    pub fn release(self) -> (SPI, DC, RST, BUSY, D) {
        (self.spi, self.dc, self.rst, self.busy, self.delay)
    }

    /// Hardware reset followed by the full-refresh register setup.
    pub async fn init(&mut self) -> Result<(), SPI, DC> {
        self.reset().await?;
        self.delay.delay_ms(100).await;
        self.wait_idle().await?;
        self.command(cmd::SW_RESET).await?;
        self.wait_idle().await?;

        let last_row = (HEIGHT - 1) as u16;
        self.command_with(cmd::DRIVER_OUTPUT, &[(last_row & 0xff) as u8, (last_row >> 8) as u8, 0x00])
            .await?;
        // x increment, y increment
        self.command_with(cmd::DATA_ENTRY_MODE, &[0x03]).await?;
        self.command_with(cmd::RAM_X_RANGE, &[0x00, (ROW_BYTES - 1) as u8]).await?;
        self.command_with(
            cmd::RAM_Y_RANGE,
            &[0x00, 0x00, (last_row & 0xff) as u8, (last_row >> 8) as u8],
        )
        .await?;
        self.set_cursor().await?;
        self.command_with(cmd::BORDER_WAVEFORM, &[0x05]).await?;
        self.command_with(cmd::UPDATE_CONTROL_1, &[0x00, 0x80]).await?;
        // internal temperature sensor
        self.command_with(cmd::TEMPERATURE_SENSOR, &[0x80]).await?;
        self.wait_idle().await
    }

    /// Upload a frame and run a full refresh.
    pub async fn display(&mut self, frame: &FrameBuffer) -> Result<(), SPI, DC> {
        self.set_cursor().await?;
        self.command_with(cmd::WRITE_RAM_BW, frame.as_bytes()).await?;
        self.refresh().await
    }

    /// Blank the panel to white.
    pub async fn clear(&mut self) -> Result<(), SPI, DC> {
        self.set_cursor().await?;
        self.command(cmd::WRITE_RAM_BW).await?;
        let white = [0xffu8; ROW_BYTES * 10];
        for _ in 0..BUFFER_LEN / white.len() {
            self.data(&white).await?;
        }
        self.refresh().await
    }

    /// Run the display update sequence on what is already in RAM.
    pub async fn refresh(&mut self) -> Result<(), SPI, DC> {
        self.command_with(cmd::UPDATE_CONTROL_2, &[0xf7]).await?;
        self.command(cmd::MASTER_ACTIVATION).await?;
        self.wait_idle().await
    }

    /// Deep sleep. Only a hardware reset (`init`) wakes the panel.
    pub async fn sleep(&mut self) -> Result<(), SPI, DC> {
        self.command_with(cmd::DEEP_SLEEP, &[0x01]).await?;
        self.delay.delay_ms(100).await;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), SPI, DC> {
        self.rst.set_high().map_err(EpdError::Pin)?;
        self.delay.delay_ms(20).await;
        self.rst.set_low().map_err(EpdError::Pin)?;
        self.delay.delay_ms(2).await;
        self.rst.set_high().map_err(EpdError::Pin)?;
        self.delay.delay_ms(20).await;
        Ok(())
    }

    async fn set_cursor(&mut self) -> Result<(), SPI, DC> {
        self.command_with(cmd::RAM_X_COUNTER, &[0x00]).await?;
        self.command_with(cmd::RAM_Y_COUNTER, &[0x00, 0x00]).await
    }

    async fn wait_idle(&mut self) -> Result<(), SPI, DC> {
        match with_timeout(self.busy_timeout, self.busy.wait_for_low()).await {
            Ok(r) => r.map_err(EpdError::Pin),
            Err(_) => {
                warn!("[epd] busy timeout");
                Err(EpdError::BusyTimeout)
            }
        }
    }

    async fn command(&mut self, c: u8) -> Result<(), SPI, DC> {
        self.dc.set_low().map_err(EpdError::Pin)?;
        self.spi.write(&[c]).await.map_err(EpdError::Spi)
    }

    async fn data(&mut self, d: &[u8]) -> Result<(), SPI, DC> {
        self.dc.set_high().map_err(EpdError::Pin)?;
        self.spi.write(d).await.map_err(EpdError::Spi)
    }

    async fn command_with(&mut self, c: u8, d: &[u8]) -> Result<(), SPI, DC> {
        self.command(c).await?;
        self.data(d).await
    }
}
