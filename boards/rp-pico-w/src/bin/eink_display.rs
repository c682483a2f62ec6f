//! Waveshare 2.13" V4 e-ink panel driven over BLE.
//!
//! Wiring (SPI1): DIN GP11, CLK GP10, CS GP9, DC GP8, RST GP12, BUSY GP13.
#![no_std]
#![no_main]

use bt_hci::controller::ExternalController;
use cyw43_pio::{PioSpi, DEFAULT_CLOCK_DIVIDER};
use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::peripherals::PIO0;
use embassy_rp::pio::{InterruptHandler, Pio};
use embassy_rp::spi::{Config as SpiConfig, Spi};
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use pico_ble_demos::ble_eink_display;
use pico_ble_demos::config::EinkConfig;
use pico_ble_demos::eink::Epd2in13;
use rp_pico_w::{cyw43_task, OnboardLed, BT_FIRMWARE, CLM, FIRMWARE};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => InterruptHandler<PIO0>;
});

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());

    let pwr = Output::new(p.PIN_23, Level::Low);
    let cs = Output::new(p.PIN_25, Level::High);
    let mut pio = Pio::new(p.PIO0, Irqs);
    let spi = PioSpi::new(
        &mut pio.common,
        pio.sm0,
        DEFAULT_CLOCK_DIVIDER,
        pio.irq0,
        cs,
        p.PIN_24,
        p.PIN_29,
        p.DMA_CH0,
    );

    static STATE: StaticCell<cyw43::State> = StaticCell::new();
    let state = STATE.init(cyw43::State::new());
    let (_net_device, bt_device, mut control, runner) =
        cyw43::new_with_bluetooth(state, pwr, spi, FIRMWARE, BT_FIRMWARE).await;
    unwrap!(spawner.spawn(cyw43_task(runner)));
    control.init(CLM).await;

    let controller: ExternalController<_, 10> = ExternalController::new(bt_device);

    let eink = EinkConfig::default();
    let mut spi_config = SpiConfig::default();
    spi_config.frequency = eink.spi_frequency_hz;
    let bus = Spi::new_txonly(p.SPI1, p.PIN_10, p.PIN_11, p.DMA_CH1, spi_config);
    let panel_cs = Output::new(p.PIN_9, Level::High);
    let device = unwrap!(ExclusiveDevice::new(bus, panel_cs, Delay));
    let dc = Output::new(p.PIN_8, Level::Low);
    let rst = Output::new(p.PIN_12, Level::High);
    let busy = Input::new(p.PIN_13, Pull::Up);
    let epd = Epd2in13::new(device, dc, rst, busy, Delay, eink.busy_timeout);

    ble_eink_display::run(controller, epd, OnboardLed(control)).await;
}
