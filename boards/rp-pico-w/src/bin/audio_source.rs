//! Microphone on GP26 streamed over L2CAP as 8 kHz 8-bit PCM.
#![no_std]
#![no_main]

use bt_hci::controller::ExternalController;
use cyw43_pio::{PioSpi, DEFAULT_CLOCK_DIVIDER};
use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::PIO0;
use embassy_rp::pio::{InterruptHandler, Pio};
use embassy_rp::adc::{Adc, Channel, Config as AdcConfig};
use embassy_rp::gpio::Pull;
use pico_ble_demos::ble_audio_source;
use rp_pico_w::{cyw43_task, OnboardLed, BT_FIRMWARE, CLM, FIRMWARE};
use static_cell::StaticCell;
use {defmt_rtt as _, embassy_time as _, panic_probe as _};

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

    let mut adc = Adc::new_blocking(p.ADC, AdcConfig::default());
    let mut mic = Channel::new_pin(p.PIN_26, Pull::None);
    // 12-bit conversions scaled to the full 16-bit range
    let sample = move || adc.blocking_read(&mut mic).map(|v| v << 4).unwrap_or(0);

    ble_audio_source::run(controller, sample, OnboardLed(control)).await;
}
