//! Audio sink: GATT and L2CAP audio played on an I2S DAC.
//!
//! Wiring: BCK GP16, WS GP17, DIN GP18, MUTE GP22 (active low).
#![no_std]
#![no_main]

use bt_hci::controller::ExternalController;
use cyw43_pio::{PioSpi, DEFAULT_CLOCK_DIVIDER};
use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{PIO0, PIO1};
use embassy_rp::pio::{InterruptHandler, Pio};
use embassy_rp::pio_programs::i2s::{PioI2sOut, PioI2sOutProgram};
use pico_ble_demos::ble_audio_sink;
use pico_ble_demos::config::AudioConfig;
use rp_pico_w::{cyw43_task, I2sOutput, OnboardLed, BT_FIRMWARE, CLM, FIRMWARE};
use static_cell::StaticCell;
use {defmt_rtt as _, embassy_time as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => InterruptHandler<PIO0>;
    PIO1_IRQ_0 => InterruptHandler<PIO1>;
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

    let audio = AudioConfig::playback();
    let Pio {
        mut common, sm0, ..
    } = Pio::new(p.PIO1, Irqs);
    let program = PioI2sOutProgram::new(&mut common);
    let i2s = PioI2sOut::new(
        &mut common,
        sm0,
        p.DMA_CH1,
        p.PIN_18,
        p.PIN_16,
        p.PIN_17,
        audio.sample_rate,
        audio.bits_per_sample as u32,
        &program,
    );
    let mute = Output::new(p.PIN_22, Level::Low);
    let output = I2sOutput::new(i2s, mute);

    ble_audio_sink::run(controller, output, OnboardLed(control)).await;
}
