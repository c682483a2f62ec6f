//! Bonding peripheral with numeric comparison.
//!
//! Buttons to ground: confirm on GP14, reject on GP15. Bonds survive a reset in the last 64K
//! of flash.
#![no_std]
#![no_main]

use bt_hci::controller::ExternalController;
use cyw43_pio::{PioSpi, DEFAULT_CLOCK_DIVIDER};
use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::flash::{Async, Flash};
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::peripherals::PIO0;
use embassy_rp::pio::{InterruptHandler, Pio};
use pico_ble_demos::ble_pairing_demo;
use rp_pico_w::{
    chacha_from_rosc, cyw43_task, FlashSecrets, OnboardLed, BT_FIRMWARE, CLM, FIRMWARE, FLASH_SIZE, SECRETS_RANGE,
};
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

    let mut rng = chacha_from_rosc();
    let yes = Input::new(p.PIN_14, Pull::Up);
    let no = Input::new(p.PIN_15, Pull::Up);
    let flash = Flash::<_, Async, FLASH_SIZE>::new(p.FLASH, p.DMA_CH2);
    let mut secrets = FlashSecrets::new(flash, SECRETS_RANGE);

    ble_pairing_demo::run(controller, &mut rng, &mut secrets, yes, no, OnboardLed(control)).await;
}
