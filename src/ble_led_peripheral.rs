//! RGB LED peripheral.
//!
//! A central writes a colour to the RGB characteristic, either as three raw bytes or as
//! tab separated text, and the device drives the LED and reports the colour on the status
//! characteristic. The onboard LED blinks while a central is connected.

use embassy_futures::join::join3;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use heapless::{String, Vec};
use trouble_host::prelude::*;

use crate::common::{self, advertise, ble_task, next_step, short_string, AdServices, Step};
use crate::config::{AdvertisingConfig, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX};
use crate::dispatch::{Dispatcher, GattStatus, Outcome, Role};
use crate::event::{AttrHandle, BleEvent};
use crate::indicator::{self, Pattern, StatusLed};
use crate::link::LinkState;
use crate::rgb::{Rgb, RgbLed};

pub const LED_SERVICE: u16 = 0xa100;

pub const STATUS_READY: &str = "Ready";
pub const STATUS_CONNECTED: &str = "Connected";

// GATT Server definition
#[gatt_server]
struct Server {
    led: LedService,
}

#[gatt_service(uuid = "a100")]
struct LedService {
    /// Colour as `[r, g, b]` or `"r\tg\tb\n"`.
    #[characteristic(uuid = "a101", read, write)]
    rgb: Vec<u8, 32>,
    #[characteristic(uuid = "a102", read, notify)]
    status: String<24>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedHandles {
    pub rgb: AttrHandle,
    /// Read-only: the device alone writes the status.
    pub status: AttrHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedEffect {
    Connected,
    /// The last central left.
    Idle,
    Color(Rgb),
}

pub struct LedRole {
    handles: LedHandles,
    color: Rgb,
}

impl LedRole {
    pub fn new(handles: LedHandles) -> Self {
        Self {
            handles,
            color: Rgb::OFF,
        }
    }

    pub fn color(&self) -> Rgb {
        self.color
    }
}

impl Role for LedRole {
    type Effect = LedEffect;

    fn on_event<const N: usize>(&mut self, link: &LinkState<N>, event: &BleEvent<'_>) -> Outcome<LedEffect> {
        match *event {
            BleEvent::CentralConnect { conn, .. } => {
                info!("[led] connected: {:?}", conn);
                Outcome::silent().with(LedEffect::Connected)
            }
            BleEvent::CentralDisconnect { .. } if !link.any_connected() => Outcome::silent().with(LedEffect::Idle),
            BleEvent::GattsWrite { attr, data, .. } if attr == self.handles.rgb => match Rgb::parse(data) {
                Ok(rgb) => {
                    self.color = rgb;
                    Outcome::accept().with(LedEffect::Color(rgb))
                }
                Err(e) => {
                    warn!("[led] bad colour payload: {:?}", e);
                    Outcome::reject(GattStatus::ValueNotAllowed)
                }
            },
            BleEvent::GattsWrite { attr, .. } if attr == self.handles.status => {
                Outcome::reject(GattStatus::WriteNotPermitted)
            }
            _ => Outcome::ack(event),
        }
    }
}

pub async fn run<C, L, S>(controller: C, mut led: L, mut status_led: S)
where
    C: Controller,
    L: RgbLed,
    S: StatusLed,
{
    let config = AdvertisingConfig::named("BLE-LED", [0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xff]);
    let address: Address = Address::random(config.address);
    info!("Our address = {:?}", address);

    let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> = HostResources::new();
    let stack = trouble_host::new(controller, &mut resources).set_random_address(address);
    let Host {
        mut peripheral, runner, ..
    } = stack.build();

    let server = unwrap!(Server::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: config.name,
        appearance: &appearance::power_device::GENERIC_POWER_DEVICE,
    })));
    let handles = LedHandles {
        rgb: AttrHandle(server.led.rgb.handle),
        status: AttrHandle(server.led.status.handle),
    };
    let mut dispatcher: Dispatcher<LedRole, CONNECTIONS_MAX> = Dispatcher::new(LedRole::new(handles));
    let pattern: Signal<NoopRawMutex, Pattern> = Signal::new();

    led.set_rgb(Rgb::OFF);
    set_status(&server, short_string(STATUS_READY));

    info!("Starting advertising and GATT service");
    let _ = join3(ble_task(runner), indicator::run(&mut status_led, &pattern), async {
        loop {
            match advertise(config.name, AdServices::Short(&[LED_SERVICE.to_le_bytes()]), &mut peripheral).await {
                Ok(conn) => match conn.with_attribute_server(&server) {
                    Ok(conn) => serve(&server, &conn, &mut dispatcher, &mut led, &pattern).await,
                    Err(e) => error!("[gatt] error attaching server: {:?}", e),
                },
                Err(e) => {
                    #[cfg(feature = "defmt")]
                    let e = defmt::Debug2Format(&e);
                    error!("[adv] error: {:?}", e);
                }
            }
        }
    })
    .await;
}

/// Stream events until the connection closes.
async fn serve<L: RgbLed>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    dispatcher: &mut Dispatcher<LedRole, CONNECTIONS_MAX>,
    led: &mut L,
    pattern: &Signal<NoopRawMutex, Pattern>,
) {
    if let Some(effect) = common::open(conn.raw(), dispatcher) {
        apply(server, conn, led, pattern, effect).await;
    }
    loop {
        match next_step(conn, dispatcher).await {
            Step::Continue(effects) => {
                for effect in effects {
                    apply(server, conn, led, pattern, effect).await;
                }
            }
            Step::Closed(effect) => {
                if let Some(effect) = effect {
                    apply(server, conn, led, pattern, effect).await;
                }
                break;
            }
        }
    }
}

async fn apply<L: RgbLed>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    led: &mut L,
    pattern: &Signal<NoopRawMutex, Pattern>,
    effect: LedEffect,
) {
    let status = match effect {
        LedEffect::Connected => {
            pattern.signal(Pattern::SLOW);
            short_string(STATUS_CONNECTED)
        }
        LedEffect::Idle => {
            pattern.signal(Pattern::Off);
            set_status(server, short_string(STATUS_READY));
            return;
        }
        LedEffect::Color(rgb) => {
            info!("[led] {:?}", rgb);
            led.set_rgb(rgb);
            rgb.status_text()
        }
    };
    if let Err(e) = server.led.status.notify(conn, &status).await {
        debug!("[led] status not notified: {:?}", e);
    }
}

fn set_status(server: &Server<'_>, status: String<24>) {
    if let Err(e) = server.set(&server.led.status, &status) {
        warn!("[led] error setting status: {:?}", e);
    }
}
