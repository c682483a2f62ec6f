//! Notifications at four security levels plus an acknowledged indication.
//!
//! Once a second a `Notify N` goes out on the characteristic for level `N % 4` (basic,
//! encrypted, authenticated, authorized), provided the link meets that level. Every fifth
//! round an `Indicate N` is sent, but only when no earlier indication is still waiting
//! for its confirmation.

use core::cell::RefCell;
use core::fmt::Write as _;

use embassy_futures::join::join;
use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Ticker};
use heapless::String;
use trouble_host::prelude::*;

use crate::common::{self, advertise, ble_task, conn_handle, handle, short_string, AdServices, Step};
use crate::config::{AdvertisingConfig, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX};
use crate::dispatch::{Dispatcher, Outcome, Role};
use crate::event::{AttrHandle, BleEvent, ConnHandle};
use crate::indicator::StatusLed;
use crate::link::LinkState;
use crate::security::{self, Access};

/// `DEAD0000-1337-4242-9999-222222222222`, little endian.
pub const NOTIFY_SERVICE: [u8; 16] = [
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x99, 0x99, 0x42, 0x42, 0x37, 0x13, 0x00, 0x00, 0xad, 0xde,
];

/// Security level of each notify characteristic, by round.
pub const LEVELS: [Access; 4] = [Access::Open, Access::Encrypted, Access::Authenticated, Access::Authorized];

const ROUND: Duration = Duration::from_secs(1);
const INDICATE_EVERY: u32 = 5;

// GATT Server definition
#[gatt_server]
struct Server {
    demo: NotifyService,
}

#[gatt_service(uuid = "dead0000-1337-4242-9999-222222222222")]
struct NotifyService {
    #[characteristic(uuid = "dead0001-1337-4242-9999-222222222222", read, notify)]
    basic: String<24>,
    #[characteristic(uuid = "dead0002-1337-4242-9999-222222222222", read, notify)]
    encrypted: String<24>,
    #[characteristic(uuid = "dead0003-1337-4242-9999-222222222222", read, notify)]
    authenticated: String<24>,
    #[characteristic(uuid = "dead0004-1337-4242-9999-222222222222", read, notify)]
    authorized: String<24>,
    #[characteristic(uuid = "dead0005-1337-4242-9999-222222222222", read, indicate)]
    indicate: String<24>,
    #[characteristic(uuid = "dead0006-1337-4242-9999-222222222222", read)]
    status: String<40>,
}

/// One round of traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub counter: u32,
    pub level: u8,
    /// `None` when the link does not meet the level.
    pub notify: Option<String<24>>,
    pub indicate: Option<String<24>>,
}

impl Round {
    pub fn status(&self) -> String<40> {
        let mut s = String::new();
        let _ = match (&self.notify, &self.indicate) {
            (_, Some(_)) => write!(s, "Indication sent"),
            (Some(_), None) => write!(s, "Notification sent (level {})", self.level),
            (None, None) => write!(s, "Notification withheld (level {})", self.level),
        };
        s
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEffect {
    Connected(ConnHandle),
    Disconnected,
    Round(Round),
}

pub struct NotifyRole {
    indicate: AttrHandle,
    counter: u32,
    indicate_pending: bool,
}

impl NotifyRole {
    pub fn new(indicate: AttrHandle) -> Self {
        Self {
            indicate,
            counter: 0,
            indicate_pending: false,
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn indicate_pending(&self) -> bool {
        self.indicate_pending
    }
}

impl Role for NotifyRole {
    type Effect = NotifyEffect;

    fn on_event<const N: usize>(&mut self, _link: &LinkState<N>, event: &BleEvent<'_>) -> Outcome<NotifyEffect> {
        match *event {
            BleEvent::CentralConnect { conn, .. } => Outcome::silent().with(NotifyEffect::Connected(conn)),
            BleEvent::CentralDisconnect { .. } => {
                self.indicate_pending = false;
                Outcome::silent().with(NotifyEffect::Disconnected)
            }
            BleEvent::GattsIndicateDone { attr, status, .. } if attr == self.indicate => {
                debug!("[notify] indication done, status {}", status);
                self.indicate_pending = false;
                Outcome::silent()
            }
            BleEvent::EncryptionUpdate {
                encrypted, authenticated, ..
            } => {
                info!("[notify] link encrypted: {}, authenticated: {}", encrypted, authenticated);
                Outcome::silent()
            }
            _ => Outcome::ack(event),
        }
    }

    fn on_tick<const N: usize>(&mut self, link: &LinkState<N>) -> Option<NotifyEffect> {
        let conn = link.connections().first()?;
        let counter = self.counter;
        self.counter = self.counter.wrapping_add(1);

        let level = (counter % LEVELS.len() as u32) as u8;
        let notify = match security::check(LEVELS[level as usize], conn.security, false) {
            Ok(()) => {
                let mut text = String::new();
                let _ = write!(text, "Notify {}", counter);
                Some(text)
            }
            Err(status) => {
                debug!("[notify] level {} withheld: {:?}", level, status);
                None
            }
        };
        let indicate = if counter % INDICATE_EVERY == 0 && !self.indicate_pending {
            self.indicate_pending = true;
            let mut text = String::new();
            let _ = write!(text, "Indicate {}", counter);
            Some(text)
        } else {
            None
        };
        Some(NotifyEffect::Round(Round {
            counter,
            level,
            notify,
            indicate,
        }))
    }
}

type SharedDispatcher = Mutex<NoopRawMutex, RefCell<Dispatcher<NotifyRole, CONNECTIONS_MAX>>>;

pub async fn run<C, S>(controller: C, mut status_led: S)
where
    C: Controller,
    S: StatusLed,
{
    let config = AdvertisingConfig::named("notify-demo", [0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xf9]);
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
    let role = NotifyRole::new(AttrHandle(server.demo.indicate.handle));
    let dispatcher: SharedDispatcher = Mutex::new(RefCell::new(Dispatcher::new(role)));

    let _ = join(ble_task(runner), async {
        loop {
            match advertise(config.name, AdServices::Long(&NOTIFY_SERVICE), &mut peripheral).await {
                Ok(conn) => match conn.with_attribute_server(&server) {
                    Ok(conn) => {
                        let events = serve(&server, &conn, &dispatcher, &mut status_led);
                        let rounds = rounds(&server, &conn, &dispatcher);
                        select(events, rounds).await;
                    }
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

fn dispatch(dispatcher: &SharedDispatcher, event: &BleEvent<'_>) -> Outcome<NotifyEffect> {
    dispatcher.lock(|d| d.borrow_mut().dispatch(event))
}

/// Stream events until the connection closes.
async fn serve<S: StatusLed>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    dispatcher: &SharedDispatcher,
    status_led: &mut S,
) {
    let open = dispatcher.lock(|d| common::open(conn.raw(), &mut d.borrow_mut()));
    if let Some(effect) = open {
        apply(server, conn, dispatcher, status_led, effect).await;
    }
    loop {
        let event = conn.next().await;
        match handle(conn, event, |e| dispatch(dispatcher, e)).await {
            Step::Continue(effects) => {
                for effect in effects {
                    apply(server, conn, dispatcher, status_led, effect).await;
                }
            }
            Step::Closed(effect) => {
                if let Some(effect) = effect {
                    apply(server, conn, dispatcher, status_led, effect).await;
                }
                break;
            }
        }
    }
}

/// Run one round per second for as long as the connection lasts.
async fn rounds(server: &Server<'_>, conn: &GattConnection<'_, '_, DefaultPacketPool>, dispatcher: &SharedDispatcher) {
    let mut ticker = Ticker::every(ROUND);
    loop {
        ticker.next().await;
        let round = dispatcher.lock(|d| d.borrow_mut().tick());
        if let Some(NotifyEffect::Round(round)) = round {
            send(server, conn, dispatcher, round).await;
        }
    }
}

async fn apply<S: StatusLed>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    dispatcher: &SharedDispatcher,
    status_led: &mut S,
    effect: NotifyEffect,
) {
    let status: String<40> = match effect {
        NotifyEffect::Connected(handle) => {
            status_led.set(true).await;
            let mut s = String::new();
            let _ = write!(s, "Connected: {}", handle.0);
            s
        }
        NotifyEffect::Disconnected => {
            status_led.set(false).await;
            short_string("Disconnected")
        }
        NotifyEffect::Round(round) => return send(server, conn, dispatcher, round).await,
    };
    set_status(server, &status);
}

async fn send(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    dispatcher: &SharedDispatcher,
    round: Round,
) {
    if let Some(text) = &round.notify {
        let characteristic = match round.level {
            0 => &server.demo.basic,
            1 => &server.demo.encrypted,
            2 => &server.demo.authenticated,
            _ => &server.demo.authorized,
        };
        if let Err(e) = characteristic.notify(conn, text).await {
            debug!("[notify] notification not sent: {:?}", e);
        }
    }
    if let Some(text) = &round.indicate {
        let status = match server.demo.indicate.indicate(conn, text).await {
            Ok(()) => 0,
            Err(e) => {
                warn!("[notify] indication failed: {:?}", e);
                1
            }
        };
        dispatch(
            dispatcher,
            &BleEvent::GattsIndicateDone {
                conn: conn_handle(conn.raw()),
                attr: AttrHandle(server.demo.indicate.handle),
                status,
            },
        );
    }
    set_status(server, &round.status());
}

fn set_status(server: &Server<'_>, status: &String<40>) {
    if let Err(e) = server.set(&server.demo.status, status) {
        warn!("[notify] error setting status: {:?}", e);
    }
}
