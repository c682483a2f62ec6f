//! Kitchen sink GATT server: a UART service and one service per kind of access.
//!
//! * UART (Nordic UART layout): rx is written by the central, tx streams `N_` counter
//!   ticks while connected.
//! * Read: a counter, a variable, and reads gated on encryption, authentication and
//!   authorization.
//! * Write: writes that refresh the counter or set the variable, plus gated writes.
//! * RGB (0x1337): an array write drives the RGB LED, missing components count as 0.
//! * Notify, Indicate, Notify+Indicate: writes are echoed back to subscribers.

use core::fmt::Write as _;

use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Ticker};
use heapless::{String, Vec};
use trouble_host::prelude::*;

use crate::common::{self, advertise, ble_task, handle, short_string, AdServices, Step};
use crate::config::{AdvertisingConfig, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX};
use crate::dispatch::{Dispatcher, Outcome, Role};
use crate::event::{AttrHandle, BleEvent};
use crate::indicator::StatusLed;
use crate::link::LinkState;
use crate::rgb::{Rgb, RgbLed};
use crate::security::{self, Access};

/// `6E400001-B5A3-F393-E0A9-E50E24DCCA9E`, little endian.
pub const UART_SERVICE: [u8; 16] = [
    0x9e, 0xca, 0xdc, 0x24, 0x0e, 0xe5, 0xa9, 0xe0, 0x93, 0xf3, 0xa3, 0xb5, 0x01, 0x00, 0x40, 0x6e,
];

pub const RGB_SERVICE: u16 = 0x1337;

/// Largest echoed or streamed value.
pub const VALUE_MAX: usize = 20;

const TICK: Duration = Duration::from_millis(100);

// GATT Server definition
#[gatt_server]
struct Server {
    uart: UartService,
    read: ReadService,
    write: WriteService,
    rgb: RgbService,
    notify: NotifyService,
    indicate: IndicateService,
    notify_indicate: NotifyIndicateService,
}

#[gatt_service(uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e")]
struct UartService {
    #[characteristic(uuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e", read, notify)]
    tx: Vec<u8, VALUE_MAX>,
    #[characteristic(uuid = "6e400002-b5a3-f393-e0a9-e50e24dcca9e", write, write_without_response)]
    rx: Vec<u8, 64>,
}

#[gatt_service(uuid = "13372ead-0000-1111-2222-333344445555")]
struct ReadService {
    #[characteristic(uuid = "13372ead-0001-1111-2222-333344445555", read)]
    counter: String<16>,
    #[characteristic(uuid = "13372ead-0002-1111-2222-333344445555", read)]
    variable: Vec<u8, 64>,
    #[characteristic(uuid = "13372ead-0003-1111-2222-333344445555", read)]
    encrypted: String<16>,
    #[characteristic(uuid = "13372ead-0004-1111-2222-333344445555", read)]
    authenticated: String<16>,
    #[characteristic(uuid = "13372ead-0005-1111-2222-333344445555", read)]
    authorized: String<16>,
}

#[gatt_service(uuid = "0003217e-0000-1111-2222-333344445555")]
struct WriteService {
    /// Any write refreshes the counter characteristic.
    #[characteristic(uuid = "0003217e-0001-1111-2222-333344445555", write, write_without_response)]
    general: Vec<u8, 64>,
    /// Written value becomes the read variable.
    #[characteristic(uuid = "0003217e-0002-1111-2222-333344445555", write, write_without_response)]
    variable: Vec<u8, 64>,
    #[characteristic(uuid = "0003217e-0003-1111-2222-333344445555", write)]
    encrypted: Vec<u8, 64>,
    #[characteristic(uuid = "0003217e-0004-1111-2222-333344445555", write)]
    authenticated: Vec<u8, 64>,
    #[characteristic(uuid = "0003217e-0005-1111-2222-333344445555", write)]
    authorized: Vec<u8, 64>,
    #[characteristic(uuid = "0003217e-0008-1111-2222-333344445555", write)]
    response_general: Vec<u8, 64>,
    #[characteristic(uuid = "0003217e-0009-1111-2222-333344445555", write)]
    response_variable: Vec<u8, 64>,
}

#[gatt_service(uuid = "1337")]
struct RgbService {
    #[characteristic(uuid = "1138", write, write_without_response)]
    array: Vec<u8, 32>,
}

#[gatt_service(uuid = "009071fe-0000-1111-2222-333344445555")]
struct NotifyService {
    #[characteristic(uuid = "009071fe-0001-1111-2222-333344445555", read, notify)]
    read: Vec<u8, VALUE_MAX>,
    #[characteristic(uuid = "009071fe-0002-1111-2222-333344445555", write_without_response, notify)]
    write_no_response: Vec<u8, VALUE_MAX>,
    #[characteristic(uuid = "009071fe-0003-1111-2222-333344445555", write, notify)]
    write_response: Vec<u8, VALUE_MAX>,
}

#[gatt_service(uuid = "19d1ca7e-0000-1111-2222-333344445555")]
struct IndicateService {
    #[characteristic(uuid = "19d1ca7e-0001-1111-2222-333344445555", read, indicate)]
    read: Vec<u8, VALUE_MAX>,
    #[characteristic(uuid = "19d1ca7e-0002-1111-2222-333344445555", write_without_response, indicate)]
    write_no_response: Vec<u8, VALUE_MAX>,
    #[characteristic(uuid = "19d1ca7e-0003-1111-2222-333344445555", write, indicate)]
    write_response: Vec<u8, VALUE_MAX>,
}

#[gatt_service(uuid = "9071ca73-0000-1111-2222-333344445555")]
struct NotifyIndicateService {
    #[characteristic(uuid = "9071ca73-0001-1111-2222-333344445555", read, notify, indicate)]
    read: Vec<u8, VALUE_MAX>,
    #[characteristic(uuid = "9071ca73-0002-1111-2222-333344445555", write_without_response, notify, indicate)]
    write_no_response: Vec<u8, VALUE_MAX>,
    #[characteristic(uuid = "9071ca73-0003-1111-2222-333344445555", write, notify, indicate)]
    write_response: Vec<u8, VALUE_MAX>,
}

/// How a written value travels back to the central.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Echo {
    Notify,
    Indicate,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KitchenHandles {
    pub rx: AttrHandle,
    /// Writes that refresh the counter.
    pub counter_writes: [AttrHandle; 2],
    /// Writes whose value becomes the read variable.
    pub variable_writes: [AttrHandle; 2],
    pub rgb: AttrHandle,
    /// Characteristics that need more than an open link.
    pub guarded: Vec<(AttrHandle, Access), 8>,
    pub echoes: Vec<(AttrHandle, Echo), 8>,
}

impl KitchenHandles {
    fn access(&self, attr: AttrHandle) -> Access {
        self.guarded
            .iter()
            .find(|(h, _)| *h == attr)
            .map(|(_, a)| *a)
            .unwrap_or_default()
    }

    fn echo(&self, attr: AttrHandle) -> Option<Echo> {
        self.echoes.iter().find(|(h, _)| *h == attr).map(|(_, e)| *e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KitchenEffect {
    Connected,
    Idle,
    /// Stream a tick on the UART and publish the counter.
    Tick(u32),
    Counter(u32),
    Variable(Vec<u8, 64>),
    Color(Rgb),
    Echo {
        attr: AttrHandle,
        echo: Echo,
        data: Vec<u8, VALUE_MAX>,
    },
}

pub struct KitchenRole {
    handles: KitchenHandles,
    counter: u32,
}

impl KitchenRole {
    pub fn new(handles: KitchenHandles) -> Self {
        Self { handles, counter: 0 }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    fn write(&mut self, attr: AttrHandle, data: &[u8]) -> Outcome<KitchenEffect> {
        let accept = Outcome::accept();
        if attr == self.handles.rx {
            info!("[uart] rx {} bytes", data.len());
            accept
        } else if self.handles.counter_writes.contains(&attr) {
            accept.with(KitchenEffect::Counter(self.counter))
        } else if self.handles.variable_writes.contains(&attr) {
            let mut value = Vec::new();
            let _ = value.extend_from_slice(&data[..data.len().min(64)]);
            accept.with(KitchenEffect::Variable(value))
        } else if attr == self.handles.rgb {
            accept.with(KitchenEffect::Color(Rgb::from_prefix(data)))
        } else if let Some(echo) = self.handles.echo(attr) {
            let mut value = Vec::new();
            let _ = value.extend_from_slice(&data[..data.len().min(VALUE_MAX)]);
            accept.with(KitchenEffect::Echo { attr, echo, data: value })
        } else {
            accept
        }
    }
}

impl Role for KitchenRole {
    type Effect = KitchenEffect;

    fn on_event<const N: usize>(&mut self, link: &LinkState<N>, event: &BleEvent<'_>) -> Outcome<KitchenEffect> {
        match *event {
            BleEvent::CentralConnect { conn, .. } => {
                info!("[kitchen] new connection {:?}", conn);
                Outcome::silent().with(KitchenEffect::Connected)
            }
            BleEvent::CentralDisconnect { conn, .. } => {
                info!("[kitchen] disconnected {:?}", conn);
                if link.any_connected() {
                    Outcome::silent()
                } else {
                    Outcome::silent().with(KitchenEffect::Idle)
                }
            }
            BleEvent::GattsReadRequest { conn, attr } => {
                match security::check(self.handles.access(attr), link.security(conn), false) {
                    Ok(()) => Outcome::accept(),
                    Err(status) => {
                        info!("[kitchen] read of {:?} denied: {:?}", attr, status);
                        Outcome::reject(status)
                    }
                }
            }
            BleEvent::GattsWrite { conn, attr, data } => {
                match security::check(self.handles.access(attr), link.security(conn), false) {
                    Ok(()) => self.write(attr, data),
                    Err(status) => {
                        info!("[kitchen] write to {:?} denied: {:?}", attr, status);
                        Outcome::reject(status)
                    }
                }
            }
            BleEvent::EncryptionUpdate {
                conn,
                encrypted,
                authenticated,
                bonded,
                key_size,
            } => {
                info!(
                    "[kitchen] {:?} encrypted: {}, authenticated: {}, bonded: {}, key size: {}",
                    conn, encrypted, authenticated, bonded, key_size
                );
                Outcome::silent()
            }
            _ => Outcome::ack(event),
        }
    }

    fn on_tick<const N: usize>(&mut self, link: &LinkState<N>) -> Option<KitchenEffect> {
        if !link.any_connected() {
            return None;
        }
        let n = self.counter;
        self.counter = self.counter.wrapping_add(1);
        Some(KitchenEffect::Tick(n))
    }
}

pub async fn run<C, L, S>(controller: C, mut led: L, mut status_led: S)
where
    C: Controller,
    L: RgbLed,
    S: StatusLed,
{
    let config = AdvertisingConfig::named("mpy-uart", [0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xfa]);
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
    let handles = handles(&server);
    let mut dispatcher: Dispatcher<KitchenRole, CONNECTIONS_MAX> = Dispatcher::new(KitchenRole::new(handles));

    for (c, text) in [
        (&server.read.encrypted, "Encrypted read"),
        (&server.read.authenticated, "Authenticated"),
        (&server.read.authorized, "Authorized read"),
        (&server.read.counter, "R-Serv Char 01"),
    ] {
        if let Err(e) = server.set(c, &short_string(text)) {
            warn!("[kitchen] error setting {}: {:?}", text, e);
        }
    }
    if let Err(e) = server.set(&server.read.variable, &Vec::from_slice(b"R-Serv Char Var").unwrap_or_default()) {
        warn!("[kitchen] error setting variable: {:?}", e);
    }
    led.set_rgb(Rgb::OFF);

    let _ = join(ble_task(runner), async {
        loop {
            match advertise(config.name, AdServices::Long(&UART_SERVICE), &mut peripheral).await {
                Ok(conn) => match conn.with_attribute_server(&server) {
                    Ok(conn) => serve(&server, &conn, &mut dispatcher, &mut led, &mut status_led).await,
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

fn handles(server: &Server<'_>) -> KitchenHandles {
    let h = AttrHandle;
    let mut guarded = Vec::new();
    let mut echoes = Vec::new();
    for entry in [
        (h(server.read.encrypted.handle), Access::Encrypted),
        (h(server.read.authenticated.handle), Access::Authenticated),
        (h(server.read.authorized.handle), Access::Authorized),
        (h(server.write.encrypted.handle), Access::Encrypted),
        (h(server.write.authenticated.handle), Access::Authenticated),
        (h(server.write.authorized.handle), Access::Authorized),
    ] {
        let _ = guarded.push(entry);
    }
    for entry in [
        (h(server.notify.write_no_response.handle), Echo::Notify),
        (h(server.notify.write_response.handle), Echo::Notify),
        (h(server.indicate.write_no_response.handle), Echo::Indicate),
        (h(server.indicate.write_response.handle), Echo::Indicate),
        (h(server.notify_indicate.write_no_response.handle), Echo::Both),
        (h(server.notify_indicate.write_response.handle), Echo::Both),
    ] {
        let _ = echoes.push(entry);
    }
    KitchenHandles {
        rx: h(server.uart.rx.handle),
        counter_writes: [h(server.write.general.handle), h(server.write.response_general.handle)],
        variable_writes: [h(server.write.variable.handle), h(server.write.response_variable.handle)],
        rgb: h(server.rgb.array.handle),
        guarded,
        echoes,
    }
}

/// Stream events until the connection closes, ticking the UART stream in between.
async fn serve<L: RgbLed, S: StatusLed>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    dispatcher: &mut Dispatcher<KitchenRole, CONNECTIONS_MAX>,
    led: &mut L,
    status_led: &mut S,
) {
    if let Some(effect) = common::open(conn.raw(), dispatcher) {
        apply(server, conn, led, status_led, effect).await;
    }
    let mut ticker = Ticker::every(TICK);
    loop {
        let next = select(conn.next(), ticker.next()).await;
        let step = match next {
            Either::First(event) => handle(conn, event, |e| dispatcher.dispatch(e)).await,
            Either::Second(_) => Step::Continue(dispatcher.tick().into()),
        };
        match step {
            Step::Continue(effects) => {
                for effect in effects {
                    apply(server, conn, led, status_led, effect).await;
                }
            }
            Step::Closed(effect) => {
                if let Some(effect) = effect {
                    apply(server, conn, led, status_led, effect).await;
                }
                break;
            }
        }
    }
}

async fn apply<L: RgbLed, S: StatusLed>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    led: &mut L,
    status_led: &mut S,
    effect: KitchenEffect,
) {
    let result = match effect {
        KitchenEffect::Connected => {
            status_led.set(true).await;
            Ok(())
        }
        KitchenEffect::Idle => {
            status_led.set(false).await;
            led.set_rgb(Rgb::OFF);
            Ok(())
        }
        KitchenEffect::Tick(n) => {
            let mut data: Vec<u8, VALUE_MAX> = Vec::new();
            let mut text: String<VALUE_MAX> = String::new();
            let _ = write!(text, "{}_", n);
            let _ = data.extend_from_slice(text.as_bytes());
            set_counter(server, n);
            server.uart.tx.notify(conn, &data).await
        }
        KitchenEffect::Counter(n) => {
            set_counter(server, n);
            Ok(())
        }
        KitchenEffect::Variable(value) => server.set(&server.read.variable, &value),
        KitchenEffect::Color(rgb) => {
            info!("[kitchen] {:?}", rgb);
            led.set_rgb(rgb);
            Ok(())
        }
        KitchenEffect::Echo { attr, echo, data } => echo_back(server, conn, attr, echo, &data).await,
    };
    if let Err(e) = result {
        debug!("[kitchen] effect not applied: {:?}", e);
    }
}

fn set_counter(server: &Server<'_>, n: u32) {
    let mut text: String<16> = String::new();
    let _ = write!(text, "{}", n);
    if let Err(e) = server.set(&server.read.counter, &text) {
        warn!("[kitchen] error setting counter: {:?}", e);
    }
}

async fn echo_back(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    attr: AttrHandle,
    echo: Echo,
    data: &Vec<u8, VALUE_MAX>,
) -> Result<(), Error> {
    let (notify, indicate) = if attr.0 == server.notify.write_no_response.handle {
        (Some(&server.notify.write_no_response), None)
    } else if attr.0 == server.notify.write_response.handle {
        (Some(&server.notify.write_response), None)
    } else if attr.0 == server.indicate.write_no_response.handle {
        (None, Some(&server.indicate.write_no_response))
    } else if attr.0 == server.indicate.write_response.handle {
        (None, Some(&server.indicate.write_response))
    } else if attr.0 == server.notify_indicate.write_no_response.handle {
        let c = &server.notify_indicate.write_no_response;
        (Some(c), Some(c))
    } else {
        let c = &server.notify_indicate.write_response;
        (Some(c), Some(c))
    };
    debug!("[kitchen] echo {:?} on {:?}", echo, attr);
    if let Some(c) = notify {
        c.notify(conn, data).await?;
    }
    if let Some(c) = indicate {
        c.indicate(conn, data).await?;
    }
    Ok(())
}
