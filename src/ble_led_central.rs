//! Central that drives a [`ble_led_peripheral`](crate::ble_led_peripheral).
//!
//! Scans until an advertiser lists the LED service, connects to it, looks up the RGB
//! characteristic and then writes the next colour of [`COLORS`] as `R\tG\tB\n` text once a
//! second. When the link drops it goes back to scanning.

use core::cell::RefCell;

use bt_hci::cmd::le::LeSetScanParams;
use bt_hci::controller::ControllerCmdSync;
use embassy_futures::join::join3;
use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker, Timer};
use trouble_host::prelude::*;

use crate::adv;
use crate::ble_led_peripheral::LED_SERVICE;
use crate::common::conn_handle;
use crate::config::{CONNECTIONS_MAX, L2CAP_CHANNELS_MAX};
use crate::dispatch::{Dispatcher, Outcome, Role};
use crate::error::Error;
use crate::event::{AttrHandle, BleEvent, ConnHandle, PeerAddr, UuidRef};
use crate::indicator::{self, Pattern, StatusLed};
use crate::link::LinkState;
use crate::rgb::Rgb;

pub const RGB_CHARACTERISTIC: u16 = 0xa101;

/// Colours written in turn, one per second.
pub const COLORS: [Rgb; 4] = [
    Rgb::new(255, 0, 0),
    Rgb::new(0, 255, 0),
    Rgb::new(0, 0, 255),
    Rgb::new(255, 255, 255),
];

const COLOR_PERIOD: Duration = Duration::from_secs(1);

/// Characteristic properties of the RGB value: read and write.
const RGB_PROPERTIES: u8 = 0x02 | 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CentralEffect {
    /// An LED peripheral showed up in the scan.
    Found(PeerAddr),
    Connected(ConnHandle),
    /// The RGB characteristic was found.
    Ready(AttrHandle),
    Write { attr: AttrHandle, color: Rgb },
    Disconnected,
}

pub struct CentralRole {
    rgb: Option<AttrHandle>,
    next_color: usize,
}

impl CentralRole {
    pub fn new() -> Self {
        Self {
            rgb: None,
            next_color: 0,
        }
    }

    pub fn rgb(&self) -> Option<AttrHandle> {
        self.rgb
    }
}

impl Default for CentralRole {
    fn default() -> Self {
        Self::new()
    }
}

impl Role for CentralRole {
    type Effect = CentralEffect;

    fn on_event<const N: usize>(&mut self, link: &LinkState<N>, event: &BleEvent<'_>) -> Outcome<CentralEffect> {
        match *event {
            BleEvent::ScanResult { peer, rssi, data, .. } if !link.any_connected() => {
                if !adv::advertises_service16(data, LED_SERVICE) {
                    return Outcome::silent();
                }
                info!(
                    "[central] found {:?} ({} dBm): {:?}",
                    peer.addr,
                    rssi,
                    adv::local_name(data).unwrap_or("?")
                );
                Outcome::silent().with(CentralEffect::Found(peer))
            }
            BleEvent::PeripheralConnect { conn, .. } => {
                self.rgb = None;
                Outcome::silent().with(CentralEffect::Connected(conn))
            }
            BleEvent::GattcCharacteristicResult {
                value,
                uuid: UuidRef::Short(RGB_CHARACTERISTIC),
                ..
            } => {
                self.rgb = Some(value);
                Outcome::silent().with(CentralEffect::Ready(value))
            }
            BleEvent::GattcWriteDone { attr, status, .. } => {
                if status != 0 {
                    warn!("[central] write to {:?} failed: {}", attr, status);
                }
                Outcome::silent()
            }
            BleEvent::PeripheralDisconnect { .. } => {
                self.rgb = None;
                Outcome::silent().with(CentralEffect::Disconnected)
            }
            _ => Outcome::ack(event),
        }
    }

    fn on_tick<const N: usize>(&mut self, link: &LinkState<N>) -> Option<CentralEffect> {
        let attr = self.rgb?;
        if !link.any_connected() {
            return None;
        }
        let color = COLORS[self.next_color % COLORS.len()];
        self.next_color = self.next_color.wrapping_add(1);
        Some(CentralEffect::Write { attr, color })
    }
}

type SharedDispatcher = Mutex<NoopRawMutex, RefCell<Dispatcher<CentralRole, CONNECTIONS_MAX>>>;

fn dispatch(dispatcher: &SharedDispatcher, event: &BleEvent<'_>) -> Outcome<CentralEffect> {
    dispatcher.lock(|d| d.borrow_mut().dispatch(event))
}

/// Feeds advertising reports to the dispatcher and publishes the first LED peripheral seen.
struct Finder<'a> {
    dispatcher: &'a SharedDispatcher,
    found: &'a Signal<NoopRawMutex, PeerAddr>,
}

impl EventHandler for Finder<'_> {
    fn on_adv_reports(&self, mut it: LeAdvReportsIter<'_>) {
        while let Some(Ok(report)) = it.next() {
            let mut addr = [0; 6];
            addr.copy_from_slice(report.addr.raw());
            let peer = if report.addr_kind == AddrKind::RANDOM {
                PeerAddr::random(addr)
            } else {
                PeerAddr::public(addr)
            };
            let event = BleEvent::ScanResult {
                peer,
                adv_type: report.event_kind as u8,
                rssi: report.rssi,
                data: report.data,
            };
            if let Some(CentralEffect::Found(peer)) = dispatch(self.dispatcher, &event).effect {
                self.found.signal(peer);
            }
        }
    }
}

pub async fn run<C, S>(controller: C, mut status_led: S)
where
    C: Controller + ControllerCmdSync<LeSetScanParams>,
    S: StatusLed,
{
    let address: Address = Address::random([0xff, 0x8f, 0x1b, 0x05, 0xe4, 0xff]);
    info!("Our address = {:?}", address);

    let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> = HostResources::new();
    let stack = trouble_host::new(controller, &mut resources).set_random_address(address);
    let Host {
        central, mut runner, ..
    } = stack.build();

    let dispatcher: SharedDispatcher = Mutex::new(RefCell::new(Dispatcher::new(CentralRole::new())));
    let found: Signal<NoopRawMutex, PeerAddr> = Signal::new();
    let pattern: Signal<NoopRawMutex, Pattern> = Signal::new();
    let finder = Finder {
        dispatcher: &dispatcher,
        found: &found,
    };

    let ble = async {
        loop {
            if let Err(e) = runner.run_with_handler(&finder).await {
                #[cfg(feature = "defmt")]
                let e = defmt::Debug2Format(&e);
                panic!("[ble_task] error: {:?}", e);
            }
        }
    };

    let _ = join3(ble, indicator::run(&mut status_led, &pattern), async {
        let scan_config = ScanConfig::<'_> {
            active: true,
            phys: PhySet::M1,
            interval: Duration::from_millis(30),
            window: Duration::from_millis(30),
            ..Default::default()
        };
        let mut central = central;
        loop {
            pattern.signal(Pattern::SLOW);
            found.reset();
            let mut scanner = Scanner::new(central);
            let peer = match scanner.scan(&scan_config).await {
                Ok(_session) => {
                    info!("[central] scanning");
                    Some(found.wait().await)
                }
                Err(e) => {
                    #[cfg(feature = "defmt")]
                    let e = defmt::Debug2Format(&e);
                    error!("[central] scan error: {:?}", e);
                    None
                }
            };
            central = scanner.into_inner();
            let Some(peer) = peer else {
                Timer::after(COLOR_PERIOD).await;
                continue;
            };

            let kind = if peer.kind == 1 { AddrKind::RANDOM } else { AddrKind::PUBLIC };
            let target = BdAddr::new(peer.addr);
            let config = ConnectConfig {
                connect_params: Default::default(),
                scan_config: ScanConfig {
                    filter_accept_list: &[(kind, &target)],
                    ..Default::default()
                },
            };
            let conn = match central.connect(&config).await {
                Ok(conn) => conn,
                Err(e) => {
                    #[cfg(feature = "defmt")]
                    let e = defmt::Debug2Format(&e);
                    error!("[central] connect error: {:?}", e);
                    continue;
                }
            };
            let handle = conn_handle(&conn);
            if let Some(CentralEffect::Connected(handle)) =
                dispatch(&dispatcher, &BleEvent::PeripheralConnect { conn: handle, peer }).effect
            {
                info!("[central] connected: {:?}", handle);
                pattern.signal(Pattern::On);
            }

            match GattClient::<C, DefaultPacketPool, 10>::new(&stack, &conn).await {
                Ok(client) => {
                    select(client.task(), control(&client, handle, &dispatcher)).await;
                }
                Err(e) => {
                    #[cfg(feature = "defmt")]
                    let e = defmt::Debug2Format(&e);
                    error!("[central] gatt client error: {:?}", e);
                }
            }
            conn.disconnect();
            dispatch(&dispatcher, &BleEvent::PeripheralDisconnect { conn: handle, peer });
            info!("[central] disconnected, scanning again");
        }
    })
    .await;
}

/// Find the RGB characteristic and cycle colours until a write fails.
async fn control<C: Controller>(
    client: &GattClient<'_, C, DefaultPacketPool, 10>,
    conn: ConnHandle,
    dispatcher: &SharedDispatcher,
) {
    let characteristic = match discover(client).await {
        Ok(c) => c,
        Err(Error::NotFound) => {
            warn!("[central] peer has no LED service");
            return;
        }
        Err(e) => {
            error!("[central] discovery error: {:?}", e);
            return;
        }
    };
    let value = AttrHandle(characteristic.handle);
    dispatch(
        dispatcher,
        &BleEvent::GattcCharacteristicResult {
            conn,
            def: AttrHandle(characteristic.handle.saturating_sub(1)),
            value,
            properties: RGB_PROPERTIES,
            uuid: UuidRef::Short(RGB_CHARACTERISTIC),
        },
    );

    let mut ticker = Ticker::every(COLOR_PERIOD);
    loop {
        ticker.next().await;
        let Some(CentralEffect::Write { attr, color }) = dispatcher.lock(|d| d.borrow_mut().tick()) else {
            continue;
        };
        let result = client.write_characteristic(&characteristic, color.to_text().as_bytes()).await;
        let status = match &result {
            Ok(()) => {
                debug!("[central] sent {:?}", color);
                0
            }
            Err(_) => 1,
        };
        dispatch(dispatcher, &BleEvent::GattcWriteDone { conn, attr, status });
        if let Err(e) = result {
            #[cfg(feature = "defmt")]
            let e = defmt::Debug2Format(&e);
            warn!("[central] write error: {:?}", e);
            return;
        }
    }
}

async fn discover<C: Controller>(
    client: &GattClient<'_, C, DefaultPacketPool, 10>,
) -> Result<Characteristic<[u8; 3]>, Error> {
    let services = client.services_by_uuid(&Uuid::new_short(LED_SERVICE)).await?;
    let service = services.first().ok_or(Error::NotFound)?;
    info!("[central] found LED service");
    let characteristic = client
        .characteristic_by_uuid(service, &Uuid::new_short(RGB_CHARACTERISTIC))
        .await?;
    Ok(characteristic)
}
