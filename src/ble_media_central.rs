//! Central for up to [`DEVICES_MAX`] media players.
//!
//! Scans for advertisers of the media service, connects to each one it finds and discovers the
//! playback, track info, volume, status, metadata, position and duration characteristics. Values
//! arrive as notifications where the client could subscribe and are read every
//! [`QUERY_PERIOD`] otherwise. The current track of every player is logged on each query. The
//! onboard LED blinks while any player is connected.
//!
//! Every device has its own slot future with its own `Central`, so one slow player never holds up
//! the others. A single scanner hands new players to idle slots.

use core::cell::RefCell;

use bt_hci::cmd::le::LeSetScanParams;
use bt_hci::controller::ControllerCmdSync;
use embassy_futures::join::{join3, join_array};
use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker, Timer};
use heapless::{String, Vec};
use trouble_host::gatt::NotificationListener;
use trouble_host::prelude::*;

use crate::adv;
use crate::common::{conn_handle, short_string};
use crate::dispatch::{Dispatcher, Outcome, Role};
use crate::error::Error;
use crate::event::{AttrHandle, BleEvent, ConnHandle, PeerAddr, UuidRef};
use crate::indicator::{self, Pattern, StatusLed};
use crate::link::LinkState;
use crate::media::{MediaCharacteristic, MediaState, TrackInfo, MEDIA_SERVICE};

/// Players connected at once.
pub const DEVICES_MAX: usize = 3;

/// Max number of L2CAP channels.
const L2CAP_CHANNELS_MAX: usize = 2 * DEVICES_MAX; // Signal + att per device

/// How often players are queried and their track logged.
pub const QUERY_PERIOD: Duration = Duration::from_secs(2);

pub const NAME_MAX: usize = 24;

/// Longest playback command written in one go.
pub const COMMAND_MAX: usize = 20;

/// Largest value read from a player.
const VALUE_MAX: usize = 128;

/// Subscribed to in this order until the client runs out of listeners.
const NOTIFYING: [MediaCharacteristic; 5] = [
    MediaCharacteristic::Status,
    MediaCharacteristic::TrackInfo,
    MediaCharacteristic::Metadata,
    MediaCharacteristic::Position,
    MediaCharacteristic::Volume,
];

/// Read on every query unless they notify.
const POLLED: [MediaCharacteristic; 3] = [
    MediaCharacteristic::Metadata,
    MediaCharacteristic::Volume,
    MediaCharacteristic::Position,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MediaEffect {
    /// A player not yet connected showed up in the scan.
    Found(PeerAddr),
    Connected { conn: ConnHandle, devices: usize },
    Discovered {
        conn: ConnHandle,
        characteristic: MediaCharacteristic,
    },
    Updated {
        conn: ConnHandle,
        characteristic: MediaCharacteristic,
    },
    Disconnected { conn: ConnHandle, devices: usize },
}

impl MediaEffect {
    pub fn pattern(&self) -> Option<Pattern> {
        match *self {
            MediaEffect::Connected { .. } => Some(Pattern::Blink(QUERY_PERIOD)),
            MediaEffect::Disconnected { devices: 0, .. } => Some(Pattern::Off),
            _ => None,
        }
    }
}

/// A characteristic write for the driver to send.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MediaWrite {
    pub conn: ConnHandle,
    pub attr: AttrHandle,
    pub data: Vec<u8, COMMAND_MAX>,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub conn: ConnHandle,
    pub peer: PeerAddr,
    pub name: String<NAME_MAX>,
    pub state: MediaState,
    handles: [Option<AttrHandle>; 7],
}

impl Device {
    pub fn handle(&self, characteristic: MediaCharacteristic) -> Option<AttrHandle> {
        self.handles[characteristic.index()]
    }

    fn characteristic(&self, attr: AttrHandle) -> Option<MediaCharacteristic> {
        MediaCharacteristic::ALL
            .into_iter()
            .find(|c| self.handles[c.index()] == Some(attr))
    }
}

pub struct MediaRole<const N: usize> {
    devices: Vec<Device, N>,
    /// Names from the scan, oldest first.
    seen: Vec<(PeerAddr, String<NAME_MAX>), N>,
}

impl<const N: usize> MediaRole<N> {
    pub const fn new() -> Self {
        Self {
            devices: Vec::new(),
            seen: Vec::new(),
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, conn: ConnHandle) -> Option<&Device> {
        self.devices.iter().find(|d| d.conn == conn)
    }

    fn device_mut(&mut self, conn: ConnHandle) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.conn == conn)
    }

    /// Write `command` to the player's playback characteristic.
    pub fn command(&self, conn: ConnHandle, command: &[u8]) -> Option<MediaWrite> {
        let attr = self.device(conn)?.handle(MediaCharacteristic::Playback)?;
        let data = Vec::from_slice(command).ok()?;
        Some(MediaWrite { conn, attr, data })
    }

    /// Set the player's volume in percent; larger values are capped at 100.
    pub fn set_volume(&self, conn: ConnHandle, volume: u8) -> Option<MediaWrite> {
        let attr = self.device(conn)?.handle(MediaCharacteristic::Volume)?;
        let mut data = Vec::new();
        data.push(volume.min(100)).ok()?;
        Some(MediaWrite { conn, attr, data })
    }

    pub fn position(&self, conn: ConnHandle) -> Option<u32> {
        self.device(conn)?.state.position_ms
    }

    pub fn volume(&self, conn: ConnHandle) -> Option<u8> {
        self.device(conn)?.state.volume
    }

    pub fn track_info(&self, conn: ConnHandle) -> Option<TrackInfo> {
        self.device(conn)?.state.track_info()
    }

    fn remember(&mut self, peer: PeerAddr, name: &str) {
        if let Some(i) = self.seen.iter().position(|(p, _)| *p == peer) {
            self.seen.remove(i);
        } else if self.seen.is_full() && !self.seen.is_empty() {
            self.seen.remove(0);
        }
        let _ = self.seen.push((peer, short_string(name)));
    }
}

impl<const N: usize> Default for MediaRole<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Role for MediaRole<N> {
    type Effect = MediaEffect;

    fn on_event<const M: usize>(&mut self, link: &LinkState<M>, event: &BleEvent<'_>) -> Outcome<MediaEffect> {
        match *event {
            BleEvent::ScanResult { peer, rssi, data, .. } => {
                if !adv::advertises_service128(data, &MEDIA_SERVICE)
                    || link.connections().len() >= N.min(M)
                    || link.connections().iter().any(|c| c.peer == peer)
                {
                    return Outcome::silent();
                }
                let name = adv::local_name(data).unwrap_or("Unknown");
                info!("[media] found {:?} ({} dBm): {:?}", peer.addr, rssi, name);
                self.remember(peer, name);
                Outcome::silent().with(MediaEffect::Found(peer))
            }
            BleEvent::PeripheralConnect { conn, peer } => {
                let name = self
                    .seen
                    .iter()
                    .find(|(p, _)| *p == peer)
                    .map(|(_, n)| n.clone())
                    .unwrap_or_else(|| short_string("Unknown"));
                info!("[media] connected: {:?}", name.as_str());
                let device = Device {
                    conn,
                    peer,
                    name,
                    state: MediaState::default(),
                    handles: [None; 7],
                };
                if self.devices.push(device).is_err() {
                    warn!("[media] no room for {:?}", conn);
                    return Outcome::silent();
                }
                Outcome::silent().with(MediaEffect::Connected {
                    conn,
                    devices: self.devices.len(),
                })
            }
            BleEvent::GattcCharacteristicResult {
                conn,
                value,
                uuid: UuidRef::Long(uuid),
                ..
            } => {
                let (Some(device), Some(characteristic)) = (self.device_mut(conn), MediaCharacteristic::from_uuid(uuid))
                else {
                    return Outcome::silent();
                };
                debug!("[media] {:?} has {:?} at {:?}", device.name.as_str(), characteristic, value);
                device.handles[characteristic.index()] = Some(value);
                Outcome::silent().with(MediaEffect::Discovered { conn, characteristic })
            }
            BleEvent::GattcCharacteristicDone { conn, .. } => {
                if let Some(device) = self.device(conn) {
                    let found = device.handles.iter().filter(|h| h.is_some()).count();
                    info!("[media] {:?}: {} characteristics", device.name.as_str(), found);
                }
                Outcome::silent()
            }
            BleEvent::GattcNotify { conn, attr, data } | BleEvent::GattcReadResult { conn, attr, data } => {
                let Some(device) = self.device_mut(conn) else {
                    return Outcome::silent();
                };
                let Some(characteristic) = device.characteristic(attr) else {
                    debug!("[media] value for unknown {:?}", attr);
                    return Outcome::silent();
                };
                match device.state.update(characteristic, data) {
                    Ok(()) => {
                        debug!("[media] {:?} update from {:?}", characteristic, device.name.as_str());
                        Outcome::silent().with(MediaEffect::Updated { conn, characteristic })
                    }
                    Err(e) => {
                        warn!("[media] bad {:?} from {:?}: {:?}", characteristic, device.name.as_str(), e);
                        Outcome::silent()
                    }
                }
            }
            BleEvent::GattcWriteDone { attr, status, .. } => {
                if status != 0 {
                    warn!("[media] write to {:?} failed: {}", attr, status);
                }
                Outcome::silent()
            }
            BleEvent::PeripheralDisconnect { conn, .. } => {
                let Some(i) = self.devices.iter().position(|d| d.conn == conn) else {
                    return Outcome::silent();
                };
                let device = self.devices.remove(i);
                info!("[media] disconnected: {:?}", device.name.as_str());
                Outcome::silent().with(MediaEffect::Disconnected {
                    conn,
                    devices: self.devices.len(),
                })
            }
            _ => Outcome::ack(event),
        }
    }
}

type SharedDispatcher = Mutex<NoopRawMutex, RefCell<Dispatcher<MediaRole<DEVICES_MAX>, DEVICES_MAX>>>;

fn dispatch(dispatcher: &SharedDispatcher, event: &BleEvent<'_>) -> Outcome<MediaEffect> {
    dispatcher.lock(|d| d.borrow_mut().dispatch(event))
}

/// State the scanner and the device slots share.
struct Shared<'a> {
    dispatcher: &'a SharedDispatcher,
    pattern: &'a Signal<NoopRawMutex, Pattern>,
    /// Players for idle slots to connect to.
    peers: Channel<NoopRawMutex, PeerAddr, 1>,
    /// A slot finished a connection attempt.
    settled: Signal<NoopRawMutex, ()>,
    /// A slot lost its player.
    freed: Signal<NoopRawMutex, ()>,
}

impl Shared<'_> {
    fn dispatch(&self, event: &BleEvent<'_>) -> Option<MediaEffect> {
        let effect = dispatch(self.dispatcher, event).effect;
        if let Some(p) = effect.as_ref().and_then(MediaEffect::pattern) {
            self.pattern.signal(p);
        }
        effect
    }

    fn is_full(&self) -> bool {
        self.dispatcher.lock(|d| d.borrow().link().connections().len() >= DEVICES_MAX)
    }
}

/// Feeds advertising reports to the dispatcher and publishes the first new player seen.
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
            if let Some(MediaEffect::Found(peer)) = dispatch(self.dispatcher, &event).effect {
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
    let address: Address = Address::random([0xff, 0x8f, 0x1c, 0x05, 0xe4, 0xff]);
    info!("Our address = {:?}", address);

    let mut resources: HostResources<DefaultPacketPool, DEVICES_MAX, L2CAP_CHANNELS_MAX> = HostResources::new();
    let stack = trouble_host::new(controller, &mut resources).set_random_address(address);
    let Host {
        central, mut runner, ..
    } = stack.build();

    let dispatcher: SharedDispatcher = Mutex::new(RefCell::new(Dispatcher::new(MediaRole::new())));
    let found: Signal<NoopRawMutex, PeerAddr> = Signal::new();
    let pattern: Signal<NoopRawMutex, Pattern> = Signal::new();
    let shared = Shared {
        dispatcher: &dispatcher,
        pattern: &pattern,
        peers: Channel::new(),
        settled: Signal::new(),
        freed: Signal::new(),
    };
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
    let slots: [_; DEVICES_MAX] = core::array::from_fn(|_| device_slot(&stack, &shared));

    info!("[media] starting media central");
    let _ = join3(ble, indicator::run(&mut status_led, &pattern), async {
        select(scan(central, &shared, &found), join_array(slots)).await;
    })
    .await;
}

/// Scan while a slot is free and hand every new player to a slot, one at a time.
async fn scan<C: Controller + ControllerCmdSync<LeSetScanParams>>(
    mut central: Central<'_, C, DefaultPacketPool>,
    shared: &Shared<'_>,
    found: &Signal<NoopRawMutex, PeerAddr>,
) {
    let scan_config = ScanConfig::<'_> {
        active: true,
        phys: PhySet::M1,
        interval: Duration::from_millis(30),
        window: Duration::from_millis(30),
        ..Default::default()
    };
    loop {
        if shared.is_full() {
            shared.freed.wait().await;
            continue;
        }
        found.reset();
        let mut scanner = Scanner::new(central);
        let peer = match scanner.scan(&scan_config).await {
            Ok(_session) => {
                info!("[media] scanning");
                Some(found.wait().await)
            }
            Err(e) => {
                #[cfg(feature = "defmt")]
                let e = defmt::Debug2Format(&e);
                error!("[media] scan error: {:?}", e);
                None
            }
        };
        central = scanner.into_inner();
        let Some(peer) = peer else {
            Timer::after(QUERY_PERIOD).await;
            continue;
        };
        shared.settled.reset();
        shared.peers.send(peer).await;
        shared.settled.wait().await;
    }
}

/// Serve one player at a time, forever.
async fn device_slot<'s, C: Controller>(stack: &'s Stack<'s, C, DefaultPacketPool>, shared: &Shared<'_>) {
    let Host { mut central, .. } = stack.build();
    loop {
        let peer = shared.peers.receive().await;
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
                error!("[media] connect error: {:?}", e);
                shared.settled.signal(());
                continue;
            }
        };
        let handle = conn_handle(&conn);
        shared.dispatch(&BleEvent::PeripheralConnect { conn: handle, peer });
        shared.settled.signal(());

        match GattClient::<C, DefaultPacketPool, 10>::new(stack, &conn).await {
            Ok(client) => {
                select(client.task(), serve(&client, &conn, shared)).await;
            }
            Err(e) => {
                #[cfg(feature = "defmt")]
                let e = defmt::Debug2Format(&e);
                error!("[media] gatt client error: {:?}", e);
            }
        }
        conn.disconnect();
        shared.dispatch(&BleEvent::PeripheralDisconnect { conn: handle, peer });
        shared.freed.signal(());
    }
}

type MediaValue = Vec<u8, VALUE_MAX>;
type Characteristics = [Option<Characteristic<MediaValue>>; 7];

/// Discover the player's characteristics, subscribe where possible and query until the link
/// drops.
async fn serve<C: Controller>(
    client: &GattClient<'_, C, DefaultPacketPool, 10>,
    link: &Connection<'_, DefaultPacketPool>,
    shared: &Shared<'_>,
) {
    let conn = conn_handle(link);
    let characteristics = match discover(client, conn, shared).await {
        Ok(c) => c,
        Err(Error::NotFound) => {
            warn!("[media] peer has no media service");
            return;
        }
        Err(e) => {
            error!("[media] discovery error: {:?}", e);
            return;
        }
    };

    let mut listeners: [Option<(AttrHandle, NotificationListener<'_, 512>)>; NOTIFYING.len()] = Default::default();
    let mut subscribed = [false; 7];
    for (listener, characteristic) in listeners.iter_mut().zip(NOTIFYING) {
        let Some(c) = &characteristics[characteristic.index()] else {
            continue;
        };
        match client.subscribe(c, false).await {
            Ok(l) => {
                *listener = Some((AttrHandle(c.handle), l));
                subscribed[characteristic.index()] = true;
            }
            Err(e) => {
                #[cfg(feature = "defmt")]
                let e = defmt::Debug2Format(&e);
                info!("[media] polling {:?}: {:?}", characteristic, e);
            }
        }
    }

    let forwarders = listeners.map(|l| forward(l, conn, shared));
    select(query(client, link, &characteristics, &subscribed, shared), join_array(forwarders)).await;
}

async fn discover<C: Controller>(
    client: &GattClient<'_, C, DefaultPacketPool, 10>,
    conn: ConnHandle,
    shared: &Shared<'_>,
) -> Result<Characteristics, Error> {
    let services = client.services_by_uuid(&Uuid::new_long(MEDIA_SERVICE)).await?;
    let service = services.first().ok_or(Error::NotFound)?;
    let mut characteristics: Characteristics = Default::default();
    for characteristic in MediaCharacteristic::ALL {
        let uuid = characteristic.uuid();
        match client.characteristic_by_uuid::<MediaValue>(service, &Uuid::new_long(uuid)).await {
            Ok(c) => {
                shared.dispatch(&BleEvent::GattcCharacteristicResult {
                    conn,
                    def: AttrHandle(c.handle.saturating_sub(1)),
                    value: AttrHandle(c.handle),
                    properties: 0,
                    uuid: UuidRef::Long(&uuid),
                });
                characteristics[characteristic.index()] = Some(c);
            }
            Err(_) => debug!("[media] no {:?}", characteristic),
        }
    }
    shared.dispatch(&BleEvent::GattcCharacteristicDone { conn, status: 0 });
    Ok(characteristics)
}

/// Pass every notification of one characteristic to the dispatcher. Without a listener this
/// never completes.
async fn forward(listener: Option<(AttrHandle, NotificationListener<'_, 512>)>, conn: ConnHandle, shared: &Shared<'_>) {
    let Some((attr, mut listener)) = listener else {
        return core::future::pending().await;
    };
    loop {
        let notification = listener.next().await;
        shared.dispatch(&BleEvent::GattcNotify {
            conn,
            attr,
            data: notification.as_ref(),
        });
    }
}

/// Read what does not notify and log the track, every [`QUERY_PERIOD`].
async fn query<C: Controller>(
    client: &GattClient<'_, C, DefaultPacketPool, 10>,
    link: &Connection<'_, DefaultPacketPool>,
    characteristics: &Characteristics,
    subscribed: &[bool; 7],
    shared: &Shared<'_>,
) {
    let conn = conn_handle(link);
    let mut ticker = Ticker::every(QUERY_PERIOD);
    let mut value = [0; VALUE_MAX];
    loop {
        ticker.next().await;
        if !link.is_connected() {
            return;
        }
        for characteristic in POLLED {
            if subscribed[characteristic.index()] {
                continue;
            }
            let Some(c) = &characteristics[characteristic.index()] else {
                continue;
            };
            match client.read_characteristic(c, &mut value).await {
                Ok(len) => {
                    shared.dispatch(&BleEvent::GattcReadResult {
                        conn,
                        attr: AttrHandle(c.handle),
                        data: &value[..len],
                    });
                }
                Err(e) => {
                    #[cfg(feature = "defmt")]
                    let e = defmt::Debug2Format(&e);
                    warn!("[media] read error: {:?}", e);
                    return;
                }
            }
        }
        let now_playing = shared.dispatcher.lock(|d| {
            let d = d.borrow();
            let device = d.role().device(conn)?;
            Some((device.name.clone(), device.state.track_info()?))
        });
        if let Some((name, track)) = now_playing {
            log_track(&name, &track);
        }
    }
}

fn log_track(name: &str, track: &TrackInfo) {
    info!(
        "[media] now playing on {:?}: {:?} by {:?} from {:?} ({:?})",
        name,
        track.title.as_str(),
        track.artist.as_str(),
        track.album.as_str(),
        track.genre.as_str()
    );
    info!(
        "[media] position {}/{} ms, volume {}%",
        track.position_ms, track.duration_ms, track.volume
    );
}
