//! Bluetooth speaker: PCM received over GATT writes or an L2CAP channel is buffered and
//! played through an [`AudioOutput`].
//!
//! The radio side and the playback task share only the jitter ring. Playback follows the
//! player's [`Gate`], published after every dispatched event.
//!
//! Services:
//! * Device Information (0x180A): manufacturer, model, software revision.
//! * Audio (0x1843): data (write without response), sequenced 16-bit stereo PCM.
//! * Audio Control (0x1844): control (write), status (read, notify), volume (read, write,
//!   notify).

use core::cell::RefCell;

use embassy_futures::join::join3;
use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use heapless::{String, Vec};
use trouble_host::prelude::*;

use crate::audio::{AudioOutput, AudioStatus, CommandError, Control, Gate, PacketError, Player, Playout};
use crate::common::{self, advertise, ble_task, conn_handle, handle, short_string, AdServices, Step};
use crate::config::{AdvertisingConfig, AudioConfig, DeviceInfo, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX, PSM_L2CAP_AUDIO};
use crate::dispatch::{Dispatcher, GattStatus, Outcome, Reply, Role};
use crate::event::{AttrHandle, BleEvent};
use crate::indicator::StatusLed;
use crate::link::LinkState;
use crate::ring::SharedRing;

pub const DEVICE_INFO_SERVICE: u16 = 0x180a;
pub const AUDIO_SERVICE: u16 = 0x1843;
pub const AUDIO_CONTROL_SERVICE: u16 = 0x1844;

/// Jitter buffer size.
pub const BUFFER_SIZE: usize = 8192;

/// Jitter buffer shared by the radio side and the playback task.
pub type Jitter = SharedRing<NoopRawMutex, BUFFER_SIZE>;

/// Largest packet accepted over L2CAP.
pub const L2CAP_MTU: usize = 512;

const FIRST_CID: u16 = 0x0040;
const STATS_EVERY: Duration = Duration::from_secs(5);

// GATT Server definition
#[gatt_server]
struct Server {
    device_info: DeviceInfoService,
    audio: AudioService,
    control: AudioControlService,
}

#[gatt_service(uuid = "180a")]
struct DeviceInfoService {
    #[characteristic(uuid = "2a29", read)]
    manufacturer: String<32>,
    #[characteristic(uuid = "2a24", read)]
    model: String<32>,
    #[characteristic(uuid = "2a28", read)]
    software: String<16>,
}

#[gatt_service(uuid = "1843")]
struct AudioService {
    /// Sequence number (u16 LE) followed by PCM.
    #[characteristic(uuid = "2a3d", write, write_without_response)]
    data: Vec<u8, 244>,
}

#[gatt_service(uuid = "1844")]
struct AudioControlService {
    #[characteristic(uuid = "2a3c", write)]
    control: Vec<u8, 4>,
    #[characteristic(uuid = "2a3e", read, notify, value = 0)]
    status: u8,
    /// Volume in percent.
    #[characteristic(uuid = "2b7d", read, write, notify, value = 80)]
    volume: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkHandles {
    pub data: AttrHandle,
    pub control: AttrHandle,
    pub status: AttrHandle,
    pub volume: AttrHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SinkEffect {
    Connected,
    Disconnected,
    Status(AudioStatus),
    Volume { level: u8, muted: bool },
}

pub struct SinkRole<'a> {
    handles: SinkHandles,
    player: Player<&'a Jitter>,
    reported: AudioStatus,
    psm: [u16; 1],
}

impl<'a> SinkRole<'a> {
    pub fn new(handles: SinkHandles, jitter: &'a Jitter, config: &AudioConfig) -> Self {
        let player = Player::new(jitter, config);
        Self {
            handles,
            reported: player.status(),
            player,
            psm: [PSM_L2CAP_AUDIO],
        }
    }

    pub fn player(&self) -> &Player<&'a Jitter> {
        &self.player
    }

    /// The status, if it changed since it was last reported.
    fn status_change(&mut self) -> Option<SinkEffect> {
        let status = self.player.status();
        if status == self.reported {
            return None;
        }
        self.reported = status;
        Some(SinkEffect::Status(status))
    }

    fn volume(&self) -> SinkEffect {
        SinkEffect::Volume {
            level: self.player.volume(),
            muted: self.player.is_muted(),
        }
    }

    fn audio(&mut self, data: &[u8]) -> Outcome<SinkEffect> {
        match self.player.receive(data) {
            Ok(_) => {
                let mut outcome = Outcome::accept();
                outcome.effect = self.status_change();
                outcome
            }
            Err(PacketError::TooShort) | Err(PacketError::BufferTooSmall) => {
                Outcome::reject(GattStatus::InvalidAttributeValueLength)
            }
        }
    }

    fn control(&mut self, data: &[u8]) -> Outcome<SinkEffect> {
        let control = match Control::parse(data) {
            Ok(control) => control,
            Err(e) => {
                warn!("[sink] bad control write: {:?}", e);
                self.reported = AudioStatus::Error;
                let status = match e {
                    CommandError::Empty | CommandError::Malformed => GattStatus::InvalidAttributeValueLength,
                    CommandError::Unknown(_) => GattStatus::ValueNotAllowed,
                };
                return Outcome::reject(status).with(SinkEffect::Status(AudioStatus::Error));
            }
        };
        info!("[sink] control: {:?}", control);
        let before = (self.player.volume(), self.player.is_muted());
        self.player.apply(control);
        let outcome = Outcome::accept();
        match self.status_change() {
            Some(effect) => outcome.with(effect),
            None if before != (self.player.volume(), self.player.is_muted()) => outcome.with(self.volume()),
            None => outcome,
        }
    }
}

impl Role for SinkRole<'_> {
    type Effect = SinkEffect;

    fn psms(&self) -> &[u16] {
        &self.psm
    }

    fn on_event<const N: usize>(&mut self, _link: &LinkState<N>, event: &BleEvent<'_>) -> Outcome<SinkEffect> {
        match *event {
            BleEvent::CentralConnect { conn, .. } => {
                info!("[sink] connected: {:?}", conn);
                self.reported = AudioStatus::Ready;
                Outcome::silent().with(SinkEffect::Connected)
            }
            BleEvent::CentralDisconnect { .. } => {
                let stats = self.player.stats();
                info!(
                    "[sink] session done: rx {} lost {} overrun {}",
                    stats.packets_received, stats.lost_packets, stats.overrun_bytes
                );
                self.player.reset();
                self.reported = self.player.status();
                Outcome::silent().with(SinkEffect::Disconnected)
            }
            BleEvent::GattsWrite { attr, data, .. } if attr == self.handles.data => self.audio(data),
            BleEvent::GattsWrite { attr, data, .. } if attr == self.handles.control => self.control(data),
            BleEvent::GattsWrite { attr, data, .. } if attr == self.handles.volume => match data {
                [level] => {
                    self.player.set_volume(*level);
                    Outcome::accept().with(self.volume())
                }
                _ => Outcome::reject(GattStatus::InvalidAttributeValueLength),
            },
            BleEvent::L2capAccept { psm, .. } => {
                info!("[sink] audio channel on psm {:#x}", psm);
                Outcome::accept()
            }
            BleEvent::L2capRecv { data, .. } => {
                let mut outcome = self.audio(data);
                outcome.reply = Reply::Silent;
                outcome
            }
            _ => Outcome::ack(event),
        }
    }
}

type SharedDispatcher<'a> = Mutex<NoopRawMutex, RefCell<Dispatcher<SinkRole<'a>, CONNECTIONS_MAX>>>;

pub async fn run<C, O, S>(controller: C, mut output: O, mut status_led: S)
where
    C: Controller,
    O: AudioOutput,
    S: StatusLed,
{
    let config = AdvertisingConfig::named("Pico-W-Audio", [0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xfc]);
    let audio = AudioConfig::playback();
    let info = DeviceInfo::default();
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
    for (c, value) in [
        (&server.device_info.manufacturer, short_string(info.manufacturer)),
        (&server.device_info.model, short_string(info.model)),
    ] {
        if let Err(e) = server.set(c, &value) {
            warn!("[sink] error setting device info: {:?}", e);
        }
    }
    if let Err(e) = server.set(&server.device_info.software, &short_string(info.software)) {
        warn!("[sink] error setting device info: {:?}", e);
    }

    let handles = SinkHandles {
        data: AttrHandle(server.audio.data.handle),
        control: AttrHandle(server.control.control.handle),
        status: AttrHandle(server.control.status.handle),
        volume: AttrHandle(server.control.volume.handle),
    };
    let jitter: Jitter = SharedRing::new();
    let gate: Signal<NoopRawMutex, Gate> = Signal::new();
    let dispatcher: SharedDispatcher = Mutex::new(RefCell::new(Dispatcher::new(SinkRole::new(handles, &jitter, &audio))));
    let radio = Radio {
        dispatcher: &dispatcher,
        gate: &gate,
    };

    info!(
        "[sink] {} Hz, {} bit, {} channels",
        audio.sample_rate, audio.bits_per_sample, audio.channels
    );
    let services = [
        DEVICE_INFO_SERVICE.to_le_bytes(),
        AUDIO_SERVICE.to_le_bytes(),
        AUDIO_CONTROL_SERVICE.to_le_bytes(),
    ];
    let _ = join3(ble_task(runner), playback(&jitter, &gate, &mut output, &audio), async {
        loop {
            match advertise(config.name, AdServices::Short(&services), &mut peripheral).await {
                Ok(conn) => match conn.with_attribute_server(&server) {
                    Ok(conn) => {
                        let gatt = serve(&server, &conn, radio, &mut status_led);
                        let l2cap = stream(&stack, &server, &conn, radio);
                        select(gatt, l2cap).await;
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

/// What the GATT and L2CAP futures of one connection share.
#[derive(Clone, Copy)]
struct Radio<'d, 'a> {
    dispatcher: &'d SharedDispatcher<'a>,
    gate: &'d Signal<NoopRawMutex, Gate>,
}

impl Radio<'_, '_> {
    fn dispatch(&self, event: &BleEvent<'_>) -> Outcome<SinkEffect> {
        let (outcome, gate) = self.dispatcher.lock(|d| {
            let mut d = d.borrow_mut();
            let outcome = d.dispatch(event);
            (outcome, d.role().player().gate())
        });
        self.gate.signal(gate);
        outcome
    }
}

/// Stream GATT events until the connection closes.
async fn serve<S: StatusLed>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    radio: Radio<'_, '_>,
    status_led: &mut S,
) {
    let open = radio.dispatcher.lock(|d| common::open(conn.raw(), &mut d.borrow_mut()));
    if let Some(effect) = open {
        apply(server, conn, status_led, effect).await;
    }
    loop {
        let event = conn.next().await;
        match handle(conn, event, |e| radio.dispatch(e)).await {
            Step::Continue(effects) => {
                for effect in effects {
                    apply(server, conn, status_led, effect).await;
                }
            }
            Step::Closed(effect) => {
                if let Some(effect) = effect {
                    apply(server, conn, status_led, effect).await;
                }
                break;
            }
        }
    }
}

async fn apply<S: StatusLed>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    status_led: &mut S,
    effect: SinkEffect,
) {
    match effect {
        SinkEffect::Connected => status_led.set(true).await,
        SinkEffect::Disconnected => {
            status_led.set(false).await;
            if let Err(e) = server.set(&server.control.status, &(AudioStatus::Ready as u8)) {
                warn!("[sink] error resetting status: {:?}", e);
            }
            return;
        }
        _ => {}
    }
    notify(server, conn, effect).await;
}

async fn notify(server: &Server<'_>, conn: &GattConnection<'_, '_, DefaultPacketPool>, effect: SinkEffect) {
    let result = match effect {
        SinkEffect::Connected => server.control.status.notify(conn, &(AudioStatus::Ready as u8)).await,
        SinkEffect::Status(status) => {
            info!("[sink] status {:?}", status);
            server.control.status.notify(conn, &(status as u8)).await
        }
        SinkEffect::Volume { level, muted } => {
            info!("[sink] volume {}{}", level, if muted { " (muted)" } else { "" });
            server.control.volume.notify(conn, &level).await
        }
        SinkEffect::Disconnected => return,
    };
    if let Err(e) = result {
        debug!("[sink] characteristic not updated: {:?}", e);
    }
}

/// Accept the audio channel and feed its packets to the player. Pends once the channel is
/// gone so GATT keeps being served.
async fn stream<'a, C: Controller>(
    stack: &'a Stack<'a, C, DefaultPacketPool>,
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    radio: Radio<'_, '_>,
) {
    let handle = conn_handle(conn.raw());
    let channel_config = L2capChannelConfig {
        mtu: Some(L2CAP_MTU as u16),
        ..Default::default()
    };
    let mut channel = match L2capChannel::accept(stack, conn.raw(), &[PSM_L2CAP_AUDIO], &channel_config).await {
        Ok(channel) => channel,
        Err(e) => {
            #[cfg(feature = "defmt")]
            let e = defmt::Debug2Format(&e);
            warn!("[l2cap] accept failed: {:?}", e);
            return core::future::pending().await;
        }
    };
    let (cid, psm, mtu) = (FIRST_CID, PSM_L2CAP_AUDIO, L2CAP_MTU as u16);
    let accept = BleEvent::L2capAccept {
        conn: handle,
        cid,
        psm,
        our_mtu: mtu,
        peer_mtu: mtu,
    };
    if radio.dispatch(&accept).reply != Reply::Accept {
        warn!("[l2cap] channel refused");
        return core::future::pending().await;
    }
    radio.dispatch(&BleEvent::L2capConnect {
        conn: handle,
        cid,
        psm,
        our_mtu: mtu,
        peer_mtu: mtu,
    });
    let mut rx = [0; L2CAP_MTU];
    loop {
        match channel.receive(stack, &mut rx).await {
            Ok(len) => {
                let received = BleEvent::L2capRecv {
                    conn: handle,
                    cid,
                    data: &rx[..len],
                };
                if let Some(effect) = radio.dispatch(&received).effect {
                    notify(server, conn, effect).await;
                }
            }
            Err(e) => {
                #[cfg(feature = "defmt")]
                let e = defmt::Debug2Format(&e);
                info!("[l2cap] audio channel closed: {:?}", e);
                radio.dispatch(&BleEvent::L2capDisconnect {
                    conn: handle,
                    cid,
                    psm,
                    status: 0,
                });
                return core::future::pending().await;
            }
        }
    }
}

/// Drain the jitter ring into the output while the gate is open. Never returns.
async fn playback<O: AudioOutput>(jitter: &Jitter, gate: &Signal<NoopRawMutex, Gate>, output: &mut O, audio: &AudioConfig) {
    let mut playout = Playout::new(audio);
    let mut reader = jitter;
    let mut buf = [0u8; 512];
    let chunk = audio.chunk_size.min(buf.len());
    let idle = audio.chunk_period();
    let mut muted = false;
    let mut last_stats = Instant::now();
    loop {
        if let Some(next) = gate.try_take() {
            playout.set_gate(next);
        }
        let now_muted = playout.gate().volume == 0;
        if now_muted != muted {
            muted = now_muted;
            output.set_muted(muted);
        }
        match playout.next_chunk(&mut reader, &mut buf[..chunk]) {
            Some(samples) => {
                if let Err(e) = output.write(samples).await {
                    #[cfg(feature = "defmt")]
                    let e = defmt::Debug2Format(&e);
                    warn!("[sink] output error: {:?}", e);
                    Timer::after(idle).await;
                }
            }
            None => Timer::after(idle).await,
        }
        if last_stats.elapsed() >= STATS_EVERY {
            last_stats = Instant::now();
            debug!(
                "[sink] played {} underruns {} overrun {} level {}%",
                playout.chunks_played(),
                playout.underruns(),
                jitter.dropped(),
                jitter.level()
            );
        }
    }
}
