//! L2CAP connection-oriented channel echo server.
//!
//! Every SDU received on the channel is sent back prefixed with `Echo: `. While the channel
//! is open and not stalled, a `Test message N` goes out every tenth tick.

use core::fmt::Write as _;

use embassy_futures::join::join3;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker};
use heapless::{String, Vec};
use trouble_host::prelude::*;

use crate::common::{self, advertise, ble_task, conn_handle, AdServices};
use crate::config::{AdvertisingConfig, L2capConfig, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX};
use crate::dispatch::{Dispatcher, Outcome, Reply, Role};
use crate::event::{BleEvent, ConnHandle};
use crate::indicator::{self, Pattern, StatusLed};
use crate::link::LinkState;

/// Size of the SDU buffers.
pub const MTU: usize = 512;

const ECHO_PREFIX: &[u8] = b"Echo: ";
const TICK: Duration = Duration::from_millis(100);
const TEST_EVERY: u32 = 10;

/// The host does not expose channel identifiers; accepted channels are numbered from the
/// start of the LE dynamic CID range.
const FIRST_CID: u16 = 0x0040;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoEffect {
    Opened,
    Closed,
    Send(Vec<u8, MTU>),
}

pub struct EchoRole {
    psm: [u16; 1],
    ticks: u32,
}

impl EchoRole {
    pub fn new(psm: u16) -> Self {
        Self { psm: [psm], ticks: 0 }
    }
}

impl Role for EchoRole {
    type Effect = EchoEffect;

    fn psms(&self) -> &[u16] {
        &self.psm
    }

    fn on_event<const N: usize>(&mut self, _link: &LinkState<N>, event: &BleEvent<'_>) -> Outcome<EchoEffect> {
        match *event {
            BleEvent::L2capAccept { conn, psm, .. } => {
                info!("[l2cap] accepting {:?} on psm {:#x}", conn, psm);
                Outcome::accept()
            }
            BleEvent::L2capConnect { cid, peer_mtu, .. } => {
                info!("[l2cap] connected: cid {:#x}, mtu {}", cid, peer_mtu);
                Outcome::silent().with(EchoEffect::Opened)
            }
            BleEvent::L2capDisconnect { cid, status, .. } => {
                info!("[l2cap] disconnected: cid {:#x}, status {}", cid, status);
                Outcome::silent().with(EchoEffect::Closed)
            }
            BleEvent::CentralDisconnect { .. } => Outcome::silent().with(EchoEffect::Closed),
            BleEvent::L2capRecv { data, .. } => {
                debug!("[l2cap] received {} bytes", data.len());
                let mut reply = Vec::new();
                let _ = reply.extend_from_slice(ECHO_PREFIX);
                let room = MTU - reply.len();
                let _ = reply.extend_from_slice(&data[..data.len().min(room)]);
                Outcome::silent().with(EchoEffect::Send(reply))
            }
            _ => Outcome::ack(event),
        }
    }

    fn on_tick<const N: usize>(&mut self, link: &LinkState<N>) -> Option<EchoEffect> {
        let n = self.ticks;
        self.ticks = self.ticks.wrapping_add(1);
        if link.l2cap().is_none() || !link.can_send() || n % TEST_EVERY != 0 {
            return None;
        }
        let mut text: String<32> = String::new();
        let _ = write!(text, "Test message {}", n);
        debug!("[l2cap] sending: {}", text.as_str());
        Vec::from_slice(text.as_bytes()).ok().map(EchoEffect::Send)
    }
}

pub async fn run<C, S>(controller: C, mut status_led: S)
where
    C: Controller,
    S: StatusLed,
{
    let config = AdvertisingConfig::named("l2cap-demo", [0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xfe]);
    let l2cap = L2capConfig::default();
    let address: Address = Address::random(config.address);
    info!("Our address = {:?}", address);

    let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> = HostResources::new();
    let stack = trouble_host::new(controller, &mut resources).set_random_address(address);
    let Host {
        mut peripheral, runner, ..
    } = stack.build();

    let mut dispatcher: Dispatcher<EchoRole, CONNECTIONS_MAX> = Dispatcher::new(EchoRole::new(l2cap.psm));
    let pattern: Signal<NoopRawMutex, Pattern> = Signal::new();
    let mut next_cid = FIRST_CID;

    info!("[l2cap] listening on psm {:#x}, mtu {}", l2cap.psm, l2cap.mtu);
    let _ = join3(ble_task(runner), indicator::run(&mut status_led, &pattern), async {
        loop {
            let conn = match advertise(config.name, AdServices::None, &mut peripheral).await {
                Ok(conn) => conn,
                Err(e) => {
                    #[cfg(feature = "defmt")]
                    let e = defmt::Debug2Format(&e);
                    error!("[adv] error: {:?}", e);
                    continue;
                }
            };
            common::open(&conn, &mut dispatcher);
            let channel_config = L2capChannelConfig {
                mtu: Some(l2cap.mtu),
                ..Default::default()
            };
            match L2capChannel::accept(&stack, &conn, &[l2cap.psm], &channel_config).await {
                Ok(mut channel) => {
                    let cid = next_cid;
                    next_cid = next_cid.wrapping_add(1).max(FIRST_CID);
                    echo(&stack, &conn, &mut channel, cid, l2cap, &mut dispatcher, &pattern).await;
                }
                Err(e) => {
                    #[cfg(feature = "defmt")]
                    let e = defmt::Debug2Format(&e);
                    warn!("[l2cap] accept failed: {:?}", e);
                }
            }
            conn.disconnect();
            if let Some(EchoEffect::Closed) = common::close(&conn, &mut dispatcher) {
                pattern.signal(Pattern::Off);
            }
        }
    })
    .await;
}

async fn echo<C: Controller>(
    stack: &Stack<'_, C, DefaultPacketPool>,
    conn: &Connection<'_, DefaultPacketPool>,
    channel: &mut L2capChannel<'_, DefaultPacketPool>,
    cid: u16,
    l2cap: L2capConfig,
    dispatcher: &mut Dispatcher<EchoRole, CONNECTIONS_MAX>,
    pattern: &Signal<NoopRawMutex, Pattern>,
) {
    let handle = conn_handle(conn);
    let accept = BleEvent::L2capAccept {
        conn: handle,
        cid,
        psm: l2cap.psm,
        our_mtu: l2cap.mtu,
        peer_mtu: l2cap.mtu,
    };
    if dispatcher.dispatch(&accept).reply != Reply::Accept {
        warn!("[l2cap] channel refused");
        return;
    }
    let connected = BleEvent::L2capConnect {
        conn: handle,
        cid,
        psm: l2cap.psm,
        our_mtu: l2cap.mtu,
        peer_mtu: l2cap.mtu,
    };
    if let Some(effect) = dispatcher.dispatch(&connected).effect {
        apply(stack, channel, handle, cid, dispatcher, pattern, effect).await;
    }

    let mut ticker = Ticker::every(TICK);
    let mut rx = [0; MTU];
    loop {
        let next = select(channel.receive(stack, &mut rx), ticker.next()).await;
        let effect = match next {
            Either::First(Ok(len)) => {
                dispatcher
                    .dispatch(&BleEvent::L2capRecv {
                        conn: handle,
                        cid,
                        data: &rx[..len],
                    })
                    .effect
            }
            Either::First(Err(e)) => {
                #[cfg(feature = "defmt")]
                let e = defmt::Debug2Format(&e);
                info!("[l2cap] receive ended: {:?}", e);
                if let Some(effect) = dispatcher
                    .dispatch(&BleEvent::L2capDisconnect {
                        conn: handle,
                        cid,
                        psm: l2cap.psm,
                        status: 0,
                    })
                    .effect
                {
                    apply(stack, channel, handle, cid, dispatcher, pattern, effect).await;
                }
                break;
            }
            Either::Second(_) => dispatcher.tick(),
        };
        if let Some(effect) = effect {
            apply(stack, channel, handle, cid, dispatcher, pattern, effect).await;
        }
    }
}

async fn apply<C: Controller>(
    stack: &Stack<'_, C, DefaultPacketPool>,
    channel: &mut L2capChannel<'_, DefaultPacketPool>,
    conn: ConnHandle,
    cid: u16,
    dispatcher: &mut Dispatcher<EchoRole, CONNECTIONS_MAX>,
    pattern: &Signal<NoopRawMutex, Pattern>,
    effect: EchoEffect,
) {
    match effect {
        EchoEffect::Opened => pattern.signal(Pattern::Blink(TICK)),
        EchoEffect::Closed => pattern.signal(Pattern::Off),
        EchoEffect::Send(data) => {
            // the channel counts as stalled until the host has taken the whole SDU
            dispatcher.mark_stalled();
            let status = match channel.send(stack, &data[..]).await {
                Ok(()) => 0,
                Err(e) => {
                    #[cfg(feature = "defmt")]
                    let e = defmt::Debug2Format(&e);
                    warn!("[l2cap] send failed: {:?}", e);
                    1
                }
            };
            dispatcher.dispatch(&BleEvent::L2capSendReady { conn, cid, status });
        }
    }
}
