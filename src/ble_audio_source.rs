//! Microphone streaming over an L2CAP channel.
//!
//! Samples are captured from an analog input in bursts of one packet's worth per packet
//! period and buffered in a ring. Full packets are framed into a short queue and sent as
//! sequenced 8-bit PCM while the channel accepts data. While the channel is stalled the
//! queue fills first, then the ring; samples that fit in neither are counted as dropped.

use embassy_futures::join::join3;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker};
use heapless::Vec;
use trouble_host::prelude::*;

use crate::audio::{to_u8_sample, Framer, SampleSource, HEADER_LEN};
use crate::common::{self, advertise, ble_task, conn_handle, AdServices};
use crate::config::{AdvertisingConfig, AudioConfig, L2capConfig, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX, PSM_L2CAP_AUDIO};
use crate::dispatch::{Dispatcher, Outcome, Reply, Role};
use crate::event::{BleEvent, ConnHandle};
use crate::indicator::{self, Pattern, StatusLed};
use crate::link::LinkState;
use crate::ring::{ChunkQueue, RingBuffer};

/// Largest SDU sent on the channel.
pub const MTU: usize = 512;

/// Samples carried by one packet.
pub const SAMPLES_PER_PACKET: usize = MTU - HEADER_LEN;

/// Capture ring, two packets deep.
pub const BUFFER_SIZE: usize = 1024;

/// Framed packets waiting for the channel.
pub const QUEUE_DEPTH: usize = 2;

const FIRST_CID: u16 = 0x0040;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEffect {
    Streaming,
    Stopped,
    Send(Vec<u8, MTU>),
}

pub struct SourceRole {
    psm: [u16; 1],
    ring: RingBuffer<BUFFER_SIZE>,
    framer: Framer<SAMPLES_PER_PACKET>,
    queue: ChunkQueue<MTU, QUEUE_DEPTH>,
}

impl SourceRole {
    pub fn new(psm: u16) -> Self {
        Self {
            psm: [psm],
            ring: RingBuffer::new(),
            framer: Framer::new(),
            queue: ChunkQueue::new(),
        }
    }

    /// Buffer captured samples, framing packets as they fill. Returns how many samples were
    /// kept; the rest count as dropped.
    pub fn capture(&mut self, mut samples: &[u8]) -> usize {
        let mut kept = 0;
        loop {
            let n = samples.len().min(self.ring.free());
            kept += self.ring.push_slice(&samples[..n]);
            samples = &samples[n..];
            if samples.is_empty() {
                return kept;
            }
            if !self.frame() {
                // ring and queue are both full
                self.ring.push_slice(samples);
                return kept;
            }
        }
    }

    /// Samples not framed yet.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Packets waiting for the channel.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped(&self) -> u32 {
        self.ring.dropped() + self.queue.dropped()
    }

    /// Sequence number of the next packet to be framed.
    pub fn next_seq(&self) -> u16 {
        self.framer.seq()
    }

    /// Move whole packets from the ring into the queue. Returns whether any moved.
    fn frame(&mut self) -> bool {
        let mut moved = false;
        while !self.queue.is_full() && self.ring.len() + self.framer.len() >= SAMPLES_PER_PACKET {
            while !self.framer.is_ready() {
                let Some(sample) = self.ring.pop() else {
                    return moved;
                };
                self.framer.push(sample);
            }
            let mut packet = [0; MTU];
            let Ok(len) = self.framer.take(&mut packet) else {
                return moved;
            };
            if self.queue.push(&packet[..len]).is_err() {
                return moved;
            }
            moved = true;
        }
        moved
    }

    fn reset(&mut self) {
        self.ring.clear();
        self.framer.clear();
        self.queue.clear();
    }
}

impl Role for SourceRole {
    type Effect = SourceEffect;

    fn psms(&self) -> &[u16] {
        &self.psm
    }

    fn on_event<const N: usize>(&mut self, _link: &LinkState<N>, event: &BleEvent<'_>) -> Outcome<SourceEffect> {
        match *event {
            BleEvent::L2capConnect { cid, peer_mtu, .. } => {
                info!("[audio] streaming on cid {:#x}, mtu {}", cid, peer_mtu);
                self.reset();
                self.ring.reset_dropped();
                self.queue.reset_dropped();
                Outcome::silent().with(SourceEffect::Streaming)
            }
            BleEvent::L2capDisconnect { .. } | BleEvent::CentralDisconnect { .. } => {
                info!("[audio] stopped, {} bytes dropped", self.dropped());
                self.reset();
                Outcome::silent().with(SourceEffect::Stopped)
            }
            _ => Outcome::ack(event),
        }
    }

    fn on_tick<const N: usize>(&mut self, link: &LinkState<N>) -> Option<SourceEffect> {
        if link.l2cap().is_none() || !link.can_send() {
            return None;
        }
        self.frame();
        let packet = Vec::from_slice(self.queue.pop()?).ok()?;
        self.frame();
        Some(SourceEffect::Send(packet))
    }
}

pub async fn run<C, A, S>(controller: C, mut adc: A, mut status_led: S)
where
    C: Controller,
    A: SampleSource,
    S: StatusLed,
{
    let config = AdvertisingConfig::named("audio-source", [0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xfd]);
    let l2cap = L2capConfig {
        psm: PSM_L2CAP_AUDIO,
        mtu: MTU as u16,
    };
    let audio = AudioConfig::capture();
    let period = packet_period(&audio);
    let address: Address = Address::random(config.address);
    info!("Our address = {:?}", address);

    let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> = HostResources::new();
    let stack = trouble_host::new(controller, &mut resources).set_random_address(address);
    let Host {
        mut peripheral, runner, ..
    } = stack.build();

    let mut dispatcher: Dispatcher<SourceRole, CONNECTIONS_MAX> = Dispatcher::new(SourceRole::new(l2cap.psm));
    let pattern: Signal<NoopRawMutex, Pattern> = Signal::new();

    info!(
        "[audio] {} Hz, {} bit, packet every {} ms",
        audio.sample_rate,
        audio.bits_per_sample,
        period.as_millis()
    );
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
                    let link = Channel {
                        conn: conn_handle(&conn),
                        cid: FIRST_CID,
                        config: l2cap,
                    };
                    stream(&stack, &mut channel, link, period, &mut adc, &mut dispatcher, &pattern).await;
                }
                Err(e) => {
                    #[cfg(feature = "defmt")]
                    let e = defmt::Debug2Format(&e);
                    warn!("[l2cap] accept failed: {:?}", e);
                }
            }
            conn.disconnect();
            if let Some(SourceEffect::Stopped) = common::close(&conn, &mut dispatcher) {
                pattern.signal(Pattern::Off);
            }
        }
    })
    .await;
}

/// Time it takes to capture one packet's worth of samples.
fn packet_period(audio: &AudioConfig) -> Duration {
    let micros = SAMPLES_PER_PACKET as u64 * 1_000_000 / audio.bytes_per_second() as u64;
    Duration::from_micros(micros)
}

#[derive(Clone, Copy)]
struct Channel {
    conn: ConnHandle,
    cid: u16,
    config: L2capConfig,
}

async fn stream<C: Controller, A: SampleSource>(
    stack: &Stack<'_, C, DefaultPacketPool>,
    channel: &mut L2capChannel<'_, DefaultPacketPool>,
    link: Channel,
    period: Duration,
    adc: &mut A,
    dispatcher: &mut Dispatcher<SourceRole, CONNECTIONS_MAX>,
    pattern: &Signal<NoopRawMutex, Pattern>,
) {
    let accept = BleEvent::L2capAccept {
        conn: link.conn,
        cid: link.cid,
        psm: link.config.psm,
        our_mtu: link.config.mtu,
        peer_mtu: link.config.mtu,
    };
    if dispatcher.dispatch(&accept).reply != Reply::Accept {
        warn!("[l2cap] channel refused");
        return;
    }
    let connected = BleEvent::L2capConnect {
        conn: link.conn,
        cid: link.cid,
        psm: link.config.psm,
        our_mtu: link.config.mtu,
        peer_mtu: link.config.mtu,
    };
    if let Some(SourceEffect::Streaming) = dispatcher.dispatch(&connected).effect {
        pattern.signal(Pattern::Blink(period));
    }

    let mut ticker = Ticker::every(period);
    let mut rx = [0; MTU];
    let mut burst = [0; SAMPLES_PER_PACKET];
    loop {
        let next = select(channel.receive(stack, &mut rx), ticker.next()).await;
        match next {
            Either::First(Ok(len)) => debug!("[audio] ignoring {} bytes from peer", len),
            Either::First(Err(e)) => {
                #[cfg(feature = "defmt")]
                let e = defmt::Debug2Format(&e);
                info!("[l2cap] channel closed: {:?}", e);
                let closed = BleEvent::L2capDisconnect {
                    conn: link.conn,
                    cid: link.cid,
                    psm: link.config.psm,
                    status: 0,
                };
                if let Some(SourceEffect::Stopped) = dispatcher.dispatch(&closed).effect {
                    pattern.signal(Pattern::Off);
                }
                return;
            }
            Either::Second(_) => {
                for sample in burst.iter_mut() {
                    *sample = to_u8_sample(adc.read_u16());
                }
                dispatcher.role_mut().capture(&burst);
                if let Some(SourceEffect::Send(packet)) = dispatcher.tick() {
                    dispatcher.mark_stalled();
                    let status = match channel.send(stack, &packet[..]).await {
                        Ok(()) => 0,
                        Err(e) => {
                            #[cfg(feature = "defmt")]
                            let e = defmt::Debug2Format(&e);
                            warn!("[audio] send failed: {:?}", e);
                            1
                        }
                    };
                    dispatcher.dispatch(&BleEvent::L2capSendReady {
                        conn: link.conn,
                        cid: link.cid,
                        status,
                    });
                }
            }
        }
    }
}
