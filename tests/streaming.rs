use pico_ble_demos::audio::{AudioStatus, PlaybackState, Playout};
use pico_ble_demos::ble_audio_sink::{Jitter, SinkEffect, SinkHandles, SinkRole};
use pico_ble_demos::ble_audio_source::{SourceEffect, SourceRole, BUFFER_SIZE, QUEUE_DEPTH, SAMPLES_PER_PACKET};
use pico_ble_demos::ble_l2cap_echo::{EchoEffect, EchoRole};
use pico_ble_demos::config::{AudioConfig, PSM_L2CAP_AUDIO, PSM_L2CAP_ECHO};
use pico_ble_demos::dispatch::{Dispatcher, GattStatus, Reply};
use pico_ble_demos::event::{AttrHandle, BleEvent};

mod common;

use common::*;

fn sent(effect: Option<EchoEffect>) -> Vec<u8> {
    match effect {
        Some(EchoEffect::Send(data)) => data.to_vec(),
        other => panic!("expected a send, got {:?}", other),
    }
}

#[test]
fn echo_stall_and_resume() {
    let _ = env_logger::try_init();
    let mut d: Dispatcher<EchoRole, 1> = Dispatcher::new(EchoRole::new(PSM_L2CAP_ECHO));
    connect(&mut d, CONN);

    let wrong = d.dispatch(&BleEvent::L2capAccept {
        conn: CONN,
        cid: CID,
        psm: 0x99,
        our_mtu: 512,
        peer_mtu: 512,
    });
    assert_eq!(wrong.reply, Reply::Refuse);

    assert_eq!(open_channel(&mut d, CONN, PSM_L2CAP_ECHO).effect, Some(EchoEffect::Opened));
    assert_eq!(sent(recv(&mut d, CONN, b"hi").effect), b"Echo: hi");

    assert_eq!(sent(d.tick()), b"Test message 0");
    for _ in 1..10 {
        assert_eq!(d.tick(), None);
    }
    d.mark_stalled();
    assert!(!d.link().can_send());
    // tick 10 falls into the stall
    assert_eq!(d.tick(), None);

    assert_eq!(send_ready(&mut d, CONN).effect, None);
    assert!(d.link().can_send());
    for _ in 11..20 {
        assert_eq!(d.tick(), None);
    }
    assert_eq!(sent(d.tick()), b"Test message 20");

    // data on a channel that is not open
    let stray = d.dispatch(&BleEvent::L2capRecv {
        conn: CONN,
        cid: CID + 1,
        data: b"x",
    });
    assert_eq!(stray.effect, None);
    assert_eq!(d.stats().refused, 2);

    assert_eq!(disconnect(&mut d, CONN).effect, Some(EchoEffect::Closed));
    assert!(d.link().l2cap().is_none());
    assert_eq!(recv(&mut d, CONN, b"late").effect, None);
}

#[test]
fn echo_truncates_to_mtu() {
    let mut d: Dispatcher<EchoRole, 1> = Dispatcher::new(EchoRole::new(PSM_L2CAP_ECHO));
    connect(&mut d, CONN);
    open_channel(&mut d, CONN, PSM_L2CAP_ECHO);
    let big = [b'a'; 600];
    let reply = sent(recv(&mut d, CONN, &big).effect);
    assert_eq!(reply.len(), 512);
    assert!(reply.starts_with(b"Echo: aaa"));
}

#[test]
fn source_packets_follow_flow_control() {
    let _ = env_logger::try_init();
    let mut d: Dispatcher<SourceRole, 1> = Dispatcher::new(SourceRole::new(PSM_L2CAP_AUDIO));
    connect(&mut d, CONN);
    assert_eq!(d.tick(), None);
    assert_eq!(open_channel(&mut d, CONN, PSM_L2CAP_AUDIO).effect, Some(SourceEffect::Streaming));

    // two packets are framed into the queue, the rest waits in the ring
    let samples: Vec<u8> = (0..1200u32).map(|i| i as u8).collect();
    assert_eq!(d.role_mut().capture(&samples), 1200);
    assert_eq!(d.role().queued(), QUEUE_DEPTH);
    assert_eq!(d.role().buffered(), 1200 - 2 * SAMPLES_PER_PACKET);
    assert_eq!(d.role().dropped(), 0);

    let packet = match d.tick() {
        Some(SourceEffect::Send(packet)) => packet,
        other => panic!("expected a packet, got {:?}", other),
    };
    assert_eq!(packet.len(), 2 + SAMPLES_PER_PACKET);
    assert_eq!(&packet[..2], &[0, 0]);
    assert_eq!(&packet[2..], &samples[..SAMPLES_PER_PACKET]);

    // stalled: the queue and then the ring fill up, the overflow is dropped
    d.mark_stalled();
    assert_eq!(d.tick(), None);
    let more: Vec<u8> = vec![0x80; 2000];
    let kept = d.role_mut().capture(&more);
    assert_eq!(d.role().queued(), QUEUE_DEPTH);
    assert_eq!(d.role().buffered(), BUFFER_SIZE);
    // the ring's free space, plus the room framing one more packet made
    let free = BUFFER_SIZE - (1200 - 2 * SAMPLES_PER_PACKET);
    assert_eq!(kept, free + SAMPLES_PER_PACKET);
    assert_eq!(d.role().dropped(), (more.len() - kept) as u32);

    send_ready(&mut d, CONN);
    match d.tick() {
        Some(SourceEffect::Send(packet)) => {
            assert_eq!(&packet[..2], &[1, 0]);
            assert_eq!(&packet[2..], &samples[SAMPLES_PER_PACKET..2 * SAMPLES_PER_PACKET]);
        }
        other => panic!("expected a packet, got {:?}", other),
    }
    assert_eq!(d.role().queued(), QUEUE_DEPTH);

    assert_eq!(disconnect(&mut d, CONN).effect, Some(SourceEffect::Stopped));
    assert_eq!(d.role().buffered(), 0);
    assert_eq!(d.role().queued(), 0);
    assert_eq!(d.tick(), None);
}

const DATA: AttrHandle = AttrHandle(80);
const CONTROL: AttrHandle = AttrHandle(82);
const STATUS: AttrHandle = AttrHandle(84);
const VOLUME: AttrHandle = AttrHandle(86);

fn packet(seq: u16, len: usize) -> Vec<u8> {
    let mut p = seq.to_le_bytes().to_vec();
    p.extend((0..len).map(|i| i as u8));
    p
}

#[test]
fn sink_gatt_and_l2cap_audio() {
    let _ = env_logger::try_init();
    let handles = SinkHandles {
        data: DATA,
        control: CONTROL,
        status: STATUS,
        volume: VOLUME,
    };
    let config = AudioConfig::playback();
    let jitter = Jitter::new();
    let mut d: Dispatcher<SinkRole, 1> = Dispatcher::new(SinkRole::new(handles, &jitter, &config));
    let mut playout = Playout::new(&config);
    let mut reader = &jitter;
    assert_eq!(connect(&mut d, CONN).effect, Some(SinkEffect::Connected));

    let first = write(&mut d, CONN, DATA, &packet(0, 1024));
    assert_eq!(first.reply, Reply::Accept);
    assert_eq!(first.effect, None);
    assert_eq!(d.role().player().buffered(), 1024);
    assert_eq!(jitter.len(), 1024);

    assert_eq!(
        write(&mut d, CONN, DATA, &[0, 0]).reply,
        Reply::Reject(GattStatus::InvalidAttributeValueLength)
    );

    open_channel(&mut d, CONN, PSM_L2CAP_AUDIO);
    // seq 1 and 2 never arrive
    let streamed = recv(&mut d, CONN, &packet(3, 1024));
    assert_eq!(streamed.reply, Reply::Silent);
    assert_eq!(streamed.effect, Some(SinkEffect::Status(AudioStatus::Playing)));
    assert_eq!(d.role().player().stats().lost_packets, 2);

    assert_eq!(
        write(&mut d, CONN, CONTROL, &[0x02]).effect,
        Some(SinkEffect::Status(AudioStatus::Paused))
    );
    let mut out = [0u8; 512];
    playout.set_gate(d.role().player().gate());
    assert!(playout.next_chunk(&mut reader, &mut out).is_none());

    assert_eq!(
        write(&mut d, CONN, CONTROL, &[0x06]).effect,
        Some(SinkEffect::Volume { level: 90, muted: false })
    );
    assert_eq!(
        write(&mut d, CONN, CONTROL, &[0x08]).effect,
        Some(SinkEffect::Volume { level: 90, muted: true })
    );

    let unknown = write(&mut d, CONN, CONTROL, &[0x0a]);
    assert_eq!(unknown.reply, Reply::Reject(GattStatus::ValueNotAllowed));
    assert_eq!(unknown.effect, Some(SinkEffect::Status(AudioStatus::Error)));
    assert_eq!(
        write(&mut d, CONN, CONTROL, &[]).reply,
        Reply::Reject(GattStatus::InvalidAttributeValueLength)
    );

    assert_eq!(
        write(&mut d, CONN, CONTROL, &[0x01]).effect,
        Some(SinkEffect::Status(AudioStatus::Playing))
    );
    assert_eq!(
        write(&mut d, CONN, VOLUME, &[42]).effect,
        Some(SinkEffect::Volume { level: 42, muted: true })
    );
    assert_eq!(
        write(&mut d, CONN, VOLUME, &[1, 2]).reply,
        Reply::Reject(GattStatus::InvalidAttributeValueLength)
    );

    // muted playback still drains the buffer, as silence
    playout.set_gate(d.role().player().gate());
    let chunk = playout.next_chunk(&mut reader, &mut out).unwrap();
    assert_eq!(chunk.len(), 512);
    assert!(chunk.iter().all(|b| *b == 0));
    assert_eq!(jitter.len(), 2048 - 512);

    assert_eq!(disconnect(&mut d, CONN).effect, Some(SinkEffect::Disconnected));
    assert_eq!(d.role().player().state(), PlaybackState::Idle);
    assert_eq!(d.role().player().buffered(), 0);
    assert!(jitter.is_empty());
    assert!(!d.role().player().gate().playing);
    assert!(d.link().l2cap().is_none());
}
