use heapless::Vec;
use pico_ble_demos::ble_media_central::{MediaEffect, MediaRole, MediaWrite, QUERY_PERIOD};
use pico_ble_demos::dispatch::Dispatcher;
use pico_ble_demos::event::{AttrHandle, BleEvent, ConnHandle, PeerAddr, UuidRef};
use pico_ble_demos::indicator::Pattern;
use pico_ble_demos::media::{MediaCharacteristic, MEDIA_SERVICE};

const KITCHEN: PeerAddr = PeerAddr::random([0x10, 0x8f, 0x1a, 0x05, 0xe4, 0xff]);
const LOUNGE: PeerAddr = PeerAddr::random([0x20, 0x8f, 0x1a, 0x05, 0xe4, 0xff]);
const GARAGE: PeerAddr = PeerAddr::public([1, 2, 3, 4, 5, 6]);

type Media = Dispatcher<MediaRole<2>, 2>;

fn adv(name: &str) -> Vec<u8, 31> {
    let mut data = Vec::new();
    data.extend_from_slice(&[0x02, 0x01, 0x06, 0x11, 0x07]).unwrap();
    data.extend_from_slice(&MEDIA_SERVICE).unwrap();
    data.push(name.len() as u8 + 1).unwrap();
    data.push(0x09).unwrap();
    data.extend_from_slice(name.as_bytes()).unwrap();
    data
}

fn scan(d: &mut Media, peer: PeerAddr, data: &[u8]) -> Option<MediaEffect> {
    d.dispatch(&BleEvent::ScanResult {
        peer,
        adv_type: 0,
        rssi: -55,
        data,
    })
    .effect
}

fn connect(d: &mut Media, conn: ConnHandle, peer: PeerAddr) -> Option<MediaEffect> {
    d.dispatch(&BleEvent::PeripheralConnect { conn, peer }).effect
}

/// Report every media characteristic at `base + index`.
fn discover(d: &mut Media, conn: ConnHandle, base: u16) {
    for c in MediaCharacteristic::ALL {
        let uuid = c.uuid();
        let value = AttrHandle(base + c.index() as u16 * 2);
        let effect = d
            .dispatch(&BleEvent::GattcCharacteristicResult {
                conn,
                def: AttrHandle(value.0 - 1),
                value,
                properties: 0x12,
                uuid: UuidRef::Long(&uuid),
            })
            .effect;
        assert_eq!(effect, Some(MediaEffect::Discovered { conn, characteristic: c }));
    }
    d.dispatch(&BleEvent::GattcCharacteristicDone { conn, status: 0 });
}

fn handle(base: u16, c: MediaCharacteristic) -> AttrHandle {
    AttrHandle(base + c.index() as u16 * 2)
}

#[test]
fn media_central_tracks_several_players() {
    let _ = env_logger::try_init();
    let mut d: Media = Dispatcher::new(MediaRole::new());

    let kitchen_adv = adv("Kitchen");
    assert_eq!(scan(&mut d, GARAGE, &[0x02, 0x01, 0x06, 0x03, 0x03, 0x0f, 0x18]), None);
    assert_eq!(scan(&mut d, KITCHEN, &kitchen_adv), Some(MediaEffect::Found(KITCHEN)));
    assert_eq!(scan(&mut d, LOUNGE, &adv("Lounge")), Some(MediaEffect::Found(LOUNGE)));

    let first = connect(&mut d, ConnHandle(1), KITCHEN).unwrap();
    assert_eq!(
        first,
        MediaEffect::Connected {
            conn: ConnHandle(1),
            devices: 1
        }
    );
    assert_eq!(first.pattern(), Some(Pattern::Blink(QUERY_PERIOD)));
    // already connected
    assert_eq!(scan(&mut d, KITCHEN, &kitchen_adv), None);
    connect(&mut d, ConnHandle(2), LOUNGE);
    // both slots taken
    assert_eq!(scan(&mut d, GARAGE, &adv("Garage")), None);

    discover(&mut d, ConnHandle(1), 0x10);
    discover(&mut d, ConnHandle(2), 0x40);
    assert_eq!(d.role().device(ConnHandle(1)).unwrap().name.as_str(), "Kitchen");
    assert_eq!(d.role().device(ConnHandle(2)).unwrap().name.as_str(), "Lounge");

    let notify = d.dispatch(&BleEvent::GattcNotify {
        conn: ConnHandle(1),
        attr: handle(0x10, MediaCharacteristic::Metadata),
        data: br#"{"title":"Song","artist":"Band","duration":180000}"#,
    });
    assert_eq!(
        notify.effect,
        Some(MediaEffect::Updated {
            conn: ConnHandle(1),
            characteristic: MediaCharacteristic::Metadata
        })
    );
    d.dispatch(&BleEvent::GattcNotify {
        conn: ConnHandle(1),
        attr: handle(0x10, MediaCharacteristic::Position),
        data: &42_000u32.to_le_bytes(),
    });
    // a read answer goes the same way as a notification
    d.dispatch(&BleEvent::GattcReadResult {
        conn: ConnHandle(1),
        attr: handle(0x10, MediaCharacteristic::Volume),
        data: &[70],
    });

    let track = d.role().track_info(ConnHandle(1)).unwrap();
    assert_eq!(track.title.as_str(), "Song");
    assert_eq!(track.album.as_str(), "Unknown");
    assert_eq!(track.position_ms, 42_000);
    assert_eq!(track.duration_ms, 180_000);
    assert_eq!(track.volume, 70);
    assert_eq!(d.role().position(ConnHandle(1)), Some(42_000));
    // the other player is untouched
    assert_eq!(d.role().track_info(ConnHandle(2)), None);
    assert_eq!(d.role().volume(ConnHandle(2)), None);

    // a handle of the lounge player means nothing on the kitchen link
    let foreign = d.dispatch(&BleEvent::GattcNotify {
        conn: ConnHandle(1),
        attr: AttrHandle(0x40),
        data: b"x",
    });
    assert_eq!(foreign.effect, None);

    let gone = d
        .dispatch(&BleEvent::PeripheralDisconnect {
            conn: ConnHandle(1),
            peer: KITCHEN,
        })
        .effect
        .unwrap();
    assert_eq!(
        gone,
        MediaEffect::Disconnected {
            conn: ConnHandle(1),
            devices: 1
        }
    );
    assert_eq!(gone.pattern(), None);
    assert_eq!(d.role().devices().len(), 1);
    // a slot is free again
    assert_eq!(scan(&mut d, GARAGE, &adv("Garage")), Some(MediaEffect::Found(GARAGE)));

    let last = d
        .dispatch(&BleEvent::PeripheralDisconnect {
            conn: ConnHandle(2),
            peer: LOUNGE,
        })
        .effect
        .unwrap();
    assert_eq!(last.pattern(), Some(Pattern::Off));
}

#[test]
fn media_central_commands_and_volume() {
    let mut d: Media = Dispatcher::new(MediaRole::new());
    assert_eq!(d.role().command(ConnHandle(1), b"play"), None);

    connect(&mut d, ConnHandle(1), KITCHEN);
    // nothing to write to before discovery
    assert_eq!(d.role().set_volume(ConnHandle(1), 10), None);
    discover(&mut d, ConnHandle(1), 0x10);

    let play = d.role().command(ConnHandle(1), b"play").unwrap();
    assert_eq!(
        play,
        MediaWrite {
            conn: ConnHandle(1),
            attr: handle(0x10, MediaCharacteristic::Playback),
            data: Vec::from_slice(b"play").unwrap(),
        }
    );
    let loud = d.role().set_volume(ConnHandle(1), 250).unwrap();
    assert_eq!(loud.attr, handle(0x10, MediaCharacteristic::Volume));
    assert_eq!(loud.data.as_slice(), &[100]);
    assert_eq!(d.role().command(ConnHandle(1), &[0; 64]), None);
}

#[test]
fn media_central_rejects_bad_values() {
    let mut d: Media = Dispatcher::new(MediaRole::new());
    connect(&mut d, ConnHandle(1), GARAGE);
    assert_eq!(d.role().device(ConnHandle(1)).unwrap().name.as_str(), "Unknown");
    discover(&mut d, ConnHandle(1), 0x10);

    let short = d.dispatch(&BleEvent::GattcNotify {
        conn: ConnHandle(1),
        attr: handle(0x10, MediaCharacteristic::Position),
        data: &[1, 2],
    });
    assert_eq!(short.effect, None);
    let broken = d.dispatch(&BleEvent::GattcNotify {
        conn: ConnHandle(1),
        attr: handle(0x10, MediaCharacteristic::Metadata),
        data: b"{\"title\":",
    });
    assert_eq!(broken.effect, None);
    assert_eq!(d.role().position(ConnHandle(1)), None);
    assert_eq!(d.role().track_info(ConnHandle(1)), None);

    // notifications racing the disconnect never reach the role
    d.dispatch(&BleEvent::PeripheralDisconnect {
        conn: ConnHandle(1),
        peer: GARAGE,
    });
    let late = d.dispatch(&BleEvent::GattcNotify {
        conn: ConnHandle(1),
        attr: handle(0x10, MediaCharacteristic::Volume),
        data: &[5],
    });
    assert_eq!(late.effect, None);
    assert_eq!(d.stats().stale, 1);
}
