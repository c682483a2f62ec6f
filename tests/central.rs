use pico_ble_demos::ble_led_central::{CentralEffect, CentralRole, COLORS, RGB_CHARACTERISTIC};
use pico_ble_demos::dispatch::{Dispatcher, Reply};
use pico_ble_demos::event::{AttrHandle, BleEvent, ConnHandle, PeerAddr, UuidRef};

const LED_PEER: PeerAddr = PeerAddr::random([0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xff]);
const OTHER_PEER: PeerAddr = PeerAddr::public([1, 2, 3, 4, 5, 6]);
const CONN: ConnHandle = ConnHandle(3);
const VALUE: AttrHandle = AttrHandle(0x12);

const LED_ADV: &[u8] = &[
    0x02, 0x01, 0x06, // flags
    0x03, 0x03, 0x00, 0xa1, // 0xA100
    0x08, 0x09, b'B', b'L', b'E', b'-', b'L', b'E', b'D',
];
const BATTERY_ADV: &[u8] = &[0x02, 0x01, 0x06, 0x03, 0x03, 0x0f, 0x18];

fn scan(d: &mut Dispatcher<CentralRole, 1>, peer: PeerAddr, data: &[u8]) -> Option<CentralEffect> {
    d.dispatch(&BleEvent::ScanResult {
        peer,
        adv_type: 0,
        rssi: -60,
        data,
    })
    .effect
}

fn discovered(d: &mut Dispatcher<CentralRole, 1>, uuid: u16) -> Option<CentralEffect> {
    d.dispatch(&BleEvent::GattcCharacteristicResult {
        conn: CONN,
        def: AttrHandle(VALUE.0 - 1),
        value: VALUE,
        properties: 0x0a,
        uuid: UuidRef::Short(uuid),
    })
    .effect
}

#[test]
fn central_finds_connects_and_cycles() {
    let _ = env_logger::try_init();
    let mut d: Dispatcher<CentralRole, 1> = Dispatcher::new(CentralRole::new());

    assert_eq!(scan(&mut d, OTHER_PEER, BATTERY_ADV), None);
    assert_eq!(scan(&mut d, OTHER_PEER, &[0x05, 0x03]), None);
    assert_eq!(scan(&mut d, LED_PEER, LED_ADV), Some(CentralEffect::Found(LED_PEER)));

    let connected = d.dispatch(&BleEvent::PeripheralConnect {
        conn: CONN,
        peer: LED_PEER,
    });
    assert_eq!(connected.effect, Some(CentralEffect::Connected(CONN)));
    // nothing to write before discovery
    assert_eq!(d.tick(), None);
    assert_eq!(scan(&mut d, LED_PEER, LED_ADV), None);

    assert_eq!(discovered(&mut d, 0xa102), None);
    assert_eq!(discovered(&mut d, RGB_CHARACTERISTIC), Some(CentralEffect::Ready(VALUE)));
    assert_eq!(d.role().rgb(), Some(VALUE));

    for i in 0..COLORS.len() + 1 {
        assert_eq!(
            d.tick(),
            Some(CentralEffect::Write {
                attr: VALUE,
                color: COLORS[i % COLORS.len()],
            })
        );
    }

    let done = d.dispatch(&BleEvent::GattcWriteDone {
        conn: CONN,
        attr: VALUE,
        status: 0,
    });
    assert_eq!(done.reply, Reply::Silent);

    let gone = d.dispatch(&BleEvent::PeripheralDisconnect {
        conn: CONN,
        peer: LED_PEER,
    });
    assert_eq!(gone.effect, Some(CentralEffect::Disconnected));
    assert_eq!(d.role().rgb(), None);
    assert_eq!(d.tick(), None);
}

#[test]
fn central_ignores_results_for_stale_links() {
    let mut d: Dispatcher<CentralRole, 1> = Dispatcher::new(CentralRole::new());
    assert_eq!(discovered(&mut d, RGB_CHARACTERISTIC), None);
    assert_eq!(d.role().rgb(), None);
    assert_eq!(d.stats().stale, 1);
}
