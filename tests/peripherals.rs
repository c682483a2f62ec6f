use heapless::Vec;
use pico_ble_demos::ble_eink_display::{EinkEffect, EinkHandles, EinkRole, Panel};
use pico_ble_demos::ble_kitchen_sink::{Echo, KitchenEffect, KitchenHandles, KitchenRole};
use pico_ble_demos::ble_led_peripheral::{LedEffect, LedHandles, LedRole};
use pico_ble_demos::ble_notify_demo::{NotifyEffect, NotifyRole, Round};
use pico_ble_demos::ble_pairing_demo::{PairingEffect, PairingRole};
use pico_ble_demos::dispatch::{Dispatcher, GattStatus, Reply};
use pico_ble_demos::event::{AttrHandle, BleEvent, ConnHandle, PasskeyAction};
use pico_ble_demos::indicator::Pattern;
use pico_ble_demos::rgb::Rgb;
use pico_ble_demos::security::{Access, BondStore, SecretRecord};

mod common;

use common::*;

const RGB: AttrHandle = AttrHandle(10);
const STATUS: AttrHandle = AttrHandle(12);

fn led() -> Dispatcher<LedRole, 1> {
    Dispatcher::new(LedRole::new(LedHandles { rgb: RGB, status: STATUS }))
}

#[test]
fn led_connect_write_disconnect() {
    let _ = env_logger::try_init();
    let mut d = led();

    let connected = connect(&mut d, CONN);
    assert_eq!(connected.reply, Reply::Silent);
    assert_eq!(connected.effect, Some(LedEffect::Connected));

    let text = write(&mut d, CONN, RGB, b"255\t0\t64\n");
    assert_eq!(text.reply, Reply::Accept);
    assert_eq!(text.effect, Some(LedEffect::Color(Rgb::new(255, 0, 64))));

    let raw = write(&mut d, CONN, RGB, &[1, 2, 3]);
    assert_eq!(raw.effect, Some(LedEffect::Color(Rgb::new(1, 2, 3))));
    assert_eq!(d.role().color(), Rgb::new(1, 2, 3));

    let bad = write(&mut d, CONN, RGB, b"red\tgreen");
    assert_eq!(bad.reply, Reply::Reject(GattStatus::ValueNotAllowed));
    assert_eq!(bad.effect, None);
    assert_eq!(d.role().color(), Rgb::new(1, 2, 3));

    let status = write(&mut d, CONN, STATUS, b"Hacked");
    assert_eq!(status.reply, Reply::Reject(GattStatus::WriteNotPermitted));
    assert_eq!(status.effect, None);
    assert_eq!(read(&mut d, CONN, STATUS).reply, Reply::Accept);

    assert_eq!(disconnect(&mut d, CONN).effect, Some(LedEffect::Idle));
    assert!(!d.link().any_connected());
}

#[test]
fn led_stale_handles_never_reach_the_role() {
    let _ = env_logger::try_init();
    let mut d = led();
    connect(&mut d, CONN);

    let stale = write(&mut d, ConnHandle(9), RGB, &[9, 9, 9]);
    assert_eq!(stale.reply, Reply::Reject(GattStatus::InvalidHandle));
    assert_eq!(stale.effect, None);
    assert_eq!(d.role().color(), Rgb::OFF);

    disconnect(&mut d, CONN);
    // write racing the disconnect
    let late = write(&mut d, CONN, RGB, &[1, 1, 1]);
    assert_eq!(late.reply, Reply::Reject(GattStatus::InvalidHandle));
    assert_eq!(d.role().color(), Rgb::OFF);

    // second disconnect for the same handle
    assert_eq!(disconnect(&mut d, CONN).effect, None);
    assert_eq!(d.stats().stale, 3);
}

#[test]
fn led_repeated_connect_and_capacity() {
    let mut d = led();
    connect(&mut d, CONN);
    let again = connect(&mut d, CONN);
    assert_eq!(again.effect, None);
    assert_eq!(d.link().connections().len(), 1);
    assert_eq!(d.stats().repeated_connects, 1);

    let second = connect(&mut d, ConnHandle(2));
    assert_eq!(second.reply, Reply::Refuse);
    assert_eq!(d.stats().refused, 1);
    assert!(!d.link().is_connected(ConnHandle(2)));
}

const UART_RX: AttrHandle = AttrHandle(20);
const COUNTER_WRITE: AttrHandle = AttrHandle(21);
const VARIABLE_WRITE: AttrHandle = AttrHandle(22);
const KITCHEN_RGB: AttrHandle = AttrHandle(23);
const ENCRYPTED: AttrHandle = AttrHandle(30);
const AUTHENTICATED: AttrHandle = AttrHandle(31);
const AUTHORIZED: AttrHandle = AttrHandle(32);
const ECHO_BOTH: AttrHandle = AttrHandle(40);

fn kitchen() -> Dispatcher<KitchenRole, 1> {
    let mut guarded = Vec::new();
    guarded.push((ENCRYPTED, Access::Encrypted)).unwrap();
    guarded.push((AUTHENTICATED, Access::Authenticated)).unwrap();
    guarded.push((AUTHORIZED, Access::Authorized)).unwrap();
    let mut echoes = Vec::new();
    echoes.push((ECHO_BOTH, Echo::Both)).unwrap();
    Dispatcher::new(KitchenRole::new(KitchenHandles {
        rx: UART_RX,
        counter_writes: [COUNTER_WRITE, AttrHandle(24)],
        variable_writes: [VARIABLE_WRITE, AttrHandle(25)],
        rgb: KITCHEN_RGB,
        guarded,
        echoes,
    }))
}

#[test]
fn kitchen_access_levels() {
    let _ = env_logger::try_init();
    let mut d = kitchen();
    connect(&mut d, CONN);

    assert_eq!(read(&mut d, CONN, UART_RX).reply, Reply::Accept);
    assert_eq!(
        read(&mut d, CONN, ENCRYPTED).reply,
        Reply::Reject(GattStatus::InsufficientEncryption)
    );
    assert_eq!(
        write(&mut d, CONN, AUTHENTICATED, b"x").reply,
        Reply::Reject(GattStatus::InsufficientEncryption)
    );

    secure(&mut d, CONN, true, false);
    assert_eq!(read(&mut d, CONN, ENCRYPTED).reply, Reply::Accept);
    assert_eq!(
        read(&mut d, CONN, AUTHENTICATED).reply,
        Reply::Reject(GattStatus::InsufficientAuthentication)
    );

    secure(&mut d, CONN, true, true);
    assert_eq!(read(&mut d, CONN, AUTHENTICATED).reply, Reply::Accept);
    assert_eq!(
        read(&mut d, CONN, AUTHORIZED).reply,
        Reply::Reject(GattStatus::InsufficientAuthorization)
    );

    // a new link starts unencrypted
    disconnect(&mut d, CONN);
    connect(&mut d, CONN);
    assert_eq!(
        read(&mut d, CONN, ENCRYPTED).reply,
        Reply::Reject(GattStatus::InsufficientEncryption)
    );
}

#[test]
fn kitchen_writes_and_ticks() {
    let mut d = kitchen();
    assert_eq!(d.tick(), None);
    assert_eq!(connect(&mut d, CONN).effect, Some(KitchenEffect::Connected));

    assert_eq!(d.tick(), Some(KitchenEffect::Tick(0)));
    assert_eq!(d.tick(), Some(KitchenEffect::Tick(1)));
    assert_eq!(
        write(&mut d, CONN, COUNTER_WRITE, b"anything").effect,
        Some(KitchenEffect::Counter(2))
    );

    let variable = write(&mut d, CONN, VARIABLE_WRITE, b"hello").effect;
    assert_eq!(
        variable,
        Some(KitchenEffect::Variable(Vec::from_slice(b"hello").unwrap()))
    );

    assert_eq!(
        write(&mut d, CONN, KITCHEN_RGB, &[0x10, 0x20]).effect,
        Some(KitchenEffect::Color(Rgb::new(0x10, 0x20, 0)))
    );

    let echo = write(&mut d, CONN, ECHO_BOTH, b"ping");
    assert_eq!(echo.reply, Reply::Accept);
    assert_eq!(
        echo.effect,
        Some(KitchenEffect::Echo {
            attr: ECHO_BOTH,
            echo: Echo::Both,
            data: Vec::from_slice(b"ping").unwrap(),
        })
    );

    let uart = write(&mut d, CONN, UART_RX, b"line\n");
    assert_eq!(uart.reply, Reply::Accept);
    assert_eq!(uart.effect, None);

    assert_eq!(disconnect(&mut d, CONN).effect, Some(KitchenEffect::Idle));
    assert_eq!(d.tick(), None);
}

const INDICATE: AttrHandle = AttrHandle(50);

fn round(effect: Option<NotifyEffect>) -> Round {
    match effect {
        Some(NotifyEffect::Round(round)) => round,
        other => panic!("expected a round, got {:?}", other),
    }
}

#[test]
fn notify_levels_follow_link_security() {
    let _ = env_logger::try_init();
    let mut d: Dispatcher<NotifyRole, 1> = Dispatcher::new(NotifyRole::new(INDICATE));
    assert_eq!(d.tick(), None);

    assert_eq!(connect(&mut d, CONN).effect, Some(NotifyEffect::Connected(CONN)));
    let first = round(d.tick());
    assert_eq!(first.level, 0);
    assert_eq!(first.notify.as_deref(), Some("Notify 0"));
    assert_eq!(first.indicate.as_deref(), Some("Indicate 0"));
    assert_eq!(first.status().as_str(), "Indication sent");

    let withheld = round(d.tick());
    assert_eq!(withheld.level, 1);
    assert_eq!(withheld.notify, None);
    assert_eq!(withheld.status().as_str(), "Notification withheld (level 1)");

    secure(&mut d, CONN, true, true);
    let authenticated = round(d.tick());
    assert_eq!(authenticated.level, 2);
    assert_eq!(authenticated.notify.as_deref(), Some("Notify 2"));
    assert_eq!(authenticated.status().as_str(), "Notification sent (level 2)");

    // authorization is never granted
    assert_eq!(round(d.tick()).notify, None);
}

#[test]
fn notify_one_indication_in_flight() {
    let mut d: Dispatcher<NotifyRole, 1> = Dispatcher::new(NotifyRole::new(INDICATE));
    connect(&mut d, CONN);

    assert!(round(d.tick()).indicate.is_some());
    assert!(d.role().indicate_pending());
    for _ in 1..5 {
        assert_eq!(round(d.tick()).indicate, None);
    }
    // counter 5 is due, but the first indication is unconfirmed
    assert_eq!(round(d.tick()).indicate, None);

    d.dispatch(&BleEvent::GattsIndicateDone {
        conn: CONN,
        attr: INDICATE,
        status: 0,
    });
    assert!(!d.role().indicate_pending());
    for _ in 6..10 {
        assert_eq!(round(d.tick()).indicate, None);
    }
    assert_eq!(round(d.tick()).indicate.as_deref(), Some("Indicate 10"));

    assert_eq!(disconnect(&mut d, CONN).effect, Some(NotifyEffect::Disconnected));
    assert!(!d.role().indicate_pending());
    assert_eq!(d.tick(), None);
    assert_eq!(d.role().counter(), 11);
}

const SECRET: AttrHandle = AttrHandle(60);

#[test]
fn pairing_flow() {
    let _ = env_logger::try_init();
    let mut d: Dispatcher<PairingRole<4>, 1> = Dispatcher::new(PairingRole::new(SECRET, BondStore::new()));

    let connected = connect(&mut d, CONN).effect.unwrap();
    assert_eq!(connected, PairingEffect::Connected(CONN));
    assert_eq!(connected.pattern(), Some(Pattern::SLOW));
    assert_eq!(
        read(&mut d, CONN, SECRET).reply,
        Reply::Reject(GattStatus::InsufficientEncryption)
    );

    let compare = d.dispatch(&BleEvent::PasskeyAction {
        conn: CONN,
        action: PasskeyAction::NumericComparison,
        passkey: 123_456,
    });
    // answered later from the buttons
    assert_eq!(compare.reply, Reply::Silent);
    assert_eq!(compare.effect, Some(PairingEffect::Confirm(123_456)));

    let display = d.dispatch(&BleEvent::PasskeyAction {
        conn: CONN,
        action: PasskeyAction::Display,
        passkey: 42,
    });
    assert_eq!(display.effect, Some(PairingEffect::ShowPasskey(42)));

    let mut bond = [0xab; 17];
    bond[16] = 2;
    let stored = d.dispatch(&BleEvent::SetSecret {
        kind: 1,
        key: &[1, 2, 3, 4, 5, 6],
        value: Some(&bond),
    });
    let record = SecretRecord::new(1, &[1, 2, 3, 4, 5, 6], Some(&bond)).unwrap();
    assert_eq!(
        stored.effect,
        Some(PairingEffect::Bonded {
            stored: true,
            record: record.clone()
        })
    );
    assert_eq!(d.role().bonds().get(1, &[1, 2, 3, 4, 5, 6]), Some(&bond[..]));
    assert_eq!(d.role().secret(1, 0, None), Some(record.clone()));
    assert_eq!(d.role().secret(1, 1, None), None);

    let secured = secure(&mut d, CONN, true, true).effect.unwrap();
    assert_eq!(secured.pattern(), Some(Pattern::FAST));
    assert_eq!(read(&mut d, CONN, SECRET).reply, Reply::Accept);

    let gone = disconnect(&mut d, CONN).effect.unwrap();
    assert_eq!(gone.pattern(), Some(Pattern::Off));
    assert_eq!(d.role().bonds().len(), 1);
}

#[test]
fn pairing_store_full() {
    let mut d: Dispatcher<PairingRole<1>, 1> = Dispatcher::new(PairingRole::new(SECRET, BondStore::new()));
    let value = [0; 17];
    let first = d.dispatch(&BleEvent::SetSecret {
        kind: 1,
        key: &[1; 6],
        value: Some(&value),
    });
    assert!(matches!(first.effect, Some(PairingEffect::Bonded { stored: true, .. })));
    let second = d.dispatch(&BleEvent::SetSecret {
        kind: 1,
        key: &[2; 6],
        value: Some(&value),
    });
    assert!(matches!(second.effect, Some(PairingEffect::Bonded { stored: false, .. })));
    assert_eq!(d.role().bonds().len(), 1);
}

#[test]
fn pairing_secret_lookup() {
    let mut d: Dispatcher<PairingRole<2>, 1> = Dispatcher::new(PairingRole::new(SECRET, BondStore::new()));
    let ltk = [0x5a; 17];
    d.dispatch(&BleEvent::SetSecret {
        kind: 1,
        key: &[9; 6],
        value: Some(&ltk),
    });

    // lookups come from the host without a connection
    let by_key = d.dispatch(&BleEvent::GetSecret {
        kind: 1,
        index: 0,
        key: Some(&[9; 6]),
    });
    let expected = SecretRecord::new(1, &[9; 6], Some(&ltk)).unwrap();
    assert_eq!(by_key.effect, Some(PairingEffect::Secret(Some(expected.clone()))));

    let by_index = d.dispatch(&BleEvent::GetSecret {
        kind: 1,
        index: 0,
        key: None,
    });
    assert_eq!(by_index.effect, Some(PairingEffect::Secret(Some(expected))));

    let missing = d.dispatch(&BleEvent::GetSecret {
        kind: 1,
        index: 1,
        key: None,
    });
    assert_eq!(missing.effect, Some(PairingEffect::Secret(None)));
    let other_kind = d.dispatch(&BleEvent::GetSecret {
        kind: 2,
        index: 0,
        key: Some(&[9; 6]),
    });
    assert_eq!(other_kind.effect, Some(PairingEffect::Secret(None)));

    // an empty value deletes
    let deleted = d.dispatch(&BleEvent::SetSecret {
        kind: 1,
        key: &[9; 6],
        value: None,
    });
    assert!(matches!(deleted.effect, Some(PairingEffect::Bonded { stored: true, ref record }) if record.is_deletion()));
    assert!(d.role().bonds().is_empty());
}

const BUFFER: AttrHandle = AttrHandle(70);
const DISPLAY: AttrHandle = AttrHandle(72);
const COMMAND: AttrHandle = AttrHandle(74);

#[test]
fn eink_text_and_commands() {
    let _ = env_logger::try_init();
    let mut d: Dispatcher<EinkRole, 1> = Dispatcher::new(EinkRole::new(EinkHandles {
        buffer: BUFFER,
        display: DISPLAY,
        command: COMMAND,
    }));

    let connected = connect(&mut d, CONN).effect.unwrap();
    assert_eq!(connected.panel, Panel::Keep);
    assert_eq!(connected.notice().as_str(), "Connection - Connected");

    let drawn = write(&mut d, CONN, DISPLAY, b"Hello\nWorld");
    assert_eq!(drawn.reply, Reply::Accept);
    let EinkEffect { panel, status, .. } = drawn.effect.unwrap();
    assert_eq!(panel, Panel::Draw(heapless::String::try_from("Hello\nWorld").unwrap()));
    assert_eq!(status.as_str(), "Display updated");
    assert_eq!(d.role().buffer().as_str(), "Display: Hello\nWorld");

    let read_back = read(&mut d, CONN, BUFFER);
    assert_eq!(read_back.reply, Reply::Accept);
    assert_eq!(read_back.effect.unwrap().notice().as_str(), "Read - Buffer read");

    let unknown = write(&mut d, CONN, COMMAND, b"invert").effect.unwrap();
    assert_eq!(unknown.panel, Panel::Keep);
    assert_eq!(unknown.notice().as_str(), "Command - Unknown command: invert");
    assert_eq!(d.role().text(), "Hello\nWorld");

    let refresh = write(&mut d, CONN, COMMAND, b"refresh\n").effect.unwrap();
    assert_eq!(refresh.panel, Panel::Refresh);

    let clear = write(&mut d, CONN, COMMAND, b"clear").effect.unwrap();
    assert_eq!(clear.panel, Panel::Clear);
    assert_eq!(clear.status.as_str(), "Display cleared");
    assert_eq!(d.role().text(), "");

    assert_eq!(
        write(&mut d, CONN, DISPLAY, &[0xff, 0xfe]).reply,
        Reply::Reject(GattStatus::ValueNotAllowed)
    );
}
