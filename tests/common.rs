#![allow(dead_code)]

use pico_ble_demos::dispatch::{Dispatcher, Outcome, Role};
use pico_ble_demos::event::{AttrHandle, BleEvent, ConnHandle, PeerAddr};

pub const CONN: ConnHandle = ConnHandle(1);
pub const PEER: PeerAddr = PeerAddr::public([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
pub const CID: u16 = 0x0040;

pub fn connect<R: Role, const N: usize>(d: &mut Dispatcher<R, N>, conn: ConnHandle) -> Outcome<R::Effect> {
    d.dispatch(&BleEvent::CentralConnect { conn, peer: PEER })
}

pub fn disconnect<R: Role, const N: usize>(d: &mut Dispatcher<R, N>, conn: ConnHandle) -> Outcome<R::Effect> {
    d.dispatch(&BleEvent::CentralDisconnect { conn, peer: PEER })
}

pub fn write<R: Role, const N: usize>(
    d: &mut Dispatcher<R, N>,
    conn: ConnHandle,
    attr: AttrHandle,
    data: &[u8],
) -> Outcome<R::Effect> {
    d.dispatch(&BleEvent::GattsWrite { conn, attr, data })
}

pub fn read<R: Role, const N: usize>(d: &mut Dispatcher<R, N>, conn: ConnHandle, attr: AttrHandle) -> Outcome<R::Effect> {
    d.dispatch(&BleEvent::GattsReadRequest { conn, attr })
}

pub fn secure<R: Role, const N: usize>(
    d: &mut Dispatcher<R, N>,
    conn: ConnHandle,
    encrypted: bool,
    authenticated: bool,
) -> Outcome<R::Effect> {
    d.dispatch(&BleEvent::EncryptionUpdate {
        conn,
        encrypted,
        authenticated,
        bonded: false,
        key_size: if encrypted { 16 } else { 0 },
    })
}

/// Accept and open an L2CAP channel on `psm`.
pub fn open_channel<R: Role, const N: usize>(d: &mut Dispatcher<R, N>, conn: ConnHandle, psm: u16) -> Outcome<R::Effect> {
    let accept = d.dispatch(&BleEvent::L2capAccept {
        conn,
        cid: CID,
        psm,
        our_mtu: 512,
        peer_mtu: 512,
    });
    assert_eq!(accept.reply, pico_ble_demos::dispatch::Reply::Accept);
    d.dispatch(&BleEvent::L2capConnect {
        conn,
        cid: CID,
        psm,
        our_mtu: 512,
        peer_mtu: 512,
    })
}

pub fn recv<R: Role, const N: usize>(d: &mut Dispatcher<R, N>, conn: ConnHandle, data: &[u8]) -> Outcome<R::Effect> {
    d.dispatch(&BleEvent::L2capRecv { conn, cid: CID, data })
}

pub fn send_ready<R: Role, const N: usize>(d: &mut Dispatcher<R, N>, conn: ConnHandle) -> Outcome<R::Effect> {
    d.dispatch(&BleEvent::L2capSendReady { conn, cid: CID, status: 0 })
}
