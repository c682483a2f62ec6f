//! Glue between the TrouBLE host and the [`Dispatcher`]: event conversion, replies and the
//! advertising helper every peripheral demo uses.

use heapless::String;
use trouble_host::prelude::*;

use crate::dispatch::{Dispatcher, GattStatus, Outcome, Reply, Role};
use crate::event::{AttrHandle, BleEvent, ConnHandle, PasskeyAction, PeerAddr};
use crate::link::SecurityState;

/// Secret kind used when the host reports a new bond: key is the peer address,
/// value is the LTK followed by the security level.
pub(crate) const SECRET_BOND: u8 = 1;

/// Length of a stored bond value.
pub(crate) const BOND_VALUE_LEN: usize = 17;

/// Services listed in the advertising payload.
#[derive(Clone, Copy)]
pub(crate) enum AdServices<'a> {
    /// Flags and name only.
    None,
    Short(&'a [[u8; 2]]),
    /// A 128-bit UUID fills most of the payload, so the name moves to the scan response.
    Long(&'a [u8; 16]),
}

/// This is a background task that is required to run forever alongside any other BLE tasks.
pub(crate) async fn ble_task<C: Controller, P: PacketPool>(mut runner: Runner<'_, C, P>) {
    loop {
        if let Err(e) = runner.run().await {
            #[cfg(feature = "defmt")]
            let e = defmt::Debug2Format(&e);
            panic!("[ble_task] error: {:?}", e);
        }
    }
}

/// Create an advertiser to use to connect to a BLE Central, and wait for it to connect.
///
/// GATT demos attach their attribute server to the returned connection.
pub(crate) async fn advertise<'values, C: Controller>(
    name: &'values str,
    services: AdServices<'_>,
    peripheral: &mut Peripheral<'values, C, DefaultPacketPool>,
) -> Result<Connection<'values, DefaultPacketPool>, BleHostError<C::Error>> {
    let mut adv_data = [0; 31];
    let mut scan_data = [0; 31];
    let (adv_len, scan_len) = match services {
        AdServices::None => {
            let len = AdStructure::encode_slice(
                &[
                    AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
                    AdStructure::CompleteLocalName(name.as_bytes()),
                ],
                &mut adv_data[..],
            )?;
            (len, 0)
        }
        AdServices::Short(uuids) => {
            let len = AdStructure::encode_slice(
                &[
                    AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
                    AdStructure::ServiceUuids16(uuids),
                    AdStructure::CompleteLocalName(name.as_bytes()),
                ],
                &mut adv_data[..],
            )?;
            (len, 0)
        }
        AdServices::Long(uuid) => {
            let adv = AdStructure::encode_slice(
                &[
                    AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
                    AdStructure::ServiceUuids128(&[*uuid]),
                ],
                &mut adv_data[..],
            )?;
            let scan = AdStructure::encode_slice(&[AdStructure::CompleteLocalName(name.as_bytes())], &mut scan_data[..])?;
            (adv, scan)
        }
    };
    let advertiser = peripheral
        .advertise(
            &Default::default(),
            Advertisement::ConnectableScannableUndirected {
                adv_data: &adv_data[..adv_len],
                scan_data: &scan_data[..scan_len],
            },
        )
        .await?;
    info!("[adv] advertising as {}", name);
    let conn = advertiser.accept().await?;
    info!("[adv] connection established");
    Ok(conn)
}

/// Copy `s` into a fixed capacity string, cutting at the last character that fits.
pub(crate) fn short_string<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

pub(crate) fn conn_handle<P: PacketPool>(conn: &Connection<'_, P>) -> ConnHandle {
    ConnHandle(conn.handle().raw())
}

/// The host reports the peer's address bytes only; the kind is recorded as public.
pub(crate) fn peer_addr<P: PacketPool>(conn: &Connection<'_, P>) -> PeerAddr {
    let mut addr = [0; 6];
    addr.copy_from_slice(conn.peer_address().raw());
    PeerAddr::public(addr)
}

pub(crate) fn security_state(level: SecurityLevel, bonded: bool) -> SecurityState {
    let (encrypted, authenticated) = match level {
        SecurityLevel::NoEncryption => (false, false),
        SecurityLevel::Encrypted => (true, false),
        SecurityLevel::EncryptedAuthenticated => (true, true),
    };
    SecurityState {
        encrypted,
        authenticated,
        bonded,
        key_size: if encrypted { 16 } else { 0 },
    }
}

pub(crate) fn security_level_code(level: SecurityLevel) -> u8 {
    match level {
        SecurityLevel::NoEncryption => 0,
        SecurityLevel::Encrypted => 1,
        SecurityLevel::EncryptedAuthenticated => 2,
    }
}

pub(crate) fn att_error(status: GattStatus) -> AttErrorCode {
    match status {
        GattStatus::InvalidHandle => AttErrorCode::INVALID_HANDLE,
        GattStatus::ReadNotPermitted => AttErrorCode::READ_NOT_PERMITTED,
        GattStatus::WriteNotPermitted => AttErrorCode::WRITE_NOT_PERMITTED,
        GattStatus::InsufficientAuthentication => AttErrorCode::INSUFFICIENT_AUTHENTICATION,
        GattStatus::InsufficientAuthorization => AttErrorCode::INSUFFICIENT_AUTHORISATION,
        GattStatus::InvalidAttributeValueLength => AttErrorCode::INVALID_ATTRIBUTE_VALUE_LENGTH,
        GattStatus::InsufficientEncryption => AttErrorCode::INSUFFICIENT_ENCRYPTION,
        GattStatus::ValueNotAllowed => AttErrorCode::VALUE_NOT_ALLOWED,
    }
}

/// Map a GATT request onto the event the roles understand.
pub(crate) fn gatt_request<'a, P: PacketPool>(conn: ConnHandle, event: &'a GattEvent<'_, '_, P>) -> Option<BleEvent<'a>> {
    match event {
        GattEvent::Read(e) => Some(BleEvent::GattsReadRequest {
            conn,
            attr: AttrHandle(e.handle()),
        }),
        GattEvent::Write(e) => Some(BleEvent::GattsWrite {
            conn,
            attr: AttrHandle(e.handle()),
            data: e.data(),
        }),
        _ => None,
    }
}

/// Send the answer a role chose for a GATT request.
pub(crate) async fn respond<P: PacketPool>(event: GattEvent<'_, '_, P>, reply: Reply) {
    let result = match reply {
        Reply::Reject(status) => event.reject(att_error(status)),
        Reply::Refuse => event.reject(AttErrorCode::WRITE_NOT_PERMITTED),
        Reply::Accept | Reply::Silent => event.accept(),
    };
    match result {
        Ok(reply) => reply.send().await,
        Err(e) => warn!("[gatt] error sending response: {:?}", e),
    }
}

/// Effects of one connection event, oldest first.
pub(crate) struct Effects<E>([Option<E>; 2]);

impl<E> Effects<E> {
    pub(crate) const fn none() -> Self {
        Self([None, None])
    }

    pub(crate) fn then(mut self, effect: Option<E>) -> Self {
        match &mut self.0 {
            [first @ None, _] => *first = effect,
            [_, second] => *second = effect,
        }
        self
    }
}

impl<E> From<Option<E>> for Effects<E> {
    fn from(effect: Option<E>) -> Self {
        Self([effect, None])
    }
}

impl<E> IntoIterator for Effects<E> {
    type Item = E;
    type IntoIter = core::iter::Flatten<core::array::IntoIter<Option<E>, 2>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter().flatten()
    }
}

/// Result of one pass through [`next_step`].
pub(crate) enum Step<E> {
    /// The connection is still up; apply the effects in order.
    Continue(Effects<E>),
    /// The connection closed; apply the final effect, if any, and go back to advertising.
    Closed(Option<E>),
}

/// Announce a new connection to the dispatcher.
pub(crate) fn open<R: Role, P: PacketPool, const N: usize>(
    conn: &Connection<'_, P>,
    dispatcher: &mut Dispatcher<R, N>,
) -> Option<R::Effect> {
    dispatcher
        .dispatch(&BleEvent::CentralConnect {
            conn: conn_handle(conn),
            peer: peer_addr(conn),
        })
        .effect
}

/// Announce the end of a connection to the dispatcher.
pub(crate) fn close<R: Role, P: PacketPool, const N: usize>(
    conn: &Connection<'_, P>,
    dispatcher: &mut Dispatcher<R, N>,
) -> Option<R::Effect> {
    dispatcher
        .dispatch(&BleEvent::CentralDisconnect {
            conn: conn_handle(conn),
            peer: peer_addr(conn),
        })
        .effect
}

/// Wait for the next event on a GATT connection, run it through the dispatcher and answer
/// the stack.
pub(crate) async fn next_step<R: Role, const N: usize>(
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    dispatcher: &mut Dispatcher<R, N>,
) -> Step<R::Effect> {
    let event = conn.next().await;
    handle(conn, event, |e| dispatcher.dispatch(e)).await
}

/// Translate one connection event, hand it to `dispatch` and answer the stack.
///
/// `dispatch` is only called synchronously, so it may lock a dispatcher that other tasks
/// share.
pub(crate) async fn handle<E>(
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    event: GattConnectionEvent<'_, '_, DefaultPacketPool>,
    mut dispatch: impl FnMut(&BleEvent<'_>) -> Outcome<E>,
) -> Step<E> {
    let handle = conn_handle(conn.raw());
    match event {
        GattConnectionEvent::Disconnected { reason } => {
            info!("[gatt] disconnected: {:?}", reason);
            let outcome = dispatch(&BleEvent::CentralDisconnect {
                conn: handle,
                peer: peer_addr(conn.raw()),
            });
            Step::Closed(outcome.effect)
        }
        GattConnectionEvent::PairingComplete { security_level, bond } => {
            info!("[gatt] pairing complete: {:?}", security_level);
            Step::Continue(pairing_complete(handle, security_level, bond.as_ref(), dispatch))
        }
        GattConnectionEvent::PairingFailed(err) => {
            error!("[gatt] pairing error: {:?}", err);
            Step::Continue(Effects::none())
        }
        GattConnectionEvent::PassKeyDisplay(key) => {
            info!("[gatt] passkey display: {}", key);
            let outcome = dispatch(&BleEvent::PasskeyAction {
                conn: handle,
                action: PasskeyAction::Display,
                passkey: key.value(),
            });
            Step::Continue(outcome.effect.into())
        }
        GattConnectionEvent::PassKeyConfirm(key) => {
            info!("[gatt] numeric comparison: {}", key);
            let outcome = dispatch(&BleEvent::PasskeyAction {
                conn: handle,
                action: PasskeyAction::NumericComparison,
                passkey: key.value(),
            });
            let result = match outcome.reply {
                Reply::Accept => conn.pass_key_confirm(),
                // the role answers later through its effect
                Reply::Silent => Ok(()),
                Reply::Reject(_) | Reply::Refuse => conn.pass_key_cancel(),
            };
            if let Err(e) = result {
                warn!("[gatt] error answering passkey: {:?}", e);
            }
            Step::Continue(outcome.effect.into())
        }
        GattConnectionEvent::Gatt { event } => {
            let outcome = match gatt_request(handle, &event) {
                Some(request) => dispatch(&request),
                None => Outcome::accept(),
            };
            respond(event, outcome.reply).await;
            Step::Continue(outcome.effect.into())
        }
        _ => Step::Continue(Effects::none()),
    }
}

/// Report a finished pairing: the new bond first, if any, then the link's security.
pub(crate) fn pairing_complete<E>(
    conn: ConnHandle,
    level: SecurityLevel,
    bond: Option<&BondInformation>,
    mut dispatch: impl FnMut(&BleEvent<'_>) -> Outcome<E>,
) -> Effects<E> {
    let mut effects = Effects::none();
    if let Some(bond) = bond {
        let value = bond_value(bond);
        let stored = dispatch(&BleEvent::SetSecret {
            kind: SECRET_BOND,
            key: bond.identity.bd_addr.raw(),
            value: Some(&value),
        });
        effects = effects.then(stored.effect);
    }
    let state = security_state(level, bond.is_some());
    let update = dispatch(&BleEvent::EncryptionUpdate {
        conn,
        encrypted: state.encrypted,
        authenticated: state.authenticated,
        bonded: state.bonded,
        key_size: state.key_size,
    });
    effects.then(update.effect)
}

/// Stored form of a bond: the LTK followed by the security level.
pub(crate) fn bond_value(bond: &BondInformation) -> [u8; BOND_VALUE_LEN] {
    let mut value = [0; BOND_VALUE_LEN];
    value[..16].copy_from_slice(&bond.ltk.to_le_bytes());
    value[16] = security_level_code(bond.security_level);
    value
}

/// Rebuild the host's bond record from a stored `(address, ltk + level)` pair.
pub(crate) fn bond_information(key: &[u8], value: &[u8]) -> Option<BondInformation> {
    let addr: [u8; 6] = key.try_into().ok()?;
    if value.len() != BOND_VALUE_LEN {
        return None;
    }
    let ltk: [u8; 16] = value[..16].try_into().ok()?;
    let security_level = match value[16] {
        0 => SecurityLevel::NoEncryption,
        1 => SecurityLevel::Encrypted,
        2 => SecurityLevel::EncryptedAuthenticated,
        _ => return None,
    };
    Some(BondInformation {
        identity: Identity {
            bd_addr: BdAddr::new(addr),
            irk: None,
        },
        security_level,
        is_bonded: true,
        ltk: LongTermKey::from_le_bytes(ltk),
    })
}
