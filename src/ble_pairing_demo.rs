//! Pairing and bonding with numeric comparison.
//!
//! The device asks every new central to pair. Its IO capabilities are display plus yes/no,
//! so LE Secure Connections ends up in numeric comparison: the six digits are logged and the
//! user confirms with the YES or NO button while connection events keep being served. Bonds
//! live in a [`BondStore`], are saved through a [`SecretStorage`] and are handed back to the
//! host on the next start. The onboard LED blinks fast on an encrypted link, slowly
//! on a plain one and stays dark while nobody is connected.

use core::fmt::Write as _;
use core::future::Future;

use embassy_futures::join::join3;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embedded_hal_async::digital::Wait;
use heapless::String;
use rand_core::{CryptoRng, RngCore};
use trouble_host::prelude::*;

use crate::common::{self, advertise, ble_task, bond_information, handle, short_string, AdServices, Step, SECRET_BOND};
use crate::config::{AdvertisingConfig, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX};
use crate::dispatch::{Dispatcher, Outcome, Role};
use crate::event::{AttrHandle, BleEvent, ConnHandle, PasskeyAction};
use crate::indicator::{self, Pattern, StatusLed};
use crate::link::LinkState;
use crate::security::{self, Access, BondStore, SecretRecord, SecretStorage};

/// `5EC00000-1337-4242-9999-333333333333`, little endian.
pub const PAIRING_SERVICE: [u8; 16] = [
    0x33, 0x33, 0x33, 0x33, 0x33, 0x33, 0x99, 0x99, 0x42, 0x42, 0x37, 0x13, 0x00, 0x00, 0xc0, 0x5e,
];

/// Bonds kept across restarts of the demo.
pub const BONDS_MAX: usize = 4;

// GATT Server definition
#[gatt_server]
struct Server {
    pairing: PairingService,
}

#[gatt_service(uuid = "5ec00000-1337-4242-9999-333333333333")]
struct PairingService {
    /// Readable on an authenticated link only.
    #[characteristic(uuid = "5ec00001-1337-4242-9999-333333333333", read)]
    secret: String<24>,
    #[characteristic(uuid = "5ec00002-1337-4242-9999-333333333333", read, notify)]
    state: String<32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairingEffect {
    /// Ask the new central to pair.
    Connected(ConnHandle),
    Disconnected,
    /// The link's security changed.
    Secured { encrypted: bool, authenticated: bool },
    /// Show the passkey to the user.
    ShowPasskey(u32),
    /// Let the user compare and confirm the passkey.
    Confirm(u32),
    /// A secret was stored, or could not be. Stored records go on to non-volatile storage.
    Bonded { stored: bool, record: SecretRecord },
    /// Answer to a secret lookup.
    Secret(Option<SecretRecord>),
}

impl PairingEffect {
    /// Status LED pattern after this effect, if it changes one.
    pub fn pattern(&self) -> Option<Pattern> {
        match *self {
            PairingEffect::Connected(_) => Some(Pattern::SLOW),
            PairingEffect::Disconnected => Some(Pattern::Off),
            PairingEffect::Secured { encrypted: true, .. } => Some(Pattern::FAST),
            PairingEffect::Secured { encrypted: false, .. } => Some(Pattern::SLOW),
            _ => None,
        }
    }
}

pub struct PairingRole<const B: usize> {
    secret: AttrHandle,
    bonds: BondStore<B>,
}

impl<const B: usize> PairingRole<B> {
    pub fn new(secret: AttrHandle, bonds: BondStore<B>) -> Self {
        Self { secret, bonds }
    }

    pub fn bonds(&self) -> &BondStore<B> {
        &self.bonds
    }

    /// Look up a secret by key, or the `index`-th one of `kind` without a key.
    pub fn secret(&self, kind: u8, index: u8, key: Option<&[u8]>) -> Option<SecretRecord> {
        let (key, value) = match key {
            Some(key) => (key, self.bonds.get(kind, key)?),
            None => self.bonds.nth(kind, index as usize)?,
        };
        SecretRecord::new(kind, key, Some(value)).ok()
    }
}

impl<const B: usize> Role for PairingRole<B> {
    type Effect = PairingEffect;

    fn on_event<const N: usize>(&mut self, link: &LinkState<N>, event: &BleEvent<'_>) -> Outcome<PairingEffect> {
        match *event {
            BleEvent::CentralConnect { conn, .. } => Outcome::silent().with(PairingEffect::Connected(conn)),
            BleEvent::CentralDisconnect { .. } if !link.any_connected() => {
                Outcome::silent().with(PairingEffect::Disconnected)
            }
            BleEvent::EncryptionUpdate {
                encrypted,
                authenticated,
                bonded,
                key_size,
                ..
            } => {
                info!(
                    "[pairing] encrypted: {}, authenticated: {}, bonded: {}, key size: {}",
                    encrypted, authenticated, bonded, key_size
                );
                Outcome::silent().with(PairingEffect::Secured {
                    encrypted,
                    authenticated,
                })
            }
            BleEvent::GattsReadRequest { conn, attr } if attr == self.secret => {
                match security::check(Access::Authenticated, link.security(conn), false) {
                    Ok(()) => Outcome::accept(),
                    Err(status) => Outcome::reject(status),
                }
            }
            BleEvent::SetSecret { kind, key, value } => {
                let record = match SecretRecord::new(kind, key, value) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("[pairing] secret not stored: {:?}", e);
                        return Outcome::silent();
                    }
                };
                let stored = match self.bonds.apply(&record) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("[pairing] secret not stored: {:?}", e);
                        false
                    }
                };
                Outcome::silent().with(PairingEffect::Bonded { stored, record })
            }
            BleEvent::GetSecret { kind, index, key } => {
                let found = self.secret(kind, index, key);
                debug!("[pairing] secret kind {} index {}: found {}", kind, index, found.is_some());
                Outcome::silent().with(PairingEffect::Secret(found))
            }
            BleEvent::PasskeyAction { action, passkey, .. } => match action {
                PasskeyAction::Display => Outcome::silent().with(PairingEffect::ShowPasskey(passkey)),
                // the answer comes from the buttons
                PasskeyAction::NumericComparison => Outcome::silent().with(PairingEffect::Confirm(passkey)),
                PasskeyAction::Input | PasskeyAction::None => Outcome::refuse(),
            },
            _ => Outcome::ack(event),
        }
    }
}

/// Run the pairing peripheral. Bonds are loaded from `storage` at start and every new bond is
/// saved back to it.
pub async fn run<C, RNG, ST, YES, NO, S>(
    controller: C,
    random_generator: &mut RNG,
    storage: &mut ST,
    mut yes: YES,
    mut no: NO,
    mut status_led: S,
) where
    C: Controller,
    RNG: RngCore + CryptoRng,
    ST: SecretStorage,
    YES: Wait,
    NO: Wait,
    S: StatusLed,
{
    let config = AdvertisingConfig::named("secure-device", [0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xf8]);
    let address: Address = Address::random(config.address);
    info!("Our address = {:?}", address);

    let mut bonds: BondStore<BONDS_MAX> = BondStore::new();
    if let Err(e) = storage.load(&mut bonds).await {
        #[cfg(feature = "defmt")]
        let e = defmt::Debug2Format(&e);
        warn!("[pairing] error loading bonds: {:?}", e);
    }

    let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> = HostResources::new();
    let stack = trouble_host::new(controller, &mut resources)
        .set_random_address(address)
        .set_random_generator_seed(random_generator)
        .set_io_capabilities(IoCapabilities::DisplayYesNo);
    let Host {
        mut peripheral, runner, ..
    } = stack.build();

    let server = unwrap!(Server::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: config.name,
        appearance: &appearance::power_device::GENERIC_POWER_DEVICE,
    })));
    let role = PairingRole::new(AttrHandle(server.pairing.secret.handle), bonds);
    let mut dispatcher: Dispatcher<PairingRole<BONDS_MAX>, CONNECTIONS_MAX> = Dispatcher::new(role);
    restore_bonds(&stack, &mut dispatcher);

    let pattern: Signal<NoopRawMutex, Pattern> = Signal::new();
    if let Err(e) = server.set(&server.pairing.secret, &short_string("Bonded secret")) {
        warn!("[pairing] error setting secret: {:?}", e);
    }
    set_state(&server, short_string("Not connected"));

    let mut buttons = Buttons {
        yes: &mut yes,
        no: &mut no,
    };
    let _ = join3(ble_task(runner), indicator::run(&mut status_led, &pattern), async {
        loop {
            match advertise(config.name, AdServices::Long(&PAIRING_SERVICE), &mut peripheral).await {
                Ok(conn) => {
                    if let Err(e) = conn.set_bondable(true) {
                        warn!("[pairing] error enabling bonding: {:?}", e);
                    }
                    match conn.with_attribute_server(&server) {
                        Ok(conn) => serve(&server, &conn, &mut dispatcher, &pattern, storage, &mut buttons).await,
                        Err(e) => error!("[gatt] error attaching server: {:?}", e),
                    }
                }
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

/// Hand every stored bond to the host, looking them up through the role.
fn restore_bonds<C: Controller, const B: usize>(
    stack: &Stack<'_, C, DefaultPacketPool>,
    dispatcher: &mut Dispatcher<PairingRole<B>, CONNECTIONS_MAX>,
) {
    for index in 0..B.min(u8::MAX as usize) as u8 {
        let lookup = BleEvent::GetSecret {
            kind: SECRET_BOND,
            index,
            key: None,
        };
        let Some(PairingEffect::Secret(Some(record))) = dispatcher.dispatch(&lookup).effect else {
            break;
        };
        match bond_information(&record.key, &record.value) {
            Some(bond) => match stack.add_bond_information(bond) {
                Ok(()) => info!("[pairing] restored bond"),
                Err(e) => warn!("[pairing] error restoring bond: {:?}", e),
            },
            None => warn!("[pairing] skipping malformed bond"),
        }
    }
}

/// The YES and NO buttons, active low.
struct Buttons<'a, YES, NO> {
    yes: &'a mut YES,
    no: &'a mut NO,
}

impl<YES: Wait, NO: Wait> Buttons<'_, YES, NO> {
    /// Wait for `next` or a button press, whichever comes first. A press yields `true` for
    /// YES and `false` for NO.
    async fn race<T>(&mut self, next: impl Future<Output = T>) -> Either<T, bool> {
        match select(next, select(self.yes.wait_for_low(), self.no.wait_for_low())).await {
            Either::First(event) => Either::First(event),
            Either::Second(Either::First(_)) => Either::Second(true),
            Either::Second(Either::Second(_)) => Either::Second(false),
        }
    }
}

/// Stream events until the connection closes. A pending numeric comparison is answered by the
/// buttons while events keep flowing, and dropped when pairing ends without an answer.
async fn serve<ST: SecretStorage, YES: Wait, NO: Wait, const B: usize>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    dispatcher: &mut Dispatcher<PairingRole<B>, CONNECTIONS_MAX>,
    pattern: &Signal<NoopRawMutex, Pattern>,
    storage: &mut ST,
    buttons: &mut Buttons<'_, YES, NO>,
) {
    if let Some(effect) = common::open(conn.raw(), dispatcher) {
        apply(server, conn, pattern, storage, effect).await;
    }
    let mut confirming: Option<u32> = None;
    loop {
        let event = match confirming {
            Some(passkey) => match buttons.race(conn.next()).await {
                Either::First(event) => event,
                Either::Second(accepted) => {
                    confirming = None;
                    answer(conn, passkey, accepted);
                    continue;
                }
            },
            None => conn.next().await,
        };
        if matches!(event, GattConnectionEvent::PairingFailed(_)) {
            confirming = None;
        }
        match handle(conn, event, |e| dispatcher.dispatch(e)).await {
            Step::Continue(effects) => {
                for effect in effects {
                    match effect {
                        PairingEffect::Confirm(passkey) => {
                            info!("[pairing] press YES or NO to confirm passkey {}", passkey);
                            confirming = Some(passkey);
                        }
                        effect => {
                            if let PairingEffect::Secured { .. } = effect {
                                confirming = None;
                            }
                            apply(server, conn, pattern, storage, effect).await;
                        }
                    }
                }
            }
            Step::Closed(effect) => {
                if let Some(effect) = effect {
                    apply(server, conn, pattern, storage, effect).await;
                }
                break;
            }
        }
    }
}

fn answer(conn: &GattConnection<'_, '_, DefaultPacketPool>, passkey: u32, accepted: bool) {
    let result = if accepted {
        info!("[pairing] passkey {} confirmed", passkey);
        conn.pass_key_confirm()
    } else {
        info!("[pairing] passkey {} rejected", passkey);
        conn.pass_key_cancel()
    };
    if let Err(e) = result {
        warn!("[pairing] error answering passkey: {:?}", e);
    }
}

async fn apply<ST: SecretStorage>(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    pattern: &Signal<NoopRawMutex, Pattern>,
    storage: &mut ST,
    effect: PairingEffect,
) {
    if let Some(p) = effect.pattern() {
        pattern.signal(p);
    }
    let state: String<32> = match effect {
        PairingEffect::Connected(handle) => {
            info!("[pairing] requesting security on {:?}", handle);
            if let Err(e) = conn.raw().request_security() {
                warn!("[pairing] security request failed: {:?}", e);
            }
            short_string("Connected")
        }
        PairingEffect::Disconnected => {
            set_state(server, short_string("Not connected"));
            return;
        }
        PairingEffect::Secured {
            encrypted,
            authenticated,
        } => match (encrypted, authenticated) {
            (true, true) => short_string("Encrypted, authenticated"),
            (true, false) => short_string("Encrypted"),
            (false, _) => short_string("Not encrypted"),
        },
        PairingEffect::ShowPasskey(passkey) => {
            info!("[pairing] passkey: {}", passkey);
            return;
        }
        PairingEffect::Confirm(_) | PairingEffect::Secret(_) => return,
        PairingEffect::Bonded { stored, record } => {
            if stored {
                if let Err(e) = storage.save(&record).await {
                    #[cfg(feature = "defmt")]
                    let e = defmt::Debug2Format(&e);
                    warn!("[pairing] bond not saved: {:?}", e);
                }
            }
            let mut s = String::new();
            let _ = write!(s, "Bond stored: {}", stored);
            s
        }
    };
    set_state(server, state.clone());
    if let Err(e) = server.pairing.state.notify(conn, &state).await {
        debug!("[pairing] state not notified: {:?}", e);
    }
}

fn set_state(server: &Server<'_>, state: String<32>) {
    if let Err(e) = server.set(&server.pairing.state, &state) {
        warn!("[pairing] error setting state: {:?}", e);
    }
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;

    use embassy_futures::block_on;
    use embedded_hal::digital::ErrorType;

    use super::*;

    /// A button that is either held down or never pressed.
    struct Button(bool);

    impl ErrorType for Button {
        type Error = Infallible;
    }

    impl Wait for Button {
        async fn wait_for_high(&mut self) -> Result<(), Infallible> {
            core::future::pending().await
        }

        async fn wait_for_low(&mut self) -> Result<(), Infallible> {
            if !self.0 {
                core::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn wait_for_rising_edge(&mut self) -> Result<(), Infallible> {
            core::future::pending().await
        }

        async fn wait_for_falling_edge(&mut self) -> Result<(), Infallible> {
            self.wait_for_low().await
        }

        async fn wait_for_any_edge(&mut self) -> Result<(), Infallible> {
            self.wait_for_low().await
        }
    }

    #[test]
    fn test_events_win_over_idle_buttons() {
        let (mut yes, mut no) = (Button(false), Button(false));
        let mut buttons = Buttons {
            yes: &mut yes,
            no: &mut no,
        };
        // e.g. the peer disconnecting in the middle of a numeric comparison
        let raced = block_on(buttons.race(core::future::ready("disconnected")));
        assert!(matches!(raced, Either::First("disconnected")));
    }

    #[test]
    fn test_buttons_answer_while_no_event_is_due() {
        let (mut yes, mut no) = (Button(false), Button(true));
        let mut buttons = Buttons {
            yes: &mut yes,
            no: &mut no,
        };
        let raced = block_on(buttons.race(core::future::pending::<()>()));
        assert!(matches!(raced, Either::Second(false)));

        let (mut yes, mut no) = (Button(true), Button(false));
        let mut buttons = Buttons {
            yes: &mut yes,
            no: &mut no,
        };
        assert!(matches!(block_on(buttons.race(core::future::pending::<()>())), Either::Second(true)));
    }
}
