//! Routes stack events to a device role.
//!
//! The [`Dispatcher`] owns the [`LinkState`] for one role. It applies every link edge to the
//! shadow state before the role sees it and filters out events that refer to links it does not
//! know, so a role never acts on a handle that is already gone.

use crate::event::BleEvent;
use crate::link::{Admission, L2capLink, LinkError, LinkState, SecurityState};

/// ATT error codes used in replies to GATT requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum GattStatus {
    InvalidHandle = 0x01,
    ReadNotPermitted = 0x02,
    WriteNotPermitted = 0x03,
    InsufficientAuthentication = 0x05,
    InsufficientAuthorization = 0x08,
    InvalidAttributeValueLength = 0x0d,
    InsufficientEncryption = 0x0f,
    ValueNotAllowed = 0x13,
}

impl GattStatus {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Answer the stack expects for the event that was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reply {
    /// No answer is due.
    Silent,
    /// Grant the request.
    Accept,
    /// Answer a GATT request with an ATT error.
    Reject(GattStatus),
    /// Refuse a link or channel.
    Refuse,
}

/// What a role asks for in response to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<E> {
    pub reply: Reply,
    pub effect: Option<E>,
}

impl<E> Outcome<E> {
    pub const fn silent() -> Self {
        Self {
            reply: Reply::Silent,
            effect: None,
        }
    }

    pub const fn accept() -> Self {
        Self {
            reply: Reply::Accept,
            effect: None,
        }
    }

    pub const fn reject(status: GattStatus) -> Self {
        Self {
            reply: Reply::Reject(status),
            effect: None,
        }
    }

    pub const fn refuse() -> Self {
        Self {
            reply: Reply::Refuse,
            effect: None,
        }
    }

    pub fn with(mut self, effect: E) -> Self {
        self.effect = Some(effect);
        self
    }

    /// Answer that grants requests and stays silent otherwise.
    pub fn ack(event: &BleEvent<'_>) -> Self {
        if event.is_request() {
            Self::accept()
        } else {
            Self::silent()
        }
    }
}

/// Behaviour of one demo device.
pub trait Role {
    /// Hardware or GATT side effect the caller applies after dispatch.
    type Effect;

    /// L2CAP PSMs this role listens on.
    fn psms(&self) -> &[u16] {
        &[]
    }

    fn on_event<const N: usize>(&mut self, link: &LinkState<N>, event: &BleEvent<'_>) -> Outcome<Self::Effect>;

    /// Called from the demo's periodic loop.
    fn on_tick<const N: usize>(&mut self, _link: &LinkState<N>) -> Option<Self::Effect> {
        None
    }
}

/// Counters for events the dispatcher absorbed instead of forwarding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DispatchStats {
    pub stale: u32,
    pub repeated_connects: u32,
    pub refused: u32,
}

pub struct Dispatcher<R, const N: usize> {
    role: R,
    link: LinkState<N>,
    stats: DispatchStats,
}

impl<R: Role, const N: usize> Dispatcher<R, N> {
    pub fn new(role: R) -> Self {
        Self {
            role,
            link: LinkState::new(),
            stats: DispatchStats::default(),
        }
    }

    pub fn role(&self) -> &R {
        &self.role
    }

    pub fn role_mut(&mut self) -> &mut R {
        &mut self.role
    }

    pub fn link(&self) -> &LinkState<N> {
        &self.link
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// A send on the open channel would stall; hold off until send-ready.
    pub fn mark_stalled(&mut self) {
        self.link.mark_stalled();
    }

    pub fn tick(&mut self) -> Option<R::Effect> {
        self.role.on_tick(&self.link)
    }

    pub fn dispatch(&mut self, event: &BleEvent<'_>) -> Outcome<R::Effect> {
        match *event {
            BleEvent::CentralConnect { conn, peer } | BleEvent::PeripheralConnect { conn, peer } => {
                match self.link.connect(conn, peer) {
                    Ok(Admission::New) => {}
                    Ok(Admission::Repeated) => {
                        warn!("[dispatch] repeated connect for {:?}", conn);
                        self.stats.repeated_connects += 1;
                        return Outcome::silent();
                    }
                    Err(e) => {
                        warn!("[dispatch] refusing {:?}: {:?}", conn, e);
                        self.stats.refused += 1;
                        return Outcome::refuse();
                    }
                }
            }
            BleEvent::CentralDisconnect { conn, .. } | BleEvent::PeripheralDisconnect { conn, .. } => {
                if let Err(e) = self.link.disconnect(conn) {
                    warn!("[dispatch] disconnect for {:?}: {:?}", conn, e);
                    self.stats.stale += 1;
                    return Outcome::silent();
                }
            }
            _ => {
                if let Some(conn) = event.conn() {
                    if !self.link.is_connected(conn) {
                        debug!("[dispatch] dropping {:?} on stale {:?}", event.code(), conn);
                        self.stats.stale += 1;
                        return if event.is_request() {
                            Outcome::reject(GattStatus::InvalidHandle)
                        } else {
                            Outcome::silent()
                        };
                    }
                }
                if let Err(e) = self.track(event) {
                    warn!("[dispatch] {:?} rejected: {:?}", event.code(), e);
                    self.stats.refused += 1;
                    return if event.is_request() {
                        Outcome::refuse()
                    } else {
                        Outcome::silent()
                    };
                }
            }
        }
        self.role.on_event(&self.link, event)
    }

    fn track(&mut self, event: &BleEvent<'_>) -> Result<(), LinkError> {
        match *event {
            BleEvent::L2capAccept { psm, .. } => {
                if !self.role.psms().contains(&psm) {
                    return Err(LinkError::UnknownChannel);
                }
            }
            BleEvent::L2capConnect {
                conn,
                cid,
                psm,
                our_mtu,
                peer_mtu,
            } => self.link.l2cap_open(L2capLink {
                conn,
                cid,
                psm,
                our_mtu,
                peer_mtu,
            })?,
            BleEvent::L2capDisconnect { cid, .. } => {
                self.link.l2cap_close(cid)?;
            }
            BleEvent::L2capRecv { cid, .. } | BleEvent::L2capSendReady { cid, .. } => {
                if self.link.l2cap().map(|l| l.cid) != Some(cid) {
                    return Err(LinkError::UnknownChannel);
                }
                if matches!(event, BleEvent::L2capSendReady { .. }) {
                    self.link.mark_send_ready();
                }
            }
            BleEvent::EncryptionUpdate {
                conn,
                encrypted,
                authenticated,
                bonded,
                key_size,
            } => self.link.update_security(
                conn,
                SecurityState {
                    encrypted,
                    authenticated,
                    bonded,
                    key_size,
                },
            )?,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AttrHandle, ConnHandle, PeerAddr};

    #[derive(Default)]
    struct Recorder {
        seen: heapless::Vec<crate::event::EventCode, 16>,
    }

    impl Role for Recorder {
        type Effect = ();

        fn psms(&self) -> &[u16] {
            &[0x81]
        }

        fn on_event<const N: usize>(&mut self, _link: &LinkState<N>, event: &BleEvent<'_>) -> Outcome<()> {
            self.seen.push(event.code()).unwrap();
            Outcome::ack(event)
        }
    }

    const PEER: PeerAddr = PeerAddr::public([1, 2, 3, 4, 5, 6]);

    #[test]
    fn test_stale_write_is_rejected() {
        let mut d: Dispatcher<Recorder, 1> = Dispatcher::new(Recorder::default());
        let out = d.dispatch(&BleEvent::GattsWrite {
            conn: ConnHandle(3),
            attr: AttrHandle(10),
            data: &[1],
        });
        assert_eq!(out.reply, Reply::Reject(GattStatus::InvalidHandle));
        assert!(d.role().seen.is_empty());
        assert_eq!(d.stats().stale, 1);
    }

    #[test]
    fn test_connect_edges_reach_role_once() {
        let mut d: Dispatcher<Recorder, 1> = Dispatcher::new(Recorder::default());
        let connect = BleEvent::CentralConnect {
            conn: ConnHandle(1),
            peer: PEER,
        };
        d.dispatch(&connect);
        d.dispatch(&connect);
        assert_eq!(d.role().seen.len(), 1);
        assert_eq!(d.stats().repeated_connects, 1);

        let other = BleEvent::CentralConnect {
            conn: ConnHandle(2),
            peer: PEER,
        };
        assert_eq!(d.dispatch(&other).reply, Reply::Refuse);
    }

    #[test]
    fn test_unknown_psm_refused() {
        let mut d: Dispatcher<Recorder, 1> = Dispatcher::new(Recorder::default());
        d.dispatch(&BleEvent::CentralConnect {
            conn: ConnHandle(1),
            peer: PEER,
        });
        let accept = |psm| BleEvent::L2capAccept {
            conn: ConnHandle(1),
            cid: 0x40,
            psm,
            our_mtu: 512,
            peer_mtu: 512,
        };
        assert_eq!(d.dispatch(&accept(0x70)).reply, Reply::Refuse);
        assert_eq!(d.dispatch(&accept(0x81)).reply, Reply::Accept);
    }
}
