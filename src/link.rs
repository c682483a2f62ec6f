//! Shadow state of the links the host currently holds.

use heapless::Vec;

use crate::event::{ConnHandle, PeerAddr};

/// Encryption state of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecurityState {
    pub encrypted: bool,
    pub authenticated: bool,
    pub bonded: bool,
    pub key_size: u8,
}

/// The open L2CAP connection-oriented channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct L2capLink {
    pub conn: ConnHandle,
    pub cid: u16,
    pub psm: u16,
    pub our_mtu: u16,
    pub peer_mtu: u16,
}

impl L2capLink {
    /// Largest payload that may be handed to a single send.
    pub fn max_payload(&self) -> usize {
        self.our_mtu.min(self.peer_mtu) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Connection {
    pub handle: ConnHandle,
    pub peer: PeerAddr,
    pub security: SecurityState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    TooManyConnections,
    UnknownConnection,
    UnknownChannel,
    ChannelBusy,
}

/// Outcome of registering a connect edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Admission {
    /// First time this handle was seen.
    New,
    /// The handle was already connected; the entry was refreshed.
    Repeated,
}

/// Per-dispatcher link bookkeeping, bounded to `N` simultaneous connections.
#[derive(Debug, Clone)]
pub struct LinkState<const N: usize> {
    connections: Vec<Connection, N>,
    l2cap: Option<L2capLink>,
    send_ready: bool,
}

impl<const N: usize> Default for LinkState<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LinkState<N> {
    pub const fn new() -> Self {
        Self {
            connections: Vec::new(),
            l2cap: None,
            send_ready: true,
        }
    }

    pub fn connect(&mut self, handle: ConnHandle, peer: PeerAddr) -> Result<Admission, LinkError> {
        if let Some(existing) = self.connections.iter_mut().find(|c| c.handle == handle) {
            existing.peer = peer;
            return Ok(Admission::Repeated);
        }
        self.connections
            .push(Connection {
                handle,
                peer,
                security: SecurityState::default(),
            })
            .map_err(|_| LinkError::TooManyConnections)?;
        Ok(Admission::New)
    }

    /// Forget a link. Any L2CAP channel riding on it goes with it.
    pub fn disconnect(&mut self, handle: ConnHandle) -> Result<Connection, LinkError> {
        let idx = self
            .connections
            .iter()
            .position(|c| c.handle == handle)
            .ok_or(LinkError::UnknownConnection)?;
        let removed = self.connections.swap_remove(idx);
        if self.l2cap.map(|l| l.conn == handle).unwrap_or(false) {
            self.l2cap = None;
            self.send_ready = true;
        }
        Ok(removed)
    }

    pub fn is_connected(&self, handle: ConnHandle) -> bool {
        self.connections.iter().any(|c| c.handle == handle)
    }

    pub fn any_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn get(&self, handle: ConnHandle) -> Option<&Connection> {
        self.connections.iter().find(|c| c.handle == handle)
    }

    pub fn l2cap_open(&mut self, link: L2capLink) -> Result<(), LinkError> {
        if !self.is_connected(link.conn) {
            return Err(LinkError::UnknownConnection);
        }
        match self.l2cap {
            Some(current) if current.cid != link.cid => Err(LinkError::ChannelBusy),
            _ => {
                self.l2cap = Some(link);
                self.send_ready = true;
                Ok(())
            }
        }
    }

    pub fn l2cap_close(&mut self, cid: u16) -> Result<L2capLink, LinkError> {
        match self.l2cap {
            Some(link) if link.cid == cid => {
                self.l2cap = None;
                self.send_ready = true;
                Ok(link)
            }
            _ => Err(LinkError::UnknownChannel),
        }
    }

    pub fn l2cap(&self) -> Option<&L2capLink> {
        self.l2cap.as_ref()
    }

    /// A send returned "would stall"; wait for the send-ready event.
    pub fn mark_stalled(&mut self) {
        self.send_ready = false;
    }

    pub fn mark_send_ready(&mut self) {
        self.send_ready = true;
    }

    /// An L2CAP channel is open and flow control allows another send.
    pub fn can_send(&self) -> bool {
        self.l2cap.is_some() && self.send_ready
    }

    pub fn update_security(&mut self, handle: ConnHandle, security: SecurityState) -> Result<(), LinkError> {
        let conn = self
            .connections
            .iter_mut()
            .find(|c| c.handle == handle)
            .ok_or(LinkError::UnknownConnection)?;
        conn.security = security;
        Ok(())
    }

    /// Security of a link; unknown links count as unencrypted.
    pub fn security(&self, handle: ConnHandle) -> SecurityState {
        self.get(handle).map(|c| c.security).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: PeerAddr = PeerAddr::random([0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xff]);

    fn channel(conn: u16, cid: u16) -> L2capLink {
        L2capLink {
            conn: ConnHandle(conn),
            cid,
            psm: 0x81,
            our_mtu: 512,
            peer_mtu: 247,
        }
    }

    #[test]
    fn test_repeated_connect_keeps_one_entry() {
        let mut link: LinkState<2> = LinkState::new();
        assert_eq!(link.connect(ConnHandle(1), PEER), Ok(Admission::New));
        assert_eq!(link.connect(ConnHandle(1), PEER), Ok(Admission::Repeated));
        assert_eq!(link.connections().len(), 1);
    }

    #[test]
    fn test_capacity() {
        let mut link: LinkState<1> = LinkState::new();
        link.connect(ConnHandle(1), PEER).unwrap();
        assert_eq!(link.connect(ConnHandle(2), PEER), Err(LinkError::TooManyConnections));
        assert!(!link.is_connected(ConnHandle(2)));
    }

    #[test]
    fn test_disconnect_unknown() {
        let mut link: LinkState<1> = LinkState::new();
        assert_eq!(link.disconnect(ConnHandle(9)), Err(LinkError::UnknownConnection));
    }

    #[test]
    fn test_disconnect_drops_channel() {
        let mut link: LinkState<2> = LinkState::new();
        link.connect(ConnHandle(1), PEER).unwrap();
        link.connect(ConnHandle(2), PEER).unwrap();
        link.l2cap_open(channel(1, 0x40)).unwrap();
        link.mark_stalled();

        link.disconnect(ConnHandle(2)).unwrap();
        assert!(link.l2cap().is_some());

        link.disconnect(ConnHandle(1)).unwrap();
        assert!(link.l2cap().is_none());
        assert!(!link.can_send());
    }

    #[test]
    fn test_channel_requires_connection() {
        let mut link: LinkState<1> = LinkState::new();
        assert_eq!(link.l2cap_open(channel(1, 0x40)), Err(LinkError::UnknownConnection));
        link.connect(ConnHandle(1), PEER).unwrap();
        link.l2cap_open(channel(1, 0x40)).unwrap();
        assert_eq!(link.l2cap_open(channel(1, 0x41)), Err(LinkError::ChannelBusy));
        assert_eq!(link.l2cap_close(0x41), Err(LinkError::UnknownChannel));
        assert_eq!(link.l2cap_close(0x40).map(|l| l.cid), Ok(0x40));
    }

    #[test]
    fn test_flow_control() {
        let mut link: LinkState<1> = LinkState::new();
        assert!(!link.can_send());
        link.connect(ConnHandle(1), PEER).unwrap();
        link.l2cap_open(channel(1, 0x40)).unwrap();
        assert!(link.can_send());
        link.mark_stalled();
        assert!(!link.can_send());
        link.mark_send_ready();
        assert!(link.can_send());
        assert_eq!(link.l2cap().map(|l| l.max_payload()), Some(247));
    }

    #[test]
    fn test_security_update() {
        let mut link: LinkState<1> = LinkState::new();
        let secure = SecurityState {
            encrypted: true,
            authenticated: true,
            bonded: false,
            key_size: 16,
        };
        assert_eq!(
            link.update_security(ConnHandle(1), secure),
            Err(LinkError::UnknownConnection)
        );
        link.connect(ConnHandle(1), PEER).unwrap();
        link.update_security(ConnHandle(1), secure).unwrap();
        assert_eq!(link.security(ConnHandle(1)), secure);
        assert_eq!(link.security(ConnHandle(7)), SecurityState::default());
    }
}
