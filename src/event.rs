//! BLE stack events.
//!
//! Every radio-side occurrence a demo reacts to is expressed as one [`BleEvent`] variant.
//! Each kind also has a stable numeric [`EventCode`] (1 to 31) for logs and traces.

/// Identifies one link between connect and disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(pub u16);

/// Identifies one GATT value slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttrHandle(pub u16);

/// Address of the remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddr {
    /// 0 = public, 1 = random.
    pub kind: u8,
    /// Little-endian address bytes as sent over the air.
    pub addr: [u8; 6],
}

impl PeerAddr {
    pub const fn random(addr: [u8; 6]) -> Self {
        Self { kind: 1, addr }
    }

    pub const fn public(addr: [u8; 6]) -> Self {
        Self { kind: 0, addr }
    }
}

/// What the local side must do to finish a pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PasskeyAction {
    None,
    Input,
    Display,
    NumericComparison,
}

impl PasskeyAction {
    pub const fn code(self) -> u8 {
        match self {
            PasskeyAction::None => 0,
            PasskeyAction::Input => 2,
            PasskeyAction::Display => 3,
            PasskeyAction::NumericComparison => 4,
        }
    }
}

impl TryFrom<u8> for PasskeyAction {
    type Error = UnknownCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PasskeyAction::None),
            2 => Ok(PasskeyAction::Input),
            3 => Ok(PasskeyAction::Display),
            4 => Ok(PasskeyAction::NumericComparison),
            other => Err(UnknownCode(other)),
        }
    }
}

/// Numeric code outside of the known table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnknownCode(pub u8);

macro_rules! event_codes {
    ($($name:ident = $value:literal,)*) => {
        /// Event kind, one per [`BleEvent`] variant.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        #[repr(u8)]
        pub enum EventCode {
            $($name = $value,)*
        }

        impl TryFrom<u8> for EventCode {
            type Error = UnknownCode;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(EventCode::$name),)*
                    other => Err(UnknownCode(other)),
                }
            }
        }
    };
}

event_codes! {
    CentralConnect = 1,
    CentralDisconnect = 2,
    GattsWrite = 3,
    GattsReadRequest = 4,
    ScanResult = 5,
    ScanDone = 6,
    PeripheralConnect = 7,
    PeripheralDisconnect = 8,
    GattcServiceResult = 9,
    GattcServiceDone = 10,
    GattcCharacteristicResult = 11,
    GattcCharacteristicDone = 12,
    GattcDescriptorResult = 13,
    GattcDescriptorDone = 14,
    GattcReadResult = 15,
    GattcReadDone = 16,
    GattcWriteDone = 17,
    GattcNotify = 18,
    GattcIndicate = 19,
    GattsIndicateDone = 20,
    MtuExchanged = 21,
    L2capAccept = 22,
    L2capConnect = 23,
    L2capDisconnect = 24,
    L2capRecv = 25,
    L2capSendReady = 26,
    ConnectionUpdate = 27,
    EncryptionUpdate = 28,
    GetSecret = 29,
    SetSecret = 30,
    PasskeyAction = 31,
}

/// A 16-bit or 128-bit UUID as reported by discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UuidRef<'a> {
    Short(u16),
    Long(&'a [u8; 16]),
}

/// One event from the BLE stack.
///
/// `Central*` events fire when a remote central connects to us (we act as peripheral),
/// `Peripheral*` events when we connected out to a remote peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleEvent<'a> {
    CentralConnect {
        conn: ConnHandle,
        peer: PeerAddr,
    },
    CentralDisconnect {
        conn: ConnHandle,
        peer: PeerAddr,
    },
    GattsWrite {
        conn: ConnHandle,
        attr: AttrHandle,
        data: &'a [u8],
    },
    GattsReadRequest {
        conn: ConnHandle,
        attr: AttrHandle,
    },
    ScanResult {
        peer: PeerAddr,
        adv_type: u8,
        rssi: i8,
        data: &'a [u8],
    },
    ScanDone,
    PeripheralConnect {
        conn: ConnHandle,
        peer: PeerAddr,
    },
    PeripheralDisconnect {
        conn: ConnHandle,
        peer: PeerAddr,
    },
    GattcServiceResult {
        conn: ConnHandle,
        start: AttrHandle,
        end: AttrHandle,
        uuid: UuidRef<'a>,
    },
    GattcServiceDone {
        conn: ConnHandle,
        status: u16,
    },
    GattcCharacteristicResult {
        conn: ConnHandle,
        def: AttrHandle,
        value: AttrHandle,
        properties: u8,
        uuid: UuidRef<'a>,
    },
    GattcCharacteristicDone {
        conn: ConnHandle,
        status: u16,
    },
    GattcDescriptorResult {
        conn: ConnHandle,
        attr: AttrHandle,
        uuid: UuidRef<'a>,
    },
    GattcDescriptorDone {
        conn: ConnHandle,
        status: u16,
    },
    GattcReadResult {
        conn: ConnHandle,
        attr: AttrHandle,
        data: &'a [u8],
    },
    GattcReadDone {
        conn: ConnHandle,
        attr: AttrHandle,
        status: u16,
    },
    GattcWriteDone {
        conn: ConnHandle,
        attr: AttrHandle,
        status: u16,
    },
    GattcNotify {
        conn: ConnHandle,
        attr: AttrHandle,
        data: &'a [u8],
    },
    GattcIndicate {
        conn: ConnHandle,
        attr: AttrHandle,
        data: &'a [u8],
    },
    GattsIndicateDone {
        conn: ConnHandle,
        attr: AttrHandle,
        status: u8,
    },
    MtuExchanged {
        conn: ConnHandle,
        mtu: u16,
    },
    L2capAccept {
        conn: ConnHandle,
        cid: u16,
        psm: u16,
        our_mtu: u16,
        peer_mtu: u16,
    },
    L2capConnect {
        conn: ConnHandle,
        cid: u16,
        psm: u16,
        our_mtu: u16,
        peer_mtu: u16,
    },
    L2capDisconnect {
        conn: ConnHandle,
        cid: u16,
        psm: u16,
        status: u16,
    },
    L2capRecv {
        conn: ConnHandle,
        cid: u16,
        data: &'a [u8],
    },
    L2capSendReady {
        conn: ConnHandle,
        cid: u16,
        status: u8,
    },
    ConnectionUpdate {
        conn: ConnHandle,
        interval: u16,
        latency: u16,
        supervision_timeout: u16,
        status: u8,
    },
    EncryptionUpdate {
        conn: ConnHandle,
        encrypted: bool,
        authenticated: bool,
        bonded: bool,
        key_size: u8,
    },
    GetSecret {
        kind: u8,
        index: u8,
        key: Option<&'a [u8]>,
    },
    SetSecret {
        kind: u8,
        key: &'a [u8],
        value: Option<&'a [u8]>,
    },
    PasskeyAction {
        conn: ConnHandle,
        action: PasskeyAction,
        passkey: u32,
    },
}

impl BleEvent<'_> {
    pub fn code(&self) -> EventCode {
        match self {
            BleEvent::CentralConnect { .. } => EventCode::CentralConnect,
            BleEvent::CentralDisconnect { .. } => EventCode::CentralDisconnect,
            BleEvent::GattsWrite { .. } => EventCode::GattsWrite,
            BleEvent::GattsReadRequest { .. } => EventCode::GattsReadRequest,
            BleEvent::ScanResult { .. } => EventCode::ScanResult,
            BleEvent::ScanDone => EventCode::ScanDone,
            BleEvent::PeripheralConnect { .. } => EventCode::PeripheralConnect,
            BleEvent::PeripheralDisconnect { .. } => EventCode::PeripheralDisconnect,
            BleEvent::GattcServiceResult { .. } => EventCode::GattcServiceResult,
            BleEvent::GattcServiceDone { .. } => EventCode::GattcServiceDone,
            BleEvent::GattcCharacteristicResult { .. } => EventCode::GattcCharacteristicResult,
            BleEvent::GattcCharacteristicDone { .. } => EventCode::GattcCharacteristicDone,
            BleEvent::GattcDescriptorResult { .. } => EventCode::GattcDescriptorResult,
            BleEvent::GattcDescriptorDone { .. } => EventCode::GattcDescriptorDone,
            BleEvent::GattcReadResult { .. } => EventCode::GattcReadResult,
            BleEvent::GattcReadDone { .. } => EventCode::GattcReadDone,
            BleEvent::GattcWriteDone { .. } => EventCode::GattcWriteDone,
            BleEvent::GattcNotify { .. } => EventCode::GattcNotify,
            BleEvent::GattcIndicate { .. } => EventCode::GattcIndicate,
            BleEvent::GattsIndicateDone { .. } => EventCode::GattsIndicateDone,
            BleEvent::MtuExchanged { .. } => EventCode::MtuExchanged,
            BleEvent::L2capAccept { .. } => EventCode::L2capAccept,
            BleEvent::L2capConnect { .. } => EventCode::L2capConnect,
            BleEvent::L2capDisconnect { .. } => EventCode::L2capDisconnect,
            BleEvent::L2capRecv { .. } => EventCode::L2capRecv,
            BleEvent::L2capSendReady { .. } => EventCode::L2capSendReady,
            BleEvent::ConnectionUpdate { .. } => EventCode::ConnectionUpdate,
            BleEvent::EncryptionUpdate { .. } => EventCode::EncryptionUpdate,
            BleEvent::GetSecret { .. } => EventCode::GetSecret,
            BleEvent::SetSecret { .. } => EventCode::SetSecret,
            BleEvent::PasskeyAction { .. } => EventCode::PasskeyAction,
        }
    }

    /// The link this event belongs to, for events that carry one.
    pub fn conn(&self) -> Option<ConnHandle> {
        match *self {
            BleEvent::CentralConnect { conn, .. }
            | BleEvent::CentralDisconnect { conn, .. }
            | BleEvent::GattsWrite { conn, .. }
            | BleEvent::GattsReadRequest { conn, .. }
            | BleEvent::PeripheralConnect { conn, .. }
            | BleEvent::PeripheralDisconnect { conn, .. }
            | BleEvent::GattcServiceResult { conn, .. }
            | BleEvent::GattcServiceDone { conn, .. }
            | BleEvent::GattcCharacteristicResult { conn, .. }
            | BleEvent::GattcCharacteristicDone { conn, .. }
            | BleEvent::GattcDescriptorResult { conn, .. }
            | BleEvent::GattcDescriptorDone { conn, .. }
            | BleEvent::GattcReadResult { conn, .. }
            | BleEvent::GattcReadDone { conn, .. }
            | BleEvent::GattcWriteDone { conn, .. }
            | BleEvent::GattcNotify { conn, .. }
            | BleEvent::GattcIndicate { conn, .. }
            | BleEvent::GattsIndicateDone { conn, .. }
            | BleEvent::MtuExchanged { conn, .. }
            | BleEvent::L2capAccept { conn, .. }
            | BleEvent::L2capConnect { conn, .. }
            | BleEvent::L2capDisconnect { conn, .. }
            | BleEvent::L2capRecv { conn, .. }
            | BleEvent::L2capSendReady { conn, .. }
            | BleEvent::ConnectionUpdate { conn, .. }
            | BleEvent::EncryptionUpdate { conn, .. }
            | BleEvent::PasskeyAction { conn, .. } => Some(conn),
            BleEvent::ScanResult { .. }
            | BleEvent::ScanDone
            | BleEvent::GetSecret { .. }
            | BleEvent::SetSecret { .. } => None,
        }
    }

    /// True for events that open a link.
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            BleEvent::CentralConnect { .. } | BleEvent::PeripheralConnect { .. }
        )
    }

    /// True for events that close a link.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            BleEvent::CentralDisconnect { .. } | BleEvent::PeripheralDisconnect { .. }
        )
    }

    /// True for events the stack expects an answer to.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            BleEvent::GattsWrite { .. } | BleEvent::GattsReadRequest { .. } | BleEvent::L2capAccept { .. }
        )
    }
}
