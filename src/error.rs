use crate::audio::{CommandError, PacketError};
use crate::link::LinkError;
use crate::media::MediaError;
use crate::rgb::PayloadError;
use crate::security::StoreError;

/// Errors surfaced by the demo loops.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Ble(trouble_host::Error),
    Payload(PayloadError),
    Command(CommandError),
    Packet(PacketError),
    Link(LinkError),
    Media(MediaError),
    Store(StoreError),
    /// A required service or characteristic was not found on the peer.
    NotFound,
    /// The peripheral's hardware did not respond.
    Hardware,
}

impl From<trouble_host::Error> for Error {
    fn from(e: trouble_host::Error) -> Self {
        Self::Ble(e)
    }
}

impl<E> From<trouble_host::BleHostError<E>> for Error {
    fn from(e: trouble_host::BleHostError<E>) -> Self {
        match e {
            trouble_host::BleHostError::BleHost(e) => Self::Ble(e),
            trouble_host::BleHostError::Controller(_) => Self::Hardware,
        }
    }
}

impl From<PayloadError> for Error {
    fn from(e: PayloadError) -> Self {
        Self::Payload(e)
    }
}

impl From<CommandError> for Error {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

impl From<PacketError> for Error {
    fn from(e: PacketError) -> Self {
        Self::Packet(e)
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        Self::Media(e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
