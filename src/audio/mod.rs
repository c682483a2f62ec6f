//! Audio streaming: control codes, packet framing, the playback jitter buffer and the
//! hardware seams for capture and output.

mod command;
mod packet;
mod player;
mod source;
mod tone;

pub use command::{AudioCommand, AudioStatus, CommandError, Control};
pub use packet::{AudioPacket, PacketError, SequenceTracker, HEADER_LEN};
pub use player::{scale_pcm16, Gate, PlaybackState, Player, PlayerStats, Playout};
pub use source::{to_u8_sample, Framer, SampleSource};
pub use tone::Tone;

/// PCM sink, e.g. an I2S transmitter. Samples are interleaved 16-bit little-endian.
pub trait AudioOutput {
    type Error: core::fmt::Debug;

    /// Blocks until `samples` have been handed to the hardware.
    async fn write(&mut self, samples: &[u8]) -> Result<(), Self::Error>;

    /// Silence the amplifier, where the hardware has a mute line.
    fn set_muted(&mut self, _muted: bool) {}
}
