/// Single-byte commands written to the audio control characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AudioCommand {
    Play = 0x01,
    Pause = 0x02,
    Stop = 0x03,
    Next = 0x04,
    Previous = 0x05,
    VolumeUp = 0x06,
    VolumeDown = 0x07,
    Mute = 0x08,
    Unmute = 0x09,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    Empty,
    Unknown(u8),
    /// A multi-byte frame with a bad tag or length.
    Malformed,
}

impl TryFrom<u8> for AudioCommand {
    type Error = CommandError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => AudioCommand::Play,
            0x02 => AudioCommand::Pause,
            0x03 => AudioCommand::Stop,
            0x04 => AudioCommand::Next,
            0x05 => AudioCommand::Previous,
            0x06 => AudioCommand::VolumeUp,
            0x07 => AudioCommand::VolumeDown,
            0x08 => AudioCommand::Mute,
            0x09 => AudioCommand::Unmute,
            other => return Err(CommandError::Unknown(other)),
        })
    }
}

/// Status byte exposed on the audio status characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AudioStatus {
    Ready = 0x00,
    Playing = 0x01,
    Paused = 0x02,
    Stopped = 0x03,
    Error = 0xff,
}

/// Anything written to the control characteristic.
///
/// One byte is an [`AudioCommand`]. Longer writes are tagged frames: `[1, on]` sets
/// playback, `[2, level]` sets the volume on a 0..=255 scale and `[3, lo, hi]` reports the
/// sender's latency in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Control {
    Command(AudioCommand),
    Playback(bool),
    Volume(u8),
    Latency(u16),
}

impl Control {
    pub fn parse(data: &[u8]) -> Result<Self, CommandError> {
        match data {
            [] => Err(CommandError::Empty),
            [cmd] => AudioCommand::try_from(*cmd).map(Control::Command),
            [0x01, on] => Ok(Control::Playback(*on != 0)),
            [0x02, level] => Ok(Control::Volume((*level as u16 * 100 / 255) as u8)),
            [0x03, lo, hi] => Ok(Control::Latency(u16::from_le_bytes([*lo, *hi]))),
            _ => Err(CommandError::Malformed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands() {
        assert_eq!(Control::parse(&[0x01]), Ok(Control::Command(AudioCommand::Play)));
        assert_eq!(Control::parse(&[0x09]), Ok(Control::Command(AudioCommand::Unmute)));
        assert_eq!(Control::parse(&[0x0a]), Err(CommandError::Unknown(0x0a)));
        assert_eq!(Control::parse(&[]), Err(CommandError::Empty));
        for code in 1..=9u8 {
            assert_eq!(AudioCommand::try_from(code).map(|c| c as u8), Ok(code));
        }
    }

    #[test]
    fn test_frames() {
        assert_eq!(Control::parse(&[0x01, 0x00]), Ok(Control::Playback(false)));
        assert_eq!(Control::parse(&[0x02, 255]), Ok(Control::Volume(100)));
        assert_eq!(Control::parse(&[0x02, 0]), Ok(Control::Volume(0)));
        assert_eq!(Control::parse(&[0x03, 0xe8, 0x03]), Ok(Control::Latency(1000)));
        assert_eq!(Control::parse(&[0x03, 0xe8]), Err(CommandError::Malformed));
        assert_eq!(Control::parse(&[0x07, 1, 2, 3]), Err(CommandError::Malformed));
    }
}
