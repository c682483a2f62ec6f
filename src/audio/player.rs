use super::command::{AudioCommand, AudioStatus, Control};
use super::packet::{AudioPacket, PacketError, SequenceTracker};
use crate::config::AudioConfig;
use crate::ring::SampleBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlaybackState {
    /// Waiting for the prebuffer to fill.
    Idle,
    Playing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlayerStats {
    pub packets_received: u32,
    pub overrun_bytes: u32,
    pub lost_packets: u32,
    pub buffer_level: u8,
}

/// What the playback side needs to know about the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Gate {
    pub playing: bool,
    /// Effective volume in percent, 0 while muted.
    pub volume: u8,
}

/// Receiving side of a PCM stream: sequence tracking, playback state and volume.
///
/// Samples go into `B`, which the matching [`Playout`] drains. With a
/// [`SharedRing`](crate::ring::SharedRing) the two halves can live in different tasks.
pub struct Player<B> {
    buffer: B,
    state: PlaybackState,
    prebuffer: usize,
    volume: u8,
    volume_step: u8,
    muted: bool,
    seq: SequenceTracker,
    stats: PlayerStats,
}

impl<B: SampleBuffer> Player<B> {
    pub fn new(buffer: B, config: &AudioConfig) -> Self {
        Self {
            buffer,
            state: PlaybackState::Idle,
            prebuffer: config.prebuffer,
            volume: config.volume.min(100),
            volume_step: config.volume_step,
            muted: false,
            seq: SequenceTracker::new(),
            stats: PlayerStats::default(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn status(&self) -> AudioStatus {
        match self.state {
            PlaybackState::Idle => AudioStatus::Ready,
            PlaybackState::Playing => AudioStatus::Playing,
            PlaybackState::Paused => AudioStatus::Paused,
            PlaybackState::Stopped => AudioStatus::Stopped,
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Volume actually applied to samples.
    pub fn effective_volume(&self) -> u8 {
        if self.muted {
            0
        } else {
            self.volume
        }
    }

    pub fn gate(&self) -> Gate {
        Gate {
            playing: self.state == PlaybackState::Playing,
            volume: self.effective_volume(),
        }
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut B {
        &mut self.buffer
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> PlayerStats {
        PlayerStats {
            overrun_bytes: self.buffer.dropped(),
            lost_packets: self.seq.lost(),
            buffer_level: self.buffer.level(),
            ..self.stats
        }
    }

    /// Queue one sequenced packet. Bytes that do not fit are dropped and counted.
    pub fn receive(&mut self, data: &[u8]) -> Result<usize, PacketError> {
        let packet = AudioPacket::parse(data)?;
        let lost = self.seq.observe(packet.seq);
        if lost > 0 {
            debug!("[audio] {} packets lost before {}", lost, packet.seq);
        }
        self.stats.packets_received += 1;
        let taken = self.buffer.push_slice(packet.samples);
        if taken < packet.samples.len() {
            warn!("[audio] buffer overrun, dropped {} bytes", packet.samples.len() - taken);
        }
        if matches!(self.state, PlaybackState::Idle | PlaybackState::Stopped) && self.buffer.len() >= self.prebuffer {
            info!("[audio] prebuffer reached, starting playback");
            self.state = PlaybackState::Playing;
        }
        Ok(taken)
    }

    pub fn play(&mut self) {
        self.state = PlaybackState::Playing;
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    /// Stop and drop everything buffered.
    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.buffer.clear();
        self.seq.reset();
    }

    /// Back to a fresh player with cleared statistics.
    pub fn reset(&mut self) {
        self.stop();
        self.state = PlaybackState::Idle;
        self.buffer.reset_dropped();
        self.stats = PlayerStats::default();
    }

    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
    }

    pub fn apply(&mut self, control: Control) -> AudioStatus {
        match control {
            Control::Command(cmd) => self.command(cmd),
            Control::Playback(true) => self.play(),
            Control::Playback(false) => self.pause(),
            Control::Volume(v) => self.set_volume(v),
            Control::Latency(ms) => debug!("[audio] sender latency {} ms", ms),
        }
        self.status()
    }

    fn command(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::Play => self.play(),
            AudioCommand::Pause => self.pause(),
            AudioCommand::Stop => self.stop(),
            AudioCommand::VolumeUp => self.set_volume(self.volume.saturating_add(self.volume_step)),
            AudioCommand::VolumeDown => self.set_volume(self.volume.saturating_sub(self.volume_step)),
            AudioCommand::Mute => self.muted = true,
            AudioCommand::Unmute => self.muted = false,
            // track navigation belongs to the sender
            AudioCommand::Next | AudioCommand::Previous => {}
        }
    }
}

/// Playback side: drains the buffer a [`Player`] fills, following the player's latest [`Gate`].
pub struct Playout {
    gate: Gate,
    chunk_size: usize,
    starved: bool,
    underruns: u32,
    chunks_played: u32,
}

impl Playout {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            gate: Gate {
                playing: false,
                volume: config.volume.min(100),
            },
            chunk_size: config.chunk_size.max(1),
            starved: false,
            underruns: 0,
            chunks_played: 0,
        }
    }

    pub fn gate(&self) -> Gate {
        self.gate
    }

    pub fn set_gate(&mut self, gate: Gate) {
        if !gate.playing {
            self.starved = false;
        }
        self.gate = gate;
    }

    /// Underrun streaks since creation.
    pub fn underruns(&self) -> u32 {
        self.underruns
    }

    pub fn chunks_played(&self) -> u32 {
        self.chunks_played
    }

    /// Fill `out` with the next samples to play.
    ///
    /// Returns `None` when not playing. When the buffer runs dry, one chunk of silence is
    /// produced and the underrun is counted once until data flows again.
    pub fn next_chunk<'a, B: SampleBuffer>(&mut self, buffer: &mut B, out: &'a mut [u8]) -> Option<&'a [u8]> {
        if !self.gate.playing {
            return None;
        }
        let n = buffer.pop_into(out);
        if n == 0 {
            if !self.starved {
                self.starved = true;
                self.underruns += 1;
                warn!("[audio] buffer underrun");
            }
            let silence = out.len().min(self.chunk_size);
            out[..silence].fill(0);
            return Some(&out[..silence]);
        }
        self.starved = false;
        self.chunks_played += 1;
        scale_pcm16(&mut out[..n], self.gate.volume);
        Some(&out[..n])
    }
}

/// Scale little-endian signed 16-bit samples in place by `volume` percent.
pub fn scale_pcm16(buf: &mut [u8], volume: u8) {
    if volume >= 100 {
        return;
    }
    for sample in buf.chunks_exact_mut(2) {
        let v = i16::from_le_bytes([sample[0], sample[1]]) as i32;
        let scaled = (v * volume as i32 / 100) as i16;
        sample.copy_from_slice(&scaled.to_le_bytes());
    }
}
