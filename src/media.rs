//! Media service values as a remote player reports them: track metadata, position and volume.
//!
//! Metadata arrives as a flat JSON object, e.g.
//! `{"title":"Song","artist":"Band","album":"LP","genre":"Rock","duration":215000,"volume":40}`.
//! Only string, number, boolean and null members are understood; nested values are an error.

use heapless::String;

use crate::common::short_string;

/// `A0000000-E8F2-537E-4F6C-D104768A1214`, little endian.
pub const MEDIA_SERVICE: [u8; 16] = media_uuid(0);

pub const TEXT_MAX: usize = 32;
pub const TRACK_MAX: usize = 64;

const UNKNOWN: &str = "Unknown";

/// Members of the media UUID family differ in the last byte of the leading group only.
const fn media_uuid(id: u8) -> [u8; 16] {
    [
        0x14, 0x12, 0x8a, 0x76, 0x04, 0xd1, 0x6c, 0x4f, 0x7e, 0x53, 0xf2, 0xe8, id, 0x00, 0x00, 0xa0,
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MediaCharacteristic {
    /// Commands are written here.
    Playback,
    TrackInfo,
    Volume,
    Status,
    Metadata,
    /// Milliseconds into the track, `u32` little endian.
    Position,
    /// Track length in milliseconds, `u32` little endian.
    Duration,
}

impl MediaCharacteristic {
    pub const ALL: [MediaCharacteristic; 7] = [
        MediaCharacteristic::Playback,
        MediaCharacteristic::TrackInfo,
        MediaCharacteristic::Volume,
        MediaCharacteristic::Status,
        MediaCharacteristic::Metadata,
        MediaCharacteristic::Position,
        MediaCharacteristic::Duration,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn uuid(self) -> [u8; 16] {
        media_uuid(self as u8 + 1)
    }

    pub fn from_uuid(uuid: &[u8; 16]) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == *uuid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MediaError {
    NotUtf8,
    /// A fixed-size value had the wrong number of bytes.
    Length,
    /// Metadata was not a flat JSON object.
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Metadata {
    pub title: String<TEXT_MAX>,
    pub artist: String<TEXT_MAX>,
    pub album: String<TEXT_MAX>,
    pub genre: String<TEXT_MAX>,
    pub duration_ms: u32,
    pub volume: Option<u8>,
}

impl Metadata {
    /// Decode the JSON object. Unknown members are skipped; text is cut to [`TEXT_MAX`].
    pub fn parse(data: &[u8]) -> Result<Self, MediaError> {
        let text = core::str::from_utf8(data).map_err(|_| MediaError::NotUtf8)?;
        let mut json = Json::new(text);
        let mut metadata = Metadata::default();
        json.expect(b'{')?;
        if json.eat(b'}') {
            return json.end().map(|_| metadata);
        }
        loop {
            let key = json.string()?;
            json.expect(b':')?;
            let value = json.value()?;
            match (key, value) {
                ("title", Value::Text(s)) => metadata.title = unescape(s),
                ("artist", Value::Text(s)) => metadata.artist = unescape(s),
                ("album", Value::Text(s)) => metadata.album = unescape(s),
                ("genre", Value::Text(s)) => metadata.genre = unescape(s),
                ("duration", Value::Number(n)) => metadata.duration_ms = n,
                ("volume", Value::Number(n)) => metadata.volume = Some(n.min(u8::MAX as u32) as u8),
                _ => {}
            }
            if json.eat(b'}') {
                break;
            }
            json.expect(b',')?;
        }
        json.end()?;
        Ok(metadata)
    }
}

enum Value<'a> {
    /// Raw text between the quotes, escapes untouched.
    Text(&'a str),
    Number(u32),
    Other,
}

struct Json<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Json<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn skip_ws(&mut self) {
        while let Some(b' ' | b'\t' | b'\r' | b'\n') = self.text.as_bytes().get(self.pos) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, b: u8) -> bool {
        self.skip_ws();
        if self.text.as_bytes().get(self.pos) == Some(&b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, b: u8) -> Result<(), MediaError> {
        self.eat(b).then_some(()).ok_or(MediaError::Malformed)
    }

    fn end(&mut self) -> Result<(), MediaError> {
        self.skip_ws();
        if self.pos == self.text.len() {
            Ok(())
        } else {
            Err(MediaError::Malformed)
        }
    }

    fn string(&mut self) -> Result<&'a str, MediaError> {
        self.expect(b'"')?;
        let bytes = self.text.as_bytes();
        let start = self.pos;
        while let Some(&b) = bytes.get(self.pos) {
            match b {
                b'"' => {
                    self.pos += 1;
                    return Ok(&self.text[start..self.pos - 1]);
                }
                b'\\' => self.pos += 2,
                _ => self.pos += 1,
            }
        }
        Err(MediaError::Malformed)
    }

    fn value(&mut self) -> Result<Value<'a>, MediaError> {
        self.skip_ws();
        let rest = &self.text[self.pos..];
        match rest.as_bytes().first() {
            Some(b'"') => self.string().map(Value::Text),
            Some(b'0'..=b'9') => {
                let len = rest
                    .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')))
                    .unwrap_or(rest.len());
                self.pos += len;
                // fractions are dropped, out of range saturates
                let whole = rest[..len].split(['.', 'e', 'E']).next().unwrap_or("");
                let n = whole.parse::<u64>().map_err(|_| MediaError::Malformed)?;
                Ok(Value::Number(n.min(u32::MAX as u64) as u32))
            }
            _ => {
                for word in ["true", "false", "null"] {
                    if rest.starts_with(word) {
                        self.pos += word.len();
                        return Ok(Value::Other);
                    }
                }
                Err(MediaError::Malformed)
            }
        }
    }
}

/// Copy JSON string contents, resolving the simple escapes. `\u` escapes become `?`.
fn unescape<const N: usize>(raw: &str) -> String<N> {
    let mut out = String::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        let c = match c {
            '\\' => match chars.next() {
                Some('n' | 't' | 'r') => ' ',
                Some('u') => {
                    chars.by_ref().take(4).for_each(drop);
                    '?'
                }
                Some(other) => other,
                None => break,
            },
            c => c,
        };
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// What one remote player last told us.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MediaState {
    pub status: String<TEXT_MAX>,
    pub track: String<TRACK_MAX>,
    pub metadata: Option<Metadata>,
    pub position_ms: Option<u32>,
    pub duration_ms: Option<u32>,
    pub volume: Option<u8>,
    /// Last byte seen on the playback characteristic.
    pub playback: Option<u8>,
}

impl MediaState {
    /// Take a notified or read value of `characteristic`. A bad value leaves the state as it was.
    pub fn update(&mut self, characteristic: MediaCharacteristic, data: &[u8]) -> Result<(), MediaError> {
        match characteristic {
            MediaCharacteristic::Status => self.status = short_string(text(data)?),
            MediaCharacteristic::TrackInfo => self.track = short_string(text(data)?),
            MediaCharacteristic::Metadata => {
                let metadata = Metadata::parse(data)?;
                if metadata.volume.is_some() {
                    self.volume = metadata.volume;
                }
                self.metadata = Some(metadata);
            }
            MediaCharacteristic::Position => self.position_ms = Some(millis(data)?),
            MediaCharacteristic::Duration => self.duration_ms = Some(millis(data)?),
            MediaCharacteristic::Volume => self.volume = Some(*data.first().ok_or(MediaError::Length)?),
            MediaCharacteristic::Playback => self.playback = Some(*data.last().ok_or(MediaError::Length)?),
        }
        Ok(())
    }

    /// Summary of the current track, once metadata has been received.
    pub fn track_info(&self) -> Option<TrackInfo> {
        let metadata = self.metadata.as_ref()?;
        let or_unknown = |s: &String<TEXT_MAX>| if s.is_empty() { short_string(UNKNOWN) } else { s.clone() };
        Some(TrackInfo {
            title: or_unknown(&metadata.title),
            artist: or_unknown(&metadata.artist),
            album: or_unknown(&metadata.album),
            genre: or_unknown(&metadata.genre),
            position_ms: self.position_ms.unwrap_or(0),
            duration_ms: match metadata.duration_ms {
                0 => self.duration_ms.unwrap_or(0),
                d => d,
            },
            volume: self.volume.unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrackInfo {
    pub title: String<TEXT_MAX>,
    pub artist: String<TEXT_MAX>,
    pub album: String<TEXT_MAX>,
    pub genre: String<TEXT_MAX>,
    pub position_ms: u32,
    pub duration_ms: u32,
    pub volume: u8,
}

fn text(data: &[u8]) -> Result<&str, MediaError> {
    core::str::from_utf8(data).map_err(|_| MediaError::NotUtf8)
}

fn millis(data: &[u8]) -> Result<u32, MediaError> {
    let bytes: [u8; 4] = data.try_into().map_err(|_| MediaError::Length)?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_family() {
        assert_eq!(MEDIA_SERVICE[15], 0xa0);
        assert_eq!(MEDIA_SERVICE[12], 0x00);
        assert_eq!(MediaCharacteristic::Playback.uuid()[12], 0x01);
        assert_eq!(MediaCharacteristic::Duration.uuid()[12], 0x07);
        for c in MediaCharacteristic::ALL {
            assert_eq!(MediaCharacteristic::from_uuid(&c.uuid()), Some(c));
            assert_eq!(MediaCharacteristic::ALL[c.index()], c);
        }
        assert_eq!(MediaCharacteristic::from_uuid(&MEDIA_SERVICE), None);
    }

    #[test]
    fn test_metadata() {
        let m = Metadata::parse(
            br#" {"title": "Blue \"Moon\"", "artist":"Band", "album":"LP", "genre":"Jazz",
                 "duration": 215000, "volume": 40, "explicit": false, "year": null} "#,
        )
        .unwrap();
        assert_eq!(m.title.as_str(), "Blue \"Moon\"");
        assert_eq!(m.artist.as_str(), "Band");
        assert_eq!(m.album.as_str(), "LP");
        assert_eq!(m.genre.as_str(), "Jazz");
        assert_eq!(m.duration_ms, 215_000);
        assert_eq!(m.volume, Some(40));

        assert_eq!(Metadata::parse(b"{}"), Ok(Metadata::default()));
        let partial = Metadata::parse(br#"{"title":"Only","duration":1.5e3}"#).unwrap();
        assert_eq!(partial.title.as_str(), "Only");
        assert_eq!(partial.duration_ms, 1);
        assert_eq!(partial.artist.as_str(), "");
    }

    #[test]
    fn test_malformed_metadata() {
        assert_eq!(Metadata::parse(b"title=x"), Err(MediaError::Malformed));
        assert_eq!(Metadata::parse(br#"{"title":"x""#), Err(MediaError::Malformed));
        assert_eq!(Metadata::parse(br#"{"tags":["a"]}"#), Err(MediaError::Malformed));
        assert_eq!(Metadata::parse(br#"{"title":"x"} trailing"#), Err(MediaError::Malformed));
        assert_eq!(Metadata::parse(br#"{"volume":-1}"#), Err(MediaError::Malformed));
        assert_eq!(Metadata::parse(&[0xff, 0xfe]), Err(MediaError::NotUtf8));
    }

    #[test]
    fn test_long_text_is_cut() {
        let m = Metadata::parse(br#"{"title":"abcdefghijklmnopqrstuvwxyz0123456789"}"#).unwrap();
        assert_eq!(m.title.len(), TEXT_MAX);
        assert!(m.title.starts_with("abcdef"));
    }

    #[test]
    fn test_state_updates() {
        let mut state = MediaState::default();
        assert_eq!(state.track_info(), None);

        state.update(MediaCharacteristic::Status, b"playing").unwrap();
        state.update(MediaCharacteristic::TrackInfo, b"Song - Band").unwrap();
        state.update(MediaCharacteristic::Position, &1234u32.to_le_bytes()).unwrap();
        state.update(MediaCharacteristic::Duration, &9000u32.to_le_bytes()).unwrap();
        state.update(MediaCharacteristic::Volume, &[55]).unwrap();
        assert_eq!(state.status.as_str(), "playing");
        assert_eq!(state.track.as_str(), "Song - Band");
        // no metadata yet
        assert_eq!(state.track_info(), None);

        state.update(MediaCharacteristic::Metadata, br#"{"title":"Song"}"#).unwrap();
        let info = state.track_info().unwrap();
        assert_eq!(info.title.as_str(), "Song");
        assert_eq!(info.artist.as_str(), "Unknown");
        assert_eq!(info.position_ms, 1234);
        assert_eq!(info.duration_ms, 9000);
        assert_eq!(info.volume, 55);

        state.update(MediaCharacteristic::Metadata, br#"{"title":"Song","volume":20}"#).unwrap();
        assert_eq!(state.track_info().unwrap().volume, 20);
    }

    #[test]
    fn test_bad_values_keep_state() {
        let mut state = MediaState::default();
        state.update(MediaCharacteristic::Position, &7u32.to_le_bytes()).unwrap();
        assert_eq!(state.update(MediaCharacteristic::Position, &[1, 2]), Err(MediaError::Length));
        assert_eq!(state.position_ms, Some(7));
        assert_eq!(state.update(MediaCharacteristic::Volume, &[]), Err(MediaError::Length));
        assert_eq!(state.update(MediaCharacteristic::Status, &[0xc3]), Err(MediaError::NotUtf8));
        state.update(MediaCharacteristic::Metadata, br#"{"title":"Kept"}"#).unwrap();
        assert!(state.update(MediaCharacteristic::Metadata, b"{").is_err());
        assert_eq!(state.metadata.unwrap().title.as_str(), "Kept");
    }
}
