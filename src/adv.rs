//! Reading advertising data reported by a scan.

pub const AD_INCOMPLETE_UUIDS16: u8 = 0x02;
pub const AD_COMPLETE_UUIDS16: u8 = 0x03;
pub const AD_INCOMPLETE_UUIDS128: u8 = 0x06;
pub const AD_COMPLETE_UUIDS128: u8 = 0x07;
pub const AD_SHORT_NAME: u8 = 0x08;
pub const AD_COMPLETE_NAME: u8 = 0x09;

/// One length-type-value structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdField<'a> {
    pub kind: u8,
    pub data: &'a [u8],
}

/// Iterates AD structures, stopping at the first truncated one.
#[derive(Debug, Clone)]
pub struct AdIter<'a> {
    data: &'a [u8],
}

impl<'a> AdIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for AdIter<'a> {
    type Item = AdField<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (&len, rest) = self.data.split_first()?;
        let len = len as usize;
        // zero padding terminates the significant part
        if len == 0 || rest.len() < len {
            self.data = &[];
            return None;
        }
        let (field, tail) = rest.split_at(len);
        self.data = tail;
        Some(AdField {
            kind: field[0],
            data: &field[1..],
        })
    }
}

/// The complete local name, or the shortened one if that is all there is.
pub fn local_name(data: &[u8]) -> Option<&str> {
    let mut short = None;
    for field in AdIter::new(data) {
        match field.kind {
            AD_COMPLETE_NAME => return core::str::from_utf8(field.data).ok(),
            AD_SHORT_NAME => short = core::str::from_utf8(field.data).ok(),
            _ => {}
        }
    }
    short
}

/// All 16-bit service UUIDs listed in the advertisement.
pub fn service_uuids16(data: &[u8]) -> impl Iterator<Item = u16> + '_ {
    AdIter::new(data)
        .filter(|f| matches!(f.kind, AD_INCOMPLETE_UUIDS16 | AD_COMPLETE_UUIDS16))
        .flat_map(|f| f.data.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])))
}

pub fn advertises_service16(data: &[u8], uuid: u16) -> bool {
    service_uuids16(data).any(|u| u == uuid)
}

/// All 128-bit service UUIDs listed in the advertisement, little endian as on air.
pub fn service_uuids128(data: &[u8]) -> impl Iterator<Item = &[u8]> + '_ {
    AdIter::new(data)
        .filter(|f| matches!(f.kind, AD_INCOMPLETE_UUIDS128 | AD_COMPLETE_UUIDS128))
        .flat_map(|f| f.data.chunks_exact(16))
}

pub fn advertises_service128(data: &[u8], uuid: &[u8; 16]) -> bool {
    service_uuids128(data).any(|u| u == uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADV: &[u8] = &[
        0x02, 0x01, 0x06, // flags
        0x05, 0x03, 0x00, 0xa1, 0x0f, 0x18, // uuids
        0x08, 0x09, b'P', b'i', b'c', b'o', b'-', b'L', b'E', // name
    ];

    #[test]
    fn test_fields() {
        let kinds: heapless::Vec<u8, 4> = AdIter::new(ADV).map(|f| f.kind).collect();
        assert_eq!(kinds.as_slice(), &[0x01, 0x03, 0x09]);
        assert_eq!(local_name(ADV), Some("Pico-LE"));
        assert!(advertises_service16(ADV, 0xa100));
        assert!(advertises_service16(ADV, 0x180f));
        assert!(!advertises_service16(ADV, 0x1843));
    }

    #[test]
    fn test_long_uuids() {
        let mut uuid = [0u8; 16];
        for (i, b) in uuid.iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut adv: heapless::Vec<u8, 31> = heapless::Vec::new();
        adv.extend_from_slice(&[0x02, 0x01, 0x06, 0x11, 0x07]).unwrap();
        adv.extend_from_slice(&uuid).unwrap();
        assert!(advertises_service128(&adv, &uuid));
        assert_eq!(service_uuids128(&adv).count(), 1);

        let mut other = uuid;
        other[15] = 0xff;
        assert!(!advertises_service128(&adv, &other));
        // a 128-bit UUID is never matched inside a 16-bit list
        assert_eq!(service_uuids128(ADV).count(), 0);
    }

    #[test]
    fn test_truncated() {
        assert_eq!(AdIter::new(&[0x05, 0x09, b'a']).count(), 0);
        assert_eq!(AdIter::new(&[0x02, 0x01, 0x06, 0x00, 0x00]).count(), 1);
        assert_eq!(local_name(&[0x03, 0x08, b'h', b'i']), Some("hi"));
        assert_eq!(local_name(&[]), None);
    }
}
