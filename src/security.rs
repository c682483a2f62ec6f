//! Characteristic access levels, the in-memory secret store used while pairing and the seam
//! to non-volatile storage.

use heapless::Vec;

use crate::dispatch::GattStatus;
use crate::link::SecurityState;

/// Link security a characteristic demands before it may be read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Access {
    #[default]
    Open,
    Encrypted,
    Authenticated,
    /// Needs an application-level grant on top of an authenticated link.
    Authorized,
}

/// Check `access` against the current link.
///
/// `authorized` is the application's grant; without one, [`Access::Authorized`] always fails.
pub fn check(access: Access, security: SecurityState, authorized: bool) -> Result<(), GattStatus> {
    match access {
        Access::Open => Ok(()),
        Access::Encrypted if security.encrypted => Ok(()),
        Access::Encrypted => Err(GattStatus::InsufficientEncryption),
        Access::Authenticated if security.encrypted && security.authenticated => Ok(()),
        Access::Authenticated if !security.encrypted => Err(GattStatus::InsufficientEncryption),
        Access::Authenticated => Err(GattStatus::InsufficientAuthentication),
        Access::Authorized if !security.encrypted => Err(GattStatus::InsufficientEncryption),
        Access::Authorized if !security.authenticated => Err(GattStatus::InsufficientAuthentication),
        Access::Authorized if authorized => Ok(()),
        Access::Authorized => Err(GattStatus::InsufficientAuthorization),
    }
}

pub const KEY_MAX: usize = 16;
pub const VALUE_MAX: usize = 80;

/// One secret, detached from the store it came from. An empty value means "deleted".
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecretRecord {
    pub kind: u8,
    pub key: Vec<u8, KEY_MAX>,
    pub value: Vec<u8, VALUE_MAX>,
}

impl SecretRecord {
    pub fn new(kind: u8, key: &[u8], value: Option<&[u8]>) -> Result<Self, StoreError> {
        Ok(Self {
            kind,
            key: Vec::from_slice(key).map_err(|_| StoreError::TooLarge)?,
            value: Vec::from_slice(value.unwrap_or(&[])).map_err(|_| StoreError::TooLarge)?,
        })
    }

    pub fn is_deletion(&self) -> bool {
        self.value.is_empty()
    }
}

/// Where secrets survive a reset, e.g. a flash partition.
#[allow(async_fn_in_trait)]
pub trait SecretStorage {
    type Error: core::fmt::Debug;

    /// Add every saved secret to `store`.
    async fn load<const N: usize>(&mut self, store: &mut BondStore<N>) -> Result<(), Self::Error>;

    /// Save or delete one secret.
    async fn save(&mut self, record: &SecretRecord) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone)]
struct Secret {
    kind: u8,
    key: Vec<u8, KEY_MAX>,
    value: Vec<u8, VALUE_MAX>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    Full,
    TooLarge,
}

/// Bounded secret store keyed by `(kind, key)`, holding at most `N` entries.
#[derive(Debug, Clone, Default)]
pub struct BondStore<const N: usize> {
    entries: Vec<Secret, N>,
}

impl<const N: usize> BondStore<N> {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store or overwrite a secret. Setting no value deletes the entry.
    pub fn set(&mut self, kind: u8, key: &[u8], value: Option<&[u8]>) -> Result<(), StoreError> {
        let pos = self.entries.iter().position(|s| s.kind == kind && s.key == key);
        let Some(value) = value else {
            if let Some(pos) = pos {
                self.entries.remove(pos);
            }
            return Ok(());
        };
        let value = Vec::from_slice(value).map_err(|_| StoreError::TooLarge)?;
        match pos {
            Some(pos) => self.entries[pos].value = value,
            None => {
                let key = Vec::from_slice(key).map_err(|_| StoreError::TooLarge)?;
                self.entries
                    .push(Secret { kind, key, value })
                    .map_err(|_| StoreError::Full)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, kind: u8, key: &[u8]) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|s| s.kind == kind && s.key == key)
            .map(|s| s.value.as_slice())
    }

    /// `(key, value)` of the `index`-th secret of `kind`, for lookups without a key.
    pub fn nth(&self, kind: u8, index: usize) -> Option<(&[u8], &[u8])> {
        self.iter(kind).nth(index)
    }

    /// `(key, value)` of every secret of `kind`, oldest first.
    pub fn iter(&self, kind: u8) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries
            .iter()
            .filter(move |s| s.kind == kind)
            .map(|s| (s.key.as_slice(), s.value.as_slice()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Apply a detached record: store its value, or delete the entry for an empty one.
    pub fn apply(&mut self, record: &SecretRecord) -> Result<(), StoreError> {
        let value = (!record.is_deletion()).then_some(record.value.as_slice());
        self.set(record.kind, &record.key, value)
    }
}

/// A RAM store doubles as storage that lasts until reset.
impl<const M: usize> SecretStorage for BondStore<M> {
    type Error = StoreError;

    async fn load<const N: usize>(&mut self, store: &mut BondStore<N>) -> Result<(), StoreError> {
        for s in &self.entries {
            store.set(s.kind, &s.key, Some(&s.value))?;
        }
        Ok(())
    }

    async fn save(&mut self, record: &SecretRecord) -> Result<(), StoreError> {
        self.apply(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(encrypted: bool, authenticated: bool) -> SecurityState {
        SecurityState {
            encrypted,
            authenticated,
            bonded: false,
            key_size: 16,
        }
    }

    #[test]
    fn test_access_matrix() {
        let open = level(false, false);
        let enc = level(true, false);
        let auth = level(true, true);

        assert_eq!(check(Access::Open, open, false), Ok(()));
        assert_eq!(check(Access::Encrypted, open, false), Err(GattStatus::InsufficientEncryption));
        assert_eq!(check(Access::Encrypted, enc, false), Ok(()));
        assert_eq!(
            check(Access::Authenticated, enc, false),
            Err(GattStatus::InsufficientAuthentication)
        );
        assert_eq!(check(Access::Authenticated, auth, false), Ok(()));
        assert_eq!(
            check(Access::Authorized, auth, false),
            Err(GattStatus::InsufficientAuthorization)
        );
        assert_eq!(check(Access::Authorized, auth, true), Ok(()));
        assert_eq!(check(Access::Authorized, open, true), Err(GattStatus::InsufficientEncryption));
    }

    #[test]
    fn test_bond_store() {
        let mut store: BondStore<2> = BondStore::new();
        store.set(1, b"peer-a", Some(b"ltk-a")).unwrap();
        store.set(1, b"peer-b", Some(b"ltk-b")).unwrap();
        assert_eq!(store.set(2, b"peer-c", Some(b"irk")), Err(StoreError::Full));

        store.set(1, b"peer-a", Some(b"ltk-a2")).unwrap();
        assert_eq!(store.get(1, b"peer-a"), Some(&b"ltk-a2"[..]));
        assert_eq!(store.nth(1, 1).map(|(_, v)| v), Some(&b"ltk-b"[..]));
        let keys: Vec<&[u8], 2> = store.iter(1).map(|(k, _)| k).collect();
        assert_eq!(keys, [&b"peer-a"[..], &b"peer-b"[..]]);
        drop(keys);
        assert_eq!(store.get(2, b"peer-a"), None);

        store.set(1, b"peer-a", None).unwrap();
        assert_eq!(store.get(1, b"peer-a"), None);
        assert_eq!(store.len(), 1);

        assert_eq!(store.set(1, &[0; 17], Some(b"x")), Err(StoreError::TooLarge));
    }

    #[tokio::test]
    async fn test_storage_roundtrip() {
        let mut saved: BondStore<4> = BondStore::new();
        let bond = SecretRecord::new(1, b"peer-a", Some(b"ltk-a")).unwrap();
        saved.save(&bond).await.unwrap();
        saved.save(&SecretRecord::new(1, b"peer-b", Some(b"ltk-b")).unwrap()).await.unwrap();
        saved.save(&SecretRecord::new(1, b"peer-b", None).unwrap()).await.unwrap();

        let mut restored: BondStore<4> = BondStore::new();
        saved.load(&mut restored).await.unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.get(1, b"peer-a"), Some(&b"ltk-a"[..]));

        let mut tiny: BondStore<0> = BondStore::new();
        assert_eq!(saved.load(&mut tiny).await, Err(StoreError::Full));
    }
}
