//! In-memory key-value table with per-entry TTL and lazy expiry reaping.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use thiserror::Error;

use crate::clock::is_expired;

/// The memtable's `RwLock` was poisoned by a panic in some other thread while the lock was
/// held.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("memtable lock poisoned")]
pub struct LockPoisoned;

impl<T> From<PoisonError<T>> for LockPoisoned {
    fn from(_: PoisonError<T>) -> Self {
        LockPoisoned
    }
}

/// A stored value together with its absolute expiration timestamp.
///
/// `expires_at_ms == 0` means the entry never expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Bytes,
    pub expires_at_ms: i64,
}

/// Concurrent key-value map, sorted by key, with lazy TTL expiry.
///
/// Guarded by a single `RwLock`: coarse, but every operation below holds the lock for its
/// entire critical section, which is enough to make the operations linearizable with respect
/// to each other.
#[derive(Debug, Default)]
pub struct MemTable {
    inner: RwLock<BTreeMap<Vec<u8>, Entry>>,
}

impl MemTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    /// Fresh copy of the value if present and not expired. Reaps the entry if it was found
    /// but expired.
    pub fn get(&self, key: &[u8], now_ms: i64) -> Result<Option<Bytes>, LockPoisoned> {
        {
            let table = self.inner.read()?;
            match table.get(key) {
                Some(entry) if !is_expired(entry.expires_at_ms, now_ms) => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Found but expired: reap under the write lock, then report absent.
        let mut table = self.inner.write()?;
        if let Some(entry) = table.get(key) {
            if is_expired(entry.expires_at_ms, now_ms) {
                table.remove(key);
            }
        }
        Ok(None)
    }

    /// Unconditionally installs `(value, expires_at_ms)`, replacing any prior entry.
    ///
    /// A negative `expires_at_ms` (e.g. a TTL underflow replayed from the WAL) is clamped to
    /// `0`, i.e. "never expires".
    pub fn set(&self, key: &[u8], value: &[u8], expires_at_ms: i64) -> Result<(), LockPoisoned> {
        let mut table = self.inner.write()?;
        table.insert(
            key.to_vec(),
            Entry {
                value: Bytes::copy_from_slice(value),
                expires_at_ms: expires_at_ms.max(0),
            },
        );
        Ok(())
    }

    /// Removes `key` regardless of expiration. Returns whether it existed.
    pub fn del(&self, key: &[u8]) -> Result<bool, LockPoisoned> {
        let mut table = self.inner.write()?;
        Ok(table.remove(key).is_some())
    }

    /// As `get`, but reports presence only.
    pub fn exists(&self, key: &[u8], now_ms: i64) -> Result<bool, LockPoisoned> {
        Ok(self.get(key, now_ms)?.is_some())
    }

    /// If `key` is present and not expired, sets its expiration and returns `true`.
    /// Otherwise returns `false` (reaping the entry if it was expired).
    ///
    /// A non-positive `expires_at_ms` is clamped to `0` rather than re-enabling immortality
    /// through some other sentinel; see `SPEC_FULL.md` §4.2.
    pub fn expire(
        &self,
        key: &[u8],
        expires_at_ms: i64,
        now_ms: i64,
    ) -> Result<bool, LockPoisoned> {
        let expires_at_ms = expires_at_ms.max(0);
        let mut table = self.inner.write()?;
        Ok(match table.get_mut(key) {
            Some(entry) if is_expired(entry.expires_at_ms, now_ms) => {
                table.remove(key);
                false
            }
            Some(entry) => {
                entry.expires_at_ms = expires_at_ms;
                true
            }
            None => false,
        })
    }

    /// All live keys whose bytes start with `prefix`, lexicographically sorted. Reaps any
    /// expired entries encountered along the way.
    pub fn keys(&self, prefix: &[u8], now_ms: i64) -> Result<Vec<Vec<u8>>, LockPoisoned> {
        let mut table = self.inner.write()?;
        let mut expired = Vec::new();
        let mut out = Vec::new();

        let range_start = prefix.to_vec();
        for (key, entry) in table.range(range_start..) {
            if !key.starts_with(prefix) {
                break;
            }
            if is_expired(entry.expires_at_ms, now_ms) {
                expired.push(key.clone());
                continue;
            }
            out.push(key.clone());
        }

        for key in expired {
            table.remove(&key);
        }

        Ok(out)
    }

    #[cfg(test)]
    pub fn len(&self) -> Result<usize, LockPoisoned> {
        Ok(self.inner.read()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let t = MemTable::new();
        t.set(b"hello", b"world", 0).unwrap();
        assert_eq!(t.get(b"hello", 1).unwrap().as_deref(), Some(&b"world"[..]));
    }

    #[test]
    fn get_missing_is_none() {
        let t = MemTable::new();
        assert_eq!(t.get(b"nope", 1).unwrap(), None);
    }

    #[test]
    fn expired_entry_reads_as_absent_and_is_reaped() {
        let t = MemTable::new();
        t.set(b"temp", b"x", 1000).unwrap();
        assert_eq!(t.get(b"temp", 999).unwrap().as_deref(), Some(&b"x"[..]));
        assert_eq!(t.get(b"temp", 1000).unwrap(), None);
        assert_eq!(t.len().unwrap(), 0);
    }

    #[test]
    fn set_overwrites_prior_expiration() {
        let t = MemTable::new();
        t.set(b"k", b"v1", 100).unwrap();
        t.set(b"k", b"v2", 0).unwrap();
        assert_eq!(t.get(b"k", 10_000).unwrap().as_deref(), Some(&b"v2"[..]));
    }

    #[test]
    fn del_reports_existence() {
        let t = MemTable::new();
        assert!(!t.del(b"k").unwrap());
        t.set(b"k", b"v", 0).unwrap();
        assert!(t.del(b"k").unwrap());
        assert!(!t.del(b"k").unwrap());
    }

    #[test]
    fn exists_matches_get_semantics() {
        let t = MemTable::new();
        t.set(b"k", b"v", 50).unwrap();
        assert!(t.exists(b"k", 49).unwrap());
        assert!(!t.exists(b"k", 50).unwrap());
    }

    #[test]
    fn expire_sets_ttl_on_live_key() {
        let t = MemTable::new();
        t.set(b"k", b"v", 0).unwrap();
        assert!(t.expire(b"k", 100, 10).unwrap());
        assert_eq!(t.get(b"k", 99).unwrap().as_deref(), Some(&b"v"[..]));
        assert_eq!(t.get(b"k", 100).unwrap(), None);
    }

    #[test]
    fn expire_on_missing_key_returns_false() {
        let t = MemTable::new();
        assert!(!t.expire(b"nope", 100, 10).unwrap());
    }

    #[test]
    fn expire_on_already_expired_key_reaps_and_returns_false() {
        let t = MemTable::new();
        t.set(b"k", b"v", 10).unwrap();
        assert!(!t.expire(b"k", 1000, 10).unwrap());
        assert_eq!(t.len().unwrap(), 0);
    }

    #[test]
    fn keys_prefix_and_sort() {
        let t = MemTable::new();
        t.set(b"alpha", b"a", 0).unwrap();
        t.set(b"alphabet", b"b", 0).unwrap();
        t.set(b"beta", b"c", 0).unwrap();
        assert_eq!(
            t.keys(b"alpha", 0).unwrap(),
            vec![b"alpha".to_vec(), b"alphabet".to_vec()]
        );
    }

    #[test]
    fn keys_empty_prefix_matches_all_sorted() {
        let t = MemTable::new();
        t.set(b"b", b"1", 0).unwrap();
        t.set(b"a", b"2", 0).unwrap();
        assert_eq!(t.keys(b"", 0).unwrap(), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn keys_no_match_is_empty() {
        let t = MemTable::new();
        t.set(b"a", b"1", 0).unwrap();
        assert!(t.keys(b"zzz", 0).unwrap().is_empty());
    }

    #[test]
    fn keys_prefix_longer_than_key_cannot_match() {
        let t = MemTable::new();
        t.set(b"ab", b"1", 0).unwrap();
        assert!(t.keys(b"abcdef", 0).unwrap().is_empty());
    }

    #[test]
    fn keys_skips_and_reaps_expired_entries() {
        let t = MemTable::new();
        t.set(b"a1", b"x", 10).unwrap();
        t.set(b"a2", b"y", 0).unwrap();
        assert_eq!(t.keys(b"a", 10).unwrap(), vec![b"a2".to_vec()]);
        assert_eq!(t.len().unwrap(), 1);
    }

    #[test]
    fn empty_value_is_legal() {
        let t = MemTable::new();
        t.set(b"k", b"", 0).unwrap();
        assert_eq!(t.get(b"k", 0).unwrap().as_deref(), Some(&b""[..]));
    }
}
