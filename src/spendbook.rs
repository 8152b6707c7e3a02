//! Double-spend prevention: an idempotent "spend this unique key, once"
//! store with a bounded retention window, backed by an embedded database
//! so a single process can run this without an external dependency.

use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::error::SpendBookError;

/// Extra margin added to every TTL to absorb clock skew between the node
/// that computed an expiry and the node running garbage collection.
pub const SKEW_SAFETY_SECS: u64 = 30 * 24 * 60 * 60;

/// Tunables for the background GC sweep, kept as a plain struct rather than
/// a bare [`Duration`] so a deployment can grow further knobs without
/// breaking [`SledSpendBook::run_gc_service`]'s signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendBookConfig {
    pub gc_interval: Duration,
}

impl Default for SpendBookConfig {
    fn default() -> Self {
        SpendBookConfig {
            gc_interval: Duration::from_secs(60 * 60),
        }
    }
}

pub fn calc_ttl(expiry_unix: u64, now_unix: u64) -> u64 {
    expiry_unix.saturating_sub(now_unix) + SKEW_SAFETY_SECS
}

/// Which namespace a spend key belongs to. DBC token spends and server
/// parameter spends must never share a byte, or a param key could collide
/// with and shadow a token key computed from the same unique bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendEntryType {
    Token,
    Param,
}

impl SpendEntryType {
    fn byte(self) -> u8 {
        match self {
            SpendEntryType::Token => b't',
            SpendEntryType::Param => b'p',
        }
    }
}

/// `key_id(33) | entry_type(1) | SHA-256(unique_key)(30)`.
fn make_key(key_id: &[u8; 33], entry_type: SpendEntryType, unique_key: &[u8]) -> [u8; 64] {
    let digest = Sha256::digest(unique_key);
    let mut key = [0u8; 64];
    key[0..33].copy_from_slice(key_id);
    key[33] = entry_type.byte();
    key[34..64].copy_from_slice(&digest[0..30]);
    key
}

/// Idempotent "spend once" storage, keyed by an opaque unique value with a
/// TTL. [`SledSpendBook`] is the embedded-database default.
pub trait SpendBook: Send + Sync {
    /// Records `unique_key` as spent with the given `value` attached,
    /// unless it was already spent, in which case the originally stored
    /// value comes back in [`SpendBookError::Spent`].
    fn spend_if_unknown(
        &self,
        key_id: &[u8; 33],
        entry_type: SpendEntryType,
        unique_key: &[u8],
        value: &[u8],
        expiry_unix: u64,
        now_unix: u64,
    ) -> Result<(), SpendBookError>;

    fn is_spent(
        &self,
        key_id: &[u8; 33],
        entry_type: SpendEntryType,
        unique_key: &[u8],
    ) -> Result<bool, SpendBookError>;
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn encode_entry(expires_at_unix: u64, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + value.len());
    out.extend_from_slice(&expires_at_unix.to_be_bytes());
    out.extend_from_slice(value);
    out
}

fn decode_entry(bytes: &[u8]) -> Option<(u64, &[u8])> {
    if bytes.len() < 8 {
        return None;
    }
    let expires_at = u64::from_be_bytes(bytes[0..8].try_into().ok()?);
    Some((expires_at, &bytes[8..]))
}

/// A [`SpendBook`] backed by `sled`. `sled` has no native per-key TTL, so
/// expiry is modeled explicitly: every value is stored with its expiry
/// timestamp, and a background thread periodically sweeps expired keys.
pub struct SledSpendBook {
    db: sled::Db,
    stop_tx: Option<mpsc::Sender<()>>,
    gc_handle: Option<JoinHandle<()>>,
}

impl SledSpendBook {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SpendBookError> {
        let db = sled::open(path).map_err(|e| SpendBookError::Store(e.to_string()))?;
        Ok(SledSpendBook {
            db,
            stop_tx: None,
            gc_handle: None,
        })
    }

    /// Starts a background thread that sweeps expired entries on the
    /// interval set in `config`, until [`SledSpendBook::close`] is called or
    /// the book is dropped.
    pub fn run_gc_service(self: Arc<Self>, config: SpendBookConfig) -> GcHandle {
        let (stop_tx, stop_rx) = mpsc::channel();
        let book = self.clone();
        let handle = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(config.gc_interval) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    book.gc_run();
                }
            }
        });
        GcHandle {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Removes every entry whose expiry has already passed.
    #[tracing::instrument(skip_all)]
    pub fn gc_run(&self) {
        let now = now_unix();
        let mut expired = Vec::new();
        for item in self.db.iter() {
            let Ok((key, value)) = item else { continue };
            if let Some((expires_at, _)) = decode_entry(&value) {
                if expires_at <= now {
                    expired.push(key);
                }
            }
        }
        let removed = expired.len();
        for key in expired {
            if let Err(e) = self.db.remove(key) {
                tracing::error!(error = %e, "failed to remove expired spend-book entry");
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "spend-book gc sweep complete");
        }
    }

    pub fn close(&self) -> Result<(), SpendBookError> {
        self.db.flush().map_err(|e| SpendBookError::Store(e.to_string()))?;
        Ok(())
    }
}

/// Handle to a running GC background thread; dropping or explicitly
/// stopping it joins the thread.
pub struct GcHandle {
    stop_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl GcHandle {
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl SpendBook for SledSpendBook {
    fn spend_if_unknown(
        &self,
        key_id: &[u8; 33],
        entry_type: SpendEntryType,
        unique_key: &[u8],
        value: &[u8],
        expiry_unix: u64,
        now_unix_arg: u64,
    ) -> Result<(), SpendBookError> {
        let key = make_key(key_id, entry_type, unique_key);
        let expires_at = now_unix_arg + calc_ttl(expiry_unix, now_unix_arg);
        let new_entry = encode_entry(expires_at, value);

        let result = self
            .db
            .compare_and_swap(key, None as Option<&[u8]>, Some(new_entry))
            .map_err(|e| SpendBookError::Store(e.to_string()))?;

        match result {
            Ok(()) => Ok(()),
            Err(existing) => {
                let stored = decode_entry(&existing.current.unwrap_or_default())
                    .map(|(_, v)| v.to_vec())
                    .unwrap_or_default();
                Err(SpendBookError::Spent(stored))
            }
        }
    }

    fn is_spent(
        &self,
        key_id: &[u8; 33],
        entry_type: SpendEntryType,
        unique_key: &[u8],
    ) -> Result<bool, SpendBookError> {
        let key = make_key(key_id, entry_type, unique_key);
        self.db
            .contains_key(key)
            .map_err(|e| SpendBookError::Store(e.to_string()))
    }
}

/// Marks a token unique key as spent under its issuer's key id.
pub fn spend_token_if_unknown(
    book: &impl SpendBook,
    key_id: &[u8; 33],
    token_unique_key: &[u8],
    value: &[u8],
    expiry_unix: u64,
    now_unix: u64,
) -> Result<(), SpendBookError> {
    book.spend_if_unknown(key_id, SpendEntryType::Token, token_unique_key, value, expiry_unix, now_unix)
}

pub fn is_token_spent(
    book: &impl SpendBook,
    key_id: &[u8; 33],
    token_unique_key: &[u8],
) -> Result<bool, SpendBookError> {
    book.is_spent(key_id, SpendEntryType::Token, token_unique_key)
}

/// Marks a server-parameter unique key as spent (a client reusing the same
/// per-signature parameters twice). Kept in the `Param` namespace so it can
/// never collide with a token spend record.
pub fn spend_param_if_unknown(
    book: &impl SpendBook,
    key_id: &[u8; 33],
    param_unique_key: &[u8],
    value: &[u8],
    expiry_unix: u64,
    now_unix: u64,
) -> Result<(), SpendBookError> {
    book.spend_if_unknown(key_id, SpendEntryType::Param, param_unique_key, value, expiry_unix, now_unix)
}

pub fn is_param_spent(
    book: &impl SpendBook,
    key_id: &[u8; 33],
    param_unique_key: &[u8],
) -> Result<bool, SpendBookError> {
    book.is_spent(key_id, SpendEntryType::Param, param_unique_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_book() -> (SledSpendBook, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let book = SledSpendBook::open(dir.path()).unwrap();
        (book, dir)
    }

    #[test]
    fn spend_if_unknown_is_idempotent() {
        let (book, _dir) = temp_book();
        let key_id = [1u8; 33];
        book.spend_if_unknown(&key_id, SpendEntryType::Token, b"unique-1", b"first", 2_000_000_000, 1_700_000_000)
            .unwrap();
        let err = book
            .spend_if_unknown(&key_id, SpendEntryType::Token, b"unique-1", b"second", 2_000_000_000, 1_700_000_000)
            .unwrap_err();
        match err {
            SpendBookError::Spent(stored) => assert_eq!(stored, b"first"),
            _ => panic!("expected Spent"),
        }
    }

    #[test]
    fn token_and_param_namespaces_never_collide() {
        let (book, _dir) = temp_book();
        let key_id = [2u8; 33];
        spend_token_if_unknown(&book, &key_id, b"same-bytes", b"token-value", 2_000_000_000, 1_700_000_000).unwrap();
        // Same unique bytes, different namespace: must not be seen as already spent.
        spend_param_if_unknown(&book, &key_id, b"same-bytes", b"param-value", 2_000_000_000, 1_700_000_000).unwrap();
        assert!(is_token_spent(&book, &key_id, b"same-bytes").unwrap());
        assert!(is_param_spent(&book, &key_id, b"same-bytes").unwrap());
    }

    #[test]
    fn is_spent_is_false_before_any_spend() {
        let (book, _dir) = temp_book();
        let key_id = [3u8; 33];
        assert!(!is_token_spent(&book, &key_id, b"never-spent").unwrap());
    }

    #[test]
    fn gc_run_removes_expired_entries() {
        let (book, _dir) = temp_book();
        let key_id = [4u8; 33];
        // expiry_unix = 0, now_unix = 0 stores expires_at = SKEW_SAFETY_SECS,
        // which is already far in the past relative to gc_run's real
        // wall-clock `now`, so this entry must be swept.
        book.spend_if_unknown(&key_id, SpendEntryType::Token, b"stale", b"v", 0, 0).unwrap();
        book.spend_if_unknown(&key_id, SpendEntryType::Token, b"fresh", b"v", 4_000_000_000, 1_700_000_000)
            .unwrap();
        book.gc_run();
        assert!(!is_token_spent(&book, &key_id, b"stale").unwrap());
        assert!(is_token_spent(&book, &key_id, b"fresh").unwrap());
    }
}
