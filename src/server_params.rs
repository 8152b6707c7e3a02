//! The per-signature server parameters `(Q, k)` produced in round 1 of the
//! blind protocol, at rest: `k` is encrypted under a symmetric key the
//! signer keeps locally, so the envelope can be handed to the client (who
//! only ever sees `Q`) and later handed back to the signer to recover `k`
//! for [`crate::blind::Signer::sign`].

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use parking_lot::RwLock;
use rand_core::{CryptoRng, RngCore};
use std::collections::HashMap;

use crate::curve::{CurveId, Point, Scalar};
use crate::error::ServerParamsError;
use crate::wire::Tag;

const KEY_ID_SIZE: usize = 8;
const SYM_KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 24;

pub type KeyId = [u8; KEY_ID_SIZE];

/// Looks up and mints the symmetric keys that protect server parameter
/// envelopes. A real deployment backs this with an HSM or a sealed local
/// keystore; [`InMemoryKeyManager`] is the in-process default.
pub trait KeyManager: Send + Sync {
    fn new_key(&self, rng: &mut (impl RngCore + CryptoRng)) -> (KeyId, [u8; SYM_KEY_SIZE])
    where
        Self: Sized;
    fn get_key(&self, key_id: &KeyId) -> Option<[u8; SYM_KEY_SIZE]>;
}

/// A process-local [`KeyManager`] backed by a `RwLock`-guarded map. Keys
/// never leave the process and are lost on restart.
#[derive(Default)]
pub struct InMemoryKeyManager {
    keys: RwLock<HashMap<KeyId, [u8; SYM_KEY_SIZE]>>,
}

impl InMemoryKeyManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyManager for InMemoryKeyManager {
    fn new_key(&self, rng: &mut (impl RngCore + CryptoRng)) -> (KeyId, [u8; SYM_KEY_SIZE]) {
        let mut key_id = [0u8; KEY_ID_SIZE];
        let mut key = [0u8; SYM_KEY_SIZE];
        rng.fill_bytes(&mut key_id);
        rng.fill_bytes(&mut key);
        self.keys.write().insert(key_id, key);
        (key_id, key)
    }

    fn get_key(&self, key_id: &KeyId) -> Option<[u8; SYM_KEY_SIZE]> {
        self.keys.read().get(key_id).copied()
    }
}

/// Parsed envelope fields that any holder (client or signer) can read
/// without possessing the symmetric key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicServerParams {
    pub curve_id: CurveId,
    pub key_id: KeyId,
    pub q: Point,
    ciphertext: Vec<u8>,
    nonce: [u8; NONCE_SIZE],
    aad: Vec<u8>,
}

fn build_aad(curve_id: CurveId, key_id: &KeyId, q: &Point) -> Vec<u8> {
    let mut aad = Vec::with_capacity(2 + KEY_ID_SIZE + curve_id.point_size());
    aad.push(Tag::SigServerParams as u8);
    aad.push(curve_id.to_byte());
    aad.extend_from_slice(&q.to_bytes_compressed());
    aad.extend_from_slice(key_id);
    aad
}

/// Encrypts `k` and produces the wire envelope:
/// `tag(1) | curve_id(1) | Q(point_size) | key_id(8) | nonce(24) | ciphertext`.
pub fn marshal_server_params(
    key_manager: &impl KeyManager,
    rng: &mut (impl RngCore + CryptoRng),
    curve_id: CurveId,
    q: &Point,
    k: &Scalar,
) -> Result<Vec<u8>, ServerParamsError> {
    let (key_id, key_bytes) = key_manager.new_key(rng);
    let aad = build_aad(curve_id, &key_id, q);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce_bytes);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));
    let nonce = XNonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: &k.to_bytes(),
                aad: &aad,
            },
        )
        .map_err(|_| ServerParamsError::Aead)?;

    let mut out = aad;
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Parses the public fields of a server parameter envelope without
/// decrypting it. This is what the client sees and stores alongside `Q`.
pub fn unmarshal_public_server_params(buf: &[u8]) -> Result<PublicServerParams, ServerParamsError> {
    if buf.len() < 2 || buf[0] != Tag::SigServerParams as u8 {
        return Err(ServerParamsError::WrongBlindSuite);
    }
    let curve_id = CurveId::from_byte(buf[1]).ok_or(ServerParamsError::WrongBlindSuite)?;
    let point_size = curve_id.point_size();
    let header_len = 2 + point_size + KEY_ID_SIZE;
    if buf.len() < header_len + NONCE_SIZE {
        return Err(ServerParamsError::WrongBlindSuite);
    }

    let q = Point::from_bytes_compressed(&buf[2..2 + point_size])
        .map_err(|_| ServerParamsError::WrongBlindSuite)?;
    let mut key_id = [0u8; KEY_ID_SIZE];
    key_id.copy_from_slice(&buf[2 + point_size..header_len]);

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&buf[header_len..header_len + NONCE_SIZE]);
    let ciphertext = buf[header_len + NONCE_SIZE..].to_vec();
    let aad = buf[..header_len].to_vec();

    Ok(PublicServerParams {
        curve_id,
        key_id,
        q,
        ciphertext,
        nonce,
        aad,
    })
}

/// Decrypts the secret `k` from a previously-parsed envelope. Only the
/// signer that holds the symmetric key identified by `key_id` can do this.
pub fn decrypt_server_params(
    key_manager: &impl KeyManager,
    params: &PublicServerParams,
) -> Result<Scalar, ServerParamsError> {
    let key_bytes = key_manager
        .get_key(&params.key_id)
        .ok_or(ServerParamsError::KeyNotFound)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key_bytes));
    let nonce = XNonce::from_slice(&params.nonce);
    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &params.ciphertext,
                aad: &params.aad,
            },
        )
        .map_err(|_| ServerParamsError::Aead)?;
    let bytes: [u8; 32] = plaintext.try_into().map_err(|_| ServerParamsError::Aead)?;
    Scalar::from_bytes_canonical(&bytes).map_err(|_| ServerParamsError::Aead)
}

/// Convenience combining parse + decrypt for the signer's own envelopes.
pub fn unmarshal_my_server_params(
    key_manager: &impl KeyManager,
    buf: &[u8],
) -> Result<(Scalar, PublicServerParams), ServerParamsError> {
    let params = unmarshal_public_server_params(buf)?;
    let k = decrypt_server_params(key_manager, &params)?;
    Ok((k, params))
}
