//! Issuer-side key lifecycle: one blind-signing keypair per `(currency,
//! value)` pair, created lazily on first use and certified the moment it's
//! minted.

use std::collections::HashMap;

use ed25519_dalek::SigningKey as EdSigningKey;
use parking_lot::Mutex;
use rand_core::{CryptoRng, RngCore};

use crate::blind::{blind_sign_request, unblind_signature, Signer as BlindSigner};
use crate::cert::{DbcCert, DbcCertSubject, Signers};
use crate::curve::{CurveId, Scalar};
use crate::error::IssuerError;
use crate::server_params::{
    decrypt_server_params, marshal_server_params, unmarshal_public_server_params, KeyManager,
};
use crate::token::{Token, TokenSignature, TokenWithSignatures};

/// Where a freshly minted [`DbcCert`] goes so clients can learn about it.
/// A real deployment publishes to a shared directory service; tests and
/// single-process demos use [`InMemoryKeyPublisher`].
pub trait KeyPublisher: Send + Sync {
    fn publish(&self, cert_bytes: &[u8]) -> Result<(), String>;
}

#[derive(Default)]
pub struct InMemoryKeyPublisher {
    published: Mutex<Vec<Vec<u8>>>,
}

impl InMemoryKeyPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_certs(&self) -> Vec<Vec<u8>> {
        self.published.lock().clone()
    }
}

impl KeyPublisher for InMemoryKeyPublisher {
    fn publish(&self, cert_bytes: &[u8]) -> Result<(), String> {
        self.published.lock().push(cert_bytes.to_vec());
        Ok(())
    }
}

fn format_currency_value(currency: &str, value: u64) -> String {
    format!("{}_{}", currency, hex::encode(value.to_be_bytes()))
}

/// Per-`(currency, value)` signer keys, created on first use and kept for
/// the life of the issuer. Guarded by a single mutex: contention is fine
/// here, creation is rare and lookups are cheap.
#[derive(Default)]
struct PrivateKeyRing {
    signers: Mutex<HashMap<String, BlindSigner>>,
}

impl PrivateKeyRing {
    /// Returns the signer for `(currency, value)`, creating and returning
    /// `true` for "newly created" if this is the first time it's been
    /// asked for.
    fn get_or_create(
        &self,
        currency: &str,
        value: u64,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> (BlindSigner, bool) {
        let key = format_currency_value(currency, value);
        let mut signers = self.signers.lock();
        if let Some(signer) = signers.get(&key) {
            return (*signer, false);
        }
        let signer = BlindSigner::generate(rng);
        signers.insert(key, signer);
        (signer, true)
    }
}

pub struct IssuerOptions {
    pub valid_duration_secs: u64,
}

impl Default for IssuerOptions {
    fn default() -> Self {
        IssuerOptions {
            valid_duration_secs: 365 * 24 * 60 * 60,
        }
    }
}

/// A minting authority: holds a long-term Ed25519 identity and lazily
/// mints and certifies a blind-signing keypair per `(currency, value)`.
pub struct Issuer {
    identity: EdSigningKey,
    options: IssuerOptions,
    key_ring: PrivateKeyRing,
}

impl Issuer {
    pub fn new(identity: EdSigningKey, options: IssuerOptions) -> Self {
        Issuer {
            identity,
            options,
            key_ring: PrivateKeyRing::default(),
        }
    }

    pub fn from_identity_bytes(bytes: &[u8; 32], options: IssuerOptions) -> Self {
        Issuer::new(EdSigningKey::from_bytes(bytes), options)
    }

    pub fn identity(&self) -> ed25519_dalek::VerifyingKey {
        self.identity.verifying_key()
    }

    fn sign_and_publish_cert_if_new(
        &self,
        currency: &str,
        value: u64,
        signer: &BlindSigner,
        is_new: bool,
        now_unix: u64,
        key_publisher: &impl KeyPublisher,
    ) -> Result<(), IssuerError> {
        if !is_new {
            return Ok(());
        }
        let subject = DbcCertSubject {
            currency: currency.to_string(),
            value,
            curve_id: CurveId::Nist256,
            dbc_pub_key: signer.public_key(),
            issuer_identity: self.identity.verifying_key(),
            valid_until_unix: now_unix + self.options.valid_duration_secs,
        };
        let cert = DbcCert::issue(subject, signer, &self.identity);
        key_publisher
            .publish(&cert.encode())
            .map_err(IssuerError::Publish)?;
        Ok(())
    }

    /// Round 1: produces an encrypted server-parameters envelope for a
    /// fresh signature under `(currency, value)`, minting and publishing
    /// the signer's certificate the first time it's asked for.
    pub fn get_params(
        &self,
        currency: &str,
        value: u64,
        now_unix: u64,
        key_manager: &impl KeyManager,
        key_publisher: &impl KeyPublisher,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Vec<u8>, IssuerError> {
        let (signer, is_new) = self.key_ring.get_or_create(currency, value, rng);
        self.sign_and_publish_cert_if_new(currency, value, &signer, is_new, now_unix, key_publisher)?;

        let (q, k) = signer.signature_params(rng)?;
        let buf = marshal_server_params(key_manager, rng, CurveId::Nist256, &q, &k)?;
        Ok(buf)
    }

    /// Decrypts a server-parameters envelope previously produced by
    /// [`Issuer::get_params`], recovering the per-signature secret `k`.
    pub fn decrypt_params(
        &self,
        key_manager: &impl KeyManager,
        buf: &[u8],
    ) -> Result<Scalar, IssuerError> {
        let public = unmarshal_public_server_params(buf).map_err(IssuerError::ServerParams)?;
        decrypt_server_params(key_manager, &public).map_err(IssuerError::ServerParams)
    }

    /// The long-term DBC public key for `(currency, value)`, creating the
    /// signer if it doesn't exist yet.
    pub fn signer_pub_key(
        &self,
        currency: &str,
        value: u64,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> crate::curve::Point {
        let (signer, _) = self.key_ring.get_or_create(currency, value, rng);
        signer.public_key()
    }

    /// Round 3: signs a client-blinded message for `(currency, value)`.
    #[tracing::instrument(skip(self, k, msg_blinded, rng))]
    pub fn sign(
        &self,
        currency: &str,
        value: u64,
        k: &Scalar,
        msg_blinded: &Scalar,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Scalar, IssuerError> {
        let (signer, _) = self.key_ring.get_or_create(currency, value, rng);
        Ok(signer.sign(k, msg_blinded)?)
    }

    /// Mints a single token locally end to end, without any wire
    /// transport: useful for tests and for sanity-checking a new issuer
    /// configuration.
    pub fn issue(
        &self,
        currency: &str,
        value: u64,
        token: Token,
        now_unix: u64,
        key_manager: &impl KeyManager,
        key_publisher: &impl KeyPublisher,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<TokenWithSignatures, IssuerError> {
        let params_buf = self.get_params(currency, value, now_unix, key_manager, key_publisher, rng)?;
        let public = unmarshal_public_server_params(&params_buf).map_err(IssuerError::ServerParams)?;

        let msg_hash = token.sha256();
        let (msg_blinded, m, n) = blind_sign_request(rng, &public.q, &msg_hash)?;

        let k = self.decrypt_params(key_manager, &params_buf)?;
        let blind_sig = self.sign(currency, value, &k, &msg_blinded, rng)?;

        let (s, r) = unblind_signature(&public.q, &msg_hash, &blind_sig, &m, &n)?;
        let (signer, _) = self.key_ring.get_or_create(currency, value, rng);

        Ok(TokenWithSignatures {
            token,
            signatures: vec![TokenSignature {
                curve_id: CurveId::Nist256,
                issuer_pub_key: signer.public_key(),
                s,
                r,
            }],
        })
    }
}

/// Adapts an [`Issuer`] to [`crate::transaction::ParamFactory`] for the
/// common case of a transaction spent against a single in-process issuer.
pub struct IssuerParamFactory<'a, KM: KeyManager, KP: KeyPublisher> {
    issuer: &'a Issuer,
    key_manager: &'a KM,
    key_publisher: &'a KP,
}

impl<'a, KM: KeyManager, KP: KeyPublisher> IssuerParamFactory<'a, KM, KP> {
    pub fn new(issuer: &'a Issuer, key_manager: &'a KM, key_publisher: &'a KP) -> Self {
        IssuerParamFactory {
            issuer,
            key_manager,
            key_publisher,
        }
    }
}

impl<'a, KM: KeyManager, KP: KeyPublisher> crate::transaction::ParamFactory for IssuerParamFactory<'a, KM, KP> {
    fn get_params(
        &self,
        currency: &str,
        value: u64,
        now_unix: u64,
    ) -> Result<Vec<u8>, crate::error::TransactionError> {
        self.issuer
            .get_params(currency, value, now_unix, self.key_manager, self.key_publisher, &mut rand::rngs::OsRng)
            .map_err(|e| crate::error::TransactionError::ParamSource(e.to_string()))
    }

    fn sign(
        &self,
        currency: &str,
        value: u64,
        params_buf: &[u8],
        msg_blinded: &Scalar,
    ) -> Result<Scalar, crate::error::TransactionError> {
        let k = self
            .issuer
            .decrypt_params(self.key_manager, params_buf)
            .map_err(|e| crate::error::TransactionError::ParamSource(e.to_string()))?;
        self.issuer
            .sign(currency, value, &k, msg_blinded, &mut rand::rngs::OsRng)
            .map_err(|e| crate::error::TransactionError::ParamSource(e.to_string()))
    }

    fn issuer_pub_key(&self, currency: &str, value: u64) -> Result<crate::curve::Point, crate::error::TransactionError> {
        Ok(self.issuer.signer_pub_key(currency, value, &mut rand::rngs::OsRng))
    }
}

/// Imports every cert an [`InMemoryKeyPublisher`] has published into
/// `signers`, trusting `issuer_identity` unconditionally. A convenience for
/// tests that wire an issuer straight to a verifier in the same process.
pub fn import_all_published(
    key_publisher: &InMemoryKeyPublisher,
    issuer_identity: &ed25519_dalek::VerifyingKey,
    signers: &Signers,
    now_unix: u64,
) -> Result<(), crate::error::CertError> {
    signers.add_known_issuer(issuer_identity);
    for cert_bytes in key_publisher.published_certs() {
        signers.import(&cert_bytes, now_unix)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::Signers;
    use crate::server_params::InMemoryKeyManager;
    use crate::token::verify_token;
    use rand::rngs::OsRng;

    #[test]
    fn issue_mints_a_token_verifiable_against_the_published_cert() {
        let identity = EdSigningKey::generate(&mut OsRng);
        let issuer = Issuer::new(identity, IssuerOptions::default());
        let key_manager = InMemoryKeyManager::new();
        let key_publisher = InMemoryKeyPublisher::new();

        let token = Token::no_owner([9u8; 32]);
        let tws = issuer
            .issue("USD", 500, token, 1_700_000_000, &key_manager, &key_publisher, &mut OsRng)
            .unwrap();

        let signers = Signers::new();
        import_all_published(&key_publisher, &issuer.identity(), &signers, 1_700_000_000).unwrap();

        let verified = verify_token(&tws, &signers, 1_700_000_000).unwrap();
        assert_eq!(verified.currency, "USD");
        assert_eq!(verified.value, 500);
    }

    #[test]
    fn get_params_only_publishes_cert_once_per_currency_value() {
        let identity = EdSigningKey::generate(&mut OsRng);
        let issuer = Issuer::new(identity, IssuerOptions::default());
        let key_manager = InMemoryKeyManager::new();
        let key_publisher = InMemoryKeyPublisher::new();

        for _ in 0..3 {
            issuer
                .get_params("USD", 500, 1_700_000_000, &key_manager, &key_publisher, &mut OsRng)
                .unwrap();
        }
        assert_eq!(key_publisher.published_certs().len(), 1);
    }
}
