//! DBC certificates bind a `(currency, value)` pair to a dedicated ECDSA
//! signing keypair, attested twice over: once by the DBC key itself (proof
//! of possession) and once by the issuer's long-term Ed25519 identity.
//!
//! [`Signers`] is the directory a verifier consults to turn a certificate
//! into a trusted public key for a given `(currency, value)`.

use std::collections::{HashMap, HashSet};

use ed25519_dalek::{Signature as EdSignature, Signer as _, SigningKey as EdSigningKey, Verifier as _, VerifyingKey as EdVerifyingKey};
use parking_lot::RwLock;

use crate::curve::{CurveId, Point};
use crate::error::CertError;
use crate::wire::{length_decode, length_encode};

const SUBJECT_ENTRY: u16 = 1;
const DBC_SIG_ENTRY: u16 = 2;
const ISSUER_SIG_ENTRY: u16 = 3;

/// The attested claim: "this DBC public key, for this currency and value,
/// was minted by this issuer identity, valid until this time".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbcCertSubject {
    pub currency: String,
    pub value: u64,
    pub curve_id: CurveId,
    pub dbc_pub_key: Point,
    pub issuer_identity: EdVerifyingKey,
    pub valid_until_unix: u64,
}

impl DbcCertSubject {
    fn encode(&self) -> Vec<u8> {
        let currency_bytes = self.currency.as_bytes();
        let mut out = Vec::new();
        out.push(currency_bytes.len() as u8);
        out.extend_from_slice(currency_bytes);
        out.extend_from_slice(&self.value.to_be_bytes());
        out.push(self.curve_id.to_byte());
        out.extend_from_slice(&self.dbc_pub_key.to_bytes_compressed());
        out.extend_from_slice(self.issuer_identity.as_bytes());
        out.extend_from_slice(&self.valid_until_unix.to_be_bytes());
        out
    }

    fn decode(buf: &[u8]) -> Result<Self, CertError> {
        if buf.is_empty() {
            return Err(CertError::Format);
        }
        let currency_len = buf[0] as usize;
        let mut offset = 1;
        if buf.len() < offset + currency_len {
            return Err(CertError::Format);
        }
        let currency = String::from_utf8(buf[offset..offset + currency_len].to_vec())
            .map_err(|_| CertError::Format)?;
        offset += currency_len;

        if buf.len() < offset + 8 + 1 {
            return Err(CertError::Format);
        }
        let value = u64::from_be_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let curve_id = CurveId::from_byte(buf[offset]).ok_or(CertError::Format)?;
        offset += 1;

        let point_size = curve_id.point_size();
        if buf.len() < offset + point_size + 32 + 8 {
            return Err(CertError::Format);
        }
        let dbc_pub_key = Point::from_bytes_compressed(&buf[offset..offset + point_size])
            .map_err(|_| CertError::Format)?;
        offset += point_size;

        let mut id_bytes = [0u8; 32];
        id_bytes.copy_from_slice(&buf[offset..offset + 32]);
        let issuer_identity = EdVerifyingKey::from_bytes(&id_bytes).map_err(|_| CertError::Format)?;
        offset += 32;

        let valid_until_unix = u64::from_be_bytes(buf[offset..offset + 8].try_into().unwrap());

        Ok(DbcCertSubject {
            currency,
            value,
            curve_id,
            dbc_pub_key,
            issuer_identity,
            valid_until_unix,
        })
    }
}

/// A dual-signed certificate, ready to be handed to any holder of a token
/// signed by `subject.dbc_pub_key`.
#[derive(Debug, Clone)]
pub struct DbcCert {
    pub subject: DbcCertSubject,
    dbc_signature: Vec<u8>,
    issuer_signature: Vec<u8>,
}

impl DbcCert {
    /// Builds and dual-signs a new certificate. `dbc_signer` is the signer
    /// for the freshly minted `(currency, value)` keypair, self-attesting
    /// possession of its own private key; `issuer_identity` is the issuer's
    /// long-term Ed25519 identity.
    pub fn issue(
        subject: DbcCertSubject,
        dbc_signer: &crate::blind::Signer,
        issuer_identity: &EdSigningKey,
    ) -> Self {
        let subject_bytes = subject.encode();
        let dbc_signature = dbc_signer.ecdsa_sign(&subject_bytes);
        let issuer_signature = issuer_identity.sign(&subject_bytes).to_bytes().to_vec();
        DbcCert {
            subject,
            dbc_signature,
            issuer_signature,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let subject_bytes = self.subject.encode();
        let mut out = Vec::new();
        out.extend(length_encode(SUBJECT_ENTRY, &subject_bytes));
        out.extend(length_encode(DBC_SIG_ENTRY, &self.dbc_signature));
        out.extend(length_encode(ISSUER_SIG_ENTRY, &self.issuer_signature));
        out
    }

    /// Decodes and adversarially verifies both signatures. Does not check
    /// expiry or issuer trust; callers that need those checks go through
    /// [`Signers::import`].
    pub fn decode_and_verify(buf: &[u8]) -> Result<Self, CertError> {
        let (entry_type, subject_bytes, rest) = length_decode(buf)?;
        if entry_type != SUBJECT_ENTRY {
            return Err(CertError::Format);
        }
        let (entry_type, dbc_sig, rest) = length_decode(rest)?;
        if entry_type != DBC_SIG_ENTRY {
            return Err(CertError::Format);
        }
        let (entry_type, issuer_sig, _rest) = length_decode(rest)?;
        if entry_type != ISSUER_SIG_ENTRY {
            return Err(CertError::Format);
        }

        let subject = DbcCertSubject::decode(subject_bytes)?;

        if !subject.dbc_pub_key.ecdsa_verify(subject_bytes, dbc_sig) {
            return Err(CertError::DbcSignature);
        }
        let issuer_sig: EdSignature = issuer_sig.try_into().map_err(|_| CertError::Format)?;
        if subject
            .issuer_identity
            .verify(subject_bytes, &issuer_sig)
            .is_err()
        {
            return Err(CertError::IssuerSignature);
        }

        Ok(DbcCert {
            subject,
            dbc_signature: dbc_sig.to_vec(),
            issuer_signature: issuer_sig.to_bytes().to_vec(),
        })
    }
}

fn pub_key_hex(pub_key: &Point) -> String {
    hex::encode(pub_key.to_bytes_compressed())
}

#[derive(Debug, Clone)]
struct DbcSignerEntry {
    currency: String,
    value: u64,
    expiry_unix: u64,
}

/// The set of trusted issuer identities plus the DBC public keys they've
/// certified, keyed by `hex(dbc_pub_key)`. A verifier resolves a
/// [`crate::token::TokenSignature`] through the signature's own public key,
/// never through a self-declared `(currency, value)` pair, so two issuers
/// can never shadow each other even if they happen to mint under the same
/// `(currency, value)`.
#[derive(Default)]
pub struct Signers {
    signers: RwLock<HashMap<String, DbcSignerEntry>>,
    known_issuers: RwLock<HashSet<[u8; 32]>>,
}

impl Signers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_known_issuer(&self, identity: &EdVerifyingKey) {
        self.known_issuers.write().insert(identity.to_bytes());
    }

    pub fn is_known_issuer(&self, identity: &EdVerifyingKey) -> bool {
        self.known_issuers.read().contains(&identity.to_bytes())
    }

    /// Verifies `cert`, checks it hasn't expired and that its issuer is
    /// trusted, then records its `(currency, value)` under its DBC public
    /// key's hex encoding.
    pub fn import(&self, cert_bytes: &[u8], now_unix: u64) -> Result<(), CertError> {
        let cert = DbcCert::decode_and_verify(cert_bytes)?;
        if cert.subject.valid_until_unix <= now_unix {
            return Err(CertError::Expired);
        }
        if !self.is_known_issuer(&cert.subject.issuer_identity) {
            return Err(CertError::UnknownIssuer);
        }
        let key = pub_key_hex(&cert.subject.dbc_pub_key);
        self.signers.write().insert(
            key,
            DbcSignerEntry {
                currency: cert.subject.currency.clone(),
                value: cert.subject.value,
                expiry_unix: cert.subject.valid_until_unix,
            },
        );
        Ok(())
    }

    /// The trusted `(currency, value)` a given DBC public key was certified
    /// for, or `None` if the key is unknown or its certificate has expired.
    pub fn signer(&self, pub_key: &Point, now_unix: u64) -> Option<(String, u64)> {
        let key = pub_key_hex(pub_key);
        let signers = self.signers.read();
        let entry = signers.get(&key)?;
        if entry.expiry_unix <= now_unix {
            return None;
        }
        Some((entry.currency.clone(), entry.value))
    }
}
