//! The bearer token data model: a random identifier plus an ownership
//! claim, attested by one or more issuer signatures so a holder of
//! multiple issuers' currency can present a single token signed by all of
//! them.

use ed25519_dalek::VerifyingKey as EdVerifyingKey;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::blind::verify_signature;
use crate::cert::Signers;
use crate::curve::{CurveId, Point, Scalar};
use crate::error::{TokenError, WireError};
use crate::wire::{length_decode, length_encode};

const TOKEN_ENTRY: u16 = 1;
const SIGS_ENTRY: u16 = 2;
const SIG_ENTRY: u16 = 3;

/// Who can spend a token, and when ownership transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOwnerType {
    /// Bearer instrument: whoever holds the token owns it.
    NoOwner = 0,
    /// A single Ed25519 key must sign to spend it.
    SingleOwner = 1,
    /// `first_owner` can spend before `cut_off_time`, `second_owner` after.
    SplitOwner = 2,
}

impl TokenOwnerType {
    fn from_byte(b: u8) -> Result<Self, TokenError> {
        match b {
            0 => Ok(TokenOwnerType::NoOwner),
            1 => Ok(TokenOwnerType::SingleOwner),
            2 => Ok(TokenOwnerType::SplitOwner),
            _ => Err(TokenError::TokenFormat),
        }
    }
}

const ZERO_OWNER: [u8; 32] = [0u8; 32];

/// A bearer token: the unit that carries issuer signatures and is spent in
/// a [`crate::transaction::Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub random: [u8; 32],
    pub owner_type: TokenOwnerType,
    pub first_owner: Option<EdVerifyingKey>,
    pub second_owner: Option<EdVerifyingKey>,
    pub cut_off_time_unix: u64,
}

impl Token {
    pub fn no_owner(random: [u8; 32]) -> Self {
        Token {
            random,
            owner_type: TokenOwnerType::NoOwner,
            first_owner: None,
            second_owner: None,
            cut_off_time_unix: 0,
        }
    }

    pub fn single_owner(random: [u8; 32], owner: EdVerifyingKey) -> Self {
        Token {
            random,
            owner_type: TokenOwnerType::SingleOwner,
            first_owner: Some(owner),
            second_owner: None,
            cut_off_time_unix: 0,
        }
    }

    pub fn split_owner(
        random: [u8; 32],
        first_owner: EdVerifyingKey,
        second_owner: EdVerifyingKey,
        cut_off_time_unix: u64,
    ) -> Self {
        Token {
            random,
            owner_type: TokenOwnerType::SplitOwner,
            first_owner: Some(first_owner),
            second_owner: Some(second_owner),
            cut_off_time_unix,
        }
    }

    /// Validates the type/field invariants: which owner slots must be
    /// populated for each [`TokenOwnerType`].
    pub fn validate(&self) -> Result<(), TokenError> {
        match self.owner_type {
            TokenOwnerType::NoOwner => {
                if self.first_owner.is_some() || self.second_owner.is_some() {
                    return Err(TokenError::TokenFormat);
                }
            }
            TokenOwnerType::SingleOwner => {
                if self.first_owner.is_none() || self.second_owner.is_some() {
                    return Err(TokenError::TokenFormat);
                }
            }
            TokenOwnerType::SplitOwner => {
                if self.first_owner.is_none() || self.second_owner.is_none() {
                    return Err(TokenError::TokenFormat);
                }
                if self.cut_off_time_unix == 0 {
                    return Err(TokenError::TokenFormat);
                }
            }
        }
        Ok(())
    }

    /// The key that must sign to spend this token at `now_unix`, or `None`
    /// for a bearer ([`TokenOwnerType::NoOwner`]) token.
    pub fn signer(&self, now_unix: u64) -> Option<EdVerifyingKey> {
        match self.owner_type {
            TokenOwnerType::NoOwner => None,
            TokenOwnerType::SingleOwner => self.first_owner,
            TokenOwnerType::SplitOwner => {
                if now_unix < self.cut_off_time_unix {
                    self.first_owner
                } else {
                    self.second_owner
                }
            }
        }
    }

    pub fn sha256(&self) -> [u8; 32] {
        Sha256::digest(self.marshal()).into()
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 32 + 8 + 32 + 32);
        out.push(self.owner_type as u8);
        out.extend_from_slice(&self.random);
        out.extend_from_slice(&self.cut_off_time_unix.to_be_bytes());
        out.extend_from_slice(self.first_owner.as_ref().map(|k| k.as_bytes()).unwrap_or(&ZERO_OWNER));
        out.extend_from_slice(self.second_owner.as_ref().map(|k| k.as_bytes()).unwrap_or(&ZERO_OWNER));
        out
    }

    /// Decodes and validates the freshly decoded token. Unlike a careless
    /// port of the original, this never validates stale state left over on
    /// the receiver.
    pub fn unmarshal(buf: &[u8]) -> Result<Self, TokenError> {
        if buf.len() != 1 + 32 + 8 + 32 + 32 {
            return Err(TokenError::Wire(WireError::FormatSize));
        }
        let owner_type = TokenOwnerType::from_byte(buf[0])?;
        let mut random = [0u8; 32];
        random.copy_from_slice(&buf[1..33]);
        let cut_off_time_unix = u64::from_be_bytes(buf[33..41].try_into().unwrap());

        let first_raw = &buf[41..73];
        let second_raw = &buf[73..105];
        let first_owner = if first_raw == &ZERO_OWNER[..] {
            None
        } else {
            let bytes: [u8; 32] = first_raw.try_into().unwrap();
            Some(EdVerifyingKey::from_bytes(&bytes).map_err(|_| TokenError::TokenFormat)?)
        };
        let second_owner = if second_raw == &ZERO_OWNER[..] {
            None
        } else {
            let bytes: [u8; 32] = second_raw.try_into().unwrap();
            Some(EdVerifyingKey::from_bytes(&bytes).map_err(|_| TokenError::TokenFormat)?)
        };

        let token = Token {
            random,
            owner_type,
            first_owner,
            second_owner,
            cut_off_time_unix,
        };
        token.validate()?;
        Ok(token)
    }
}

/// One issuer's blind signature over a token. Carries no self-declared
/// currency or value: a verifier learns those only from the trusted
/// [`Signers`] entry resolved by `issuer_pub_key`, never from a claim the
/// signature makes about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSignature {
    pub curve_id: CurveId,
    pub issuer_pub_key: Point,
    pub s: Scalar,
    pub r: Point,
}

impl TokenSignature {
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.curve_id.to_byte());
        out.extend_from_slice(&self.issuer_pub_key.to_bytes_compressed());
        out.extend_from_slice(&self.s.to_bytes());
        out.extend_from_slice(&self.r.to_bytes_compressed());
        out
    }

    pub fn unmarshal(buf: &[u8]) -> Result<Self, TokenError> {
        if buf.is_empty() {
            return Err(TokenError::Wire(WireError::FormatSize));
        }
        let curve_id = CurveId::from_byte(buf[0]).ok_or(TokenError::TokenFormat)?;
        let mut offset = 1;

        let point_size = curve_id.point_size();
        let scalar_size = curve_id.scalar_size();
        if buf.len() != offset + point_size + scalar_size + point_size {
            return Err(TokenError::Wire(WireError::FormatSize));
        }
        let issuer_pub_key = Point::from_bytes_compressed(&buf[offset..offset + point_size])
            .map_err(|e| TokenError::Wire(WireError::Curve(e)))?;
        offset += point_size;
        let s = Scalar::from_bytes_canonical(&buf[offset..offset + scalar_size])
            .map_err(|e| TokenError::Wire(WireError::Curve(e)))?;
        offset += scalar_size;
        let r = Point::from_bytes_compressed(&buf[offset..offset + point_size])
            .map_err(|e| TokenError::Wire(WireError::Curve(e)))?;

        Ok(TokenSignature {
            curve_id,
            issuer_pub_key,
            s,
            r,
        })
    }
}

/// A token plus however many issuers have signed it so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenWithSignatures {
    pub token: Token,
    pub signatures: Vec<TokenSignature>,
}

impl TokenWithSignatures {
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(length_encode(TOKEN_ENTRY, &self.token.marshal()));
        out.extend(length_encode(SIGS_ENTRY, &marshal_signatures(&self.signatures)));
        out
    }

    pub fn unmarshal(buf: &[u8]) -> Result<Self, TokenError> {
        let (entry_type, token_bytes, rest) = length_decode(buf).map_err(TokenError::Wire)?;
        if entry_type != TOKEN_ENTRY {
            return Err(TokenError::TokenFormat);
        }
        let (entry_type, sigs_bytes, _rest) = length_decode(rest).map_err(TokenError::Wire)?;
        if entry_type != SIGS_ENTRY {
            return Err(TokenError::TokenFormat);
        }
        Ok(TokenWithSignatures {
            token: Token::unmarshal(token_bytes)?,
            signatures: unmarshal_signatures(sigs_bytes)?,
        })
    }

    /// Returns the subset of signatures from `issuer`, or the full set if
    /// `issuer` signed none of them (used when building per-issuer
    /// transaction requests against a token this issuer hasn't seen yet).
    pub fn filter(&self, issuer: &Point) -> TokenWithSignatures {
        let matching: Vec<TokenSignature> = self
            .signatures
            .iter()
            .filter(|s| &s.issuer_pub_key == issuer)
            .cloned()
            .collect();
        if matching.is_empty() {
            self.clone()
        } else {
            TokenWithSignatures {
                token: self.token,
                signatures: matching,
            }
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "token[{}] owner_type={:?} signatures={}",
            hex::encode(self.token.random),
            self.token.owner_type,
            self.signatures.len()
        )
    }
}

fn marshal_signatures(signatures: &[TokenSignature]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(signatures.len() as u32).to_be_bytes());
    for sig in signatures {
        out.extend(length_encode(SIG_ENTRY, &sig.marshal()));
    }
    out
}

fn unmarshal_signatures(buf: &[u8]) -> Result<Vec<TokenSignature>, TokenError> {
    if buf.len() < 4 {
        return Err(TokenError::Wire(WireError::FormatSize));
    }
    let count = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let mut rest = &buf[4..];
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (entry_type, sig_bytes, tail) = length_decode(rest).map_err(TokenError::Wire)?;
        if entry_type != SIG_ENTRY {
            return Err(TokenError::TokenFormat);
        }
        out.push(TokenSignature::unmarshal(sig_bytes)?);
        rest = tail;
    }
    Ok(out)
}

/// The outcome of successfully verifying a [`TokenWithSignatures`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub token: Token,
    pub currency: String,
    pub value: u64,
    pub signer_count: usize,
}

/// Verifies every signature against `signers`, skipping signatures that
/// fail cryptographic verification or come from an untrusted key, but
/// failing the whole token if two *accepted* signatures disagree on
/// currency or value. Requires at least one accepted signature.
///
/// `(currency, value)` for an accepted signature come from the trusted
/// [`Signers`] entry resolved by the signature's own public key, not from
/// any claim the signature makes about itself — a rogue or stale signature
/// can't assert a currency/value it was never certified for.
#[tracing::instrument(skip_all, fields(signatures = tws.signatures.len()))]
pub fn verify_token(
    tws: &TokenWithSignatures,
    signers: &Signers,
    now_unix: u64,
) -> Result<VerifiedToken, TokenError> {
    tws.token.validate()?;
    let token_hash = tws.token.sha256();

    let mut seen_keys: HashSet<Vec<u8>> = HashSet::new();
    let mut accepted: Option<(String, u64)> = None;
    let mut signer_count = 0usize;

    for sig in &tws.signatures {
        let key_bytes = sig.issuer_pub_key.to_bytes_compressed();
        if !seen_keys.insert(key_bytes) {
            continue;
        }

        let trusted = match signers.signer(&sig.issuer_pub_key, now_unix) {
            Some(entry) => entry,
            None => {
                tracing::warn!(
                    pub_key = %hex::encode(sig.issuer_pub_key.to_bytes_compressed()),
                    "skipping token signature from untrusted or expired signer"
                );
                continue;
            }
        };
        if !verify_signature(&sig.issuer_pub_key, &token_hash, &sig.s, &sig.r) {
            tracing::warn!(
                pub_key = %hex::encode(sig.issuer_pub_key.to_bytes_compressed()),
                "skipping token signature failing cryptographic verification"
            );
            continue;
        }

        match &accepted {
            None => accepted = Some(trusted),
            Some((currency, value)) => {
                if *currency != trusted.0 || *value != trusted.1 {
                    return Err(TokenError::MixedValues);
                }
            }
        }
        signer_count += 1;
    }

    let (currency, value) = accepted.ok_or(TokenError::UnSigned)?;
    Ok(VerifiedToken {
        token: tws.token,
        currency,
        value,
        signer_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blind::{blind_sign_request, unblind_signature, Signer as BlindSigner};
    use crate::cert::{DbcCert, DbcCertSubject};
    use ed25519_dalek::SigningKey as EdSigningKey;
    use rand::rngs::OsRng;

    fn mint_signature(token: &Token, signer: &BlindSigner) -> TokenSignature {
        let msg_hash = token.sha256();
        let (q, k) = signer.signature_params(&mut OsRng).unwrap();
        let (msg_blinded, m, n) = blind_sign_request(&mut OsRng, &q, &msg_hash).unwrap();
        let blind_sig = signer.sign(&k, &msg_blinded).unwrap();
        let (s, r) = unblind_signature(&q, &msg_hash, &blind_sig, &m, &n).unwrap();
        TokenSignature {
            curve_id: CurveId::Nist256,
            issuer_pub_key: signer.public_key(),
            s,
            r,
        }
    }

    fn trusted_signers_with(signer: &BlindSigner, currency: &str, value: u64) -> Signers {
        let signers = Signers::new();
        let issuer_identity = EdSigningKey::generate(&mut OsRng);
        signers.add_known_issuer(&issuer_identity.verifying_key());
        let subject = DbcCertSubject {
            currency: currency.into(),
            value,
            curve_id: CurveId::Nist256,
            dbc_pub_key: signer.public_key(),
            issuer_identity: issuer_identity.verifying_key(),
            valid_until_unix: 2_000_000_000,
        };
        let cert = DbcCert::issue(subject, signer, &issuer_identity);
        signers.import(&cert.encode(), 1_700_000_000).unwrap();
        signers
    }

    #[test]
    fn token_marshal_round_trips_for_every_owner_type() {
        let random = [7u8; 32];
        let owner = EdSigningKey::generate(&mut OsRng).verifying_key();
        let other = EdSigningKey::generate(&mut OsRng).verifying_key();

        for token in [
            Token::no_owner(random),
            Token::single_owner(random, owner),
            Token::split_owner(random, owner, other, 42),
        ] {
            let bytes = token.marshal();
            let back = Token::unmarshal(&bytes).unwrap();
            assert_eq!(token, back);
        }
    }

    #[test]
    fn split_owner_signer_depends_on_cutoff() {
        let owner = EdSigningKey::generate(&mut OsRng).verifying_key();
        let other = EdSigningKey::generate(&mut OsRng).verifying_key();
        let token = Token::split_owner([0u8; 32], owner, other, 100);
        assert_eq!(token.signer(50), Some(owner));
        assert_eq!(token.signer(150), Some(other));
    }

    #[test]
    fn verify_token_accepts_single_trusted_signature() {
        let signer = BlindSigner::generate(&mut OsRng);
        let signers = trusted_signers_with(&signer, "USD", 1000);
        let token = Token::no_owner([1u8; 32]);
        let sig = mint_signature(&token, &signer);
        let verified = verify_token(
            &TokenWithSignatures {
                token,
                signatures: vec![sig],
            },
            &signers,
            1_700_000_000,
        )
        .unwrap();
        assert_eq!(verified.currency, "USD");
        assert_eq!(verified.value, 1000);
        assert_eq!(verified.signer_count, 1);
    }

    #[test]
    fn verify_token_skips_untrusted_signature_but_accepts_others() {
        let trusted_signer = BlindSigner::generate(&mut OsRng);
        let rogue_signer = BlindSigner::generate(&mut OsRng);
        let signers = trusted_signers_with(&trusted_signer, "USD", 1000);
        let token = Token::no_owner([2u8; 32]);
        let good_sig = mint_signature(&token, &trusted_signer);
        let rogue_sig = mint_signature(&token, &rogue_signer);
        let verified = verify_token(
            &TokenWithSignatures {
                token,
                signatures: vec![rogue_sig, good_sig],
            },
            &signers,
            1_700_000_000,
        )
        .unwrap();
        assert_eq!(verified.signer_count, 1);
    }

    #[test]
    fn verify_token_rejects_mixed_values_among_accepted_signatures() {
        let signer_a = BlindSigner::generate(&mut OsRng);
        let signer_b = BlindSigner::generate(&mut OsRng);
        let signers_a = trusted_signers_with(&signer_a, "USD", 1000);
        let token = Token::no_owner([3u8; 32]);
        let sig_a = mint_signature(&token, &signer_a);
        let sig_b = mint_signature(&token, &signer_b);

        let issuer_b_identity = EdSigningKey::generate(&mut OsRng);
        signers_a.add_known_issuer(&issuer_b_identity.verifying_key());
        let subject_b = DbcCertSubject {
            currency: "EUR".into(),
            value: 500,
            curve_id: CurveId::Nist256,
            dbc_pub_key: signer_b.public_key(),
            issuer_identity: issuer_b_identity.verifying_key(),
            valid_until_unix: 2_000_000_000,
        };
        let cert_b = DbcCert::issue(subject_b, &signer_b, &issuer_b_identity);
        signers_a.import(&cert_b.encode(), 1_700_000_000).unwrap();

        let err = verify_token(
            &TokenWithSignatures {
                token,
                signatures: vec![sig_a, sig_b],
            },
            &signers_a,
            1_700_000_000,
        )
        .unwrap_err();
        assert_eq!(err, TokenError::MixedValues);
    }

    #[test]
    fn verify_token_rejects_no_accepted_signatures() {
        let signer = BlindSigner::generate(&mut OsRng);
        let signers = Signers::new();
        let token = Token::no_owner([4u8; 32]);
        let sig = mint_signature(&token, &signer);
        let err = verify_token(
            &TokenWithSignatures {
                token,
                signatures: vec![sig],
            },
            &signers,
            1_700_000_000,
        )
        .unwrap_err();
        assert_eq!(err, TokenError::UnSigned);
    }
}
