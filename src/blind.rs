//! Blind ECDSA: a signer issues a signature over a message it never sees in
//! the clear, and the client can prove the signature is valid without the
//! signer being able to link it back to the signing session.
//!
//! The protocol runs in the four rounds laid out by [`Signer::signature_params`]
//! (signer), [`blind_sign_request`] (client), [`Signer::sign`] (signer) and
//! [`unblind_signature`] (client), verified by [`verify_signature`].

use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::FieldBytes;
use rand_core::{CryptoRng, RngCore};

use crate::curve::{generate_keypair, Point, Scalar};
use crate::error::{BlindError, CurveError};

/// A long-term signer keypair.
#[derive(Clone, Copy)]
pub struct Signer {
    secret: Scalar,
    public: Point,
}

fn validate_scalar(s: &Scalar) -> bool {
    !s.is_zero() && !s.is_one()
}

fn validate_scalars(scalars: &[Scalar]) -> bool {
    scalars.iter().all(validate_scalar)
}

impl Signer {
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let (secret, public) = generate_keypair(rng);
        Signer { secret, public }
    }

    pub fn from_private_key(secret: Scalar) -> Self {
        let public = Point::mul_base(&secret);
        Signer { secret, public }
    }

    pub fn private_key(&self) -> Scalar {
        self.secret
    }

    pub fn public_key(&self) -> Point {
        self.public
    }

    /// Round 1: produces a fresh per-signature keypair `(Q, k)`. `Q` is
    /// published to the client, `k` stays with the signer until [`Signer::sign`].
    /// Retries until the commitment's extracted `r` avoids the degenerate
    /// 0/1 values.
    pub fn signature_params(
        &self,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<(Point, Scalar), BlindError> {
        loop {
            let (k, q) = generate_keypair(rng);
            let r1 = q.extract_r().map_err(BlindError::Curve)?;
            if validate_scalar(&r1) {
                return Ok((q, k));
            }
        }
    }

    /// Round 3: signs a client-blinded message using the per-signature
    /// secret `k` retained from round 1.
    pub fn sign(&self, k: &Scalar, msg_blinded: &Scalar) -> Result<Scalar, BlindError> {
        let q = Point::mul_base(k);
        let r1 = q.extract_r().map_err(BlindError::Curve)?;
        let t1 = self.secret.mul(&r1);
        let t2 = k.mul(msg_blinded);
        let res = t1.add(&t2);
        if !validate_scalars(&[res, t1, t2, self.secret, r1, *k, *msg_blinded]) {
            return Err(BlindError::InvalidRequest);
        }
        Ok(res)
    }

    /// Signs `msg` directly with the long-term key using plain ECDSA (P1363
    /// fixed-size signature), independent of the blind protocol. Used to
    /// self-sign the DBC signing key inside a certificate.
    pub fn ecdsa_sign(&self, msg: &[u8]) -> Vec<u8> {
        let field_bytes = FieldBytes::from(self.secret.to_bytes());
        let signing_key =
            SigningKey::from_bytes(&field_bytes).expect("nonzero scalar is always a valid signing key");
        let sig: Signature = signing_key.sign(msg);
        sig.to_bytes().to_vec()
    }
}

impl Point {
    /// Verifies a plain ECDSA signature produced by [`Signer::ecdsa_sign`].
    pub fn ecdsa_verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        let affine: p256::AffinePoint = self.inner().into();
        let verifying_key = match VerifyingKey::from_affine(affine) {
            Ok(k) => k,
            Err(_) => return false,
        };
        let signature: Signature = match sig.try_into() {
            Ok(s) => s,
            Err(_) => return false,
        };
        verifying_key.verify(msg, &signature).is_ok()
    }
}

/// Round 2: the client blinds `msg_hash` against the signer's published
/// per-signature public key `q`. Returns the blinded message to send to the
/// signer plus the two blinding secrets `m`/`n` the client must retain for
/// [`unblind_signature`].
pub fn blind_sign_request(
    rng: &mut (impl RngCore + CryptoRng),
    q: &Point,
    msg_hash: &[u8; 32],
) -> Result<(Scalar, [u8; 32], [u8; 32]), CurveError> {
    let (m_secret, m_public) = generate_keypair(rng);
    let (n_secret, n_public) = generate_keypair(rng);

    let msg = Scalar::from_bytes_reduced(msg_hash);
    let r1 = q.extract_r()?;
    let r = n_public.add(&q.mul(&m_secret));
    let r2 = r.extract_r()?;
    let r2i = r2.invert().ok_or(CurveError::SuiteUnknown)?;

    let msg_blinded = m_secret.mul(&msg).mul(&r1).mul(&r2i);
    let _ = m_public;
    Ok((msg_blinded, m_secret.to_bytes(), n_secret.to_bytes()))
}

/// Round 4: removes the blinding factors from the signer's response,
/// producing a signature `(s, r)` that verifies against `q` under
/// [`verify_signature`] without the signer ever seeing `msg_hash` or `s`
/// in the clear.
pub fn unblind_signature(
    q: &Point,
    msg_hash: &[u8; 32],
    blind_signature: &Scalar,
    m: &[u8; 32],
    n: &[u8; 32],
) -> Result<(Scalar, Point), CurveError> {
    let msg = Scalar::from_bytes_reduced(msg_hash);
    let r1 = q.extract_r()?;
    let r1i = r1.invert().ok_or(CurveError::SuiteUnknown)?;

    let m_secret = Scalar::from_bytes_canonical(m)?;
    let n_secret = Scalar::from_bytes_canonical(n)?;
    let n_public = Point::mul_base(&n_secret);

    let r = n_public.add(&q.mul(&m_secret));
    let r2 = r.extract_r()?;

    let s = blind_signature.mul(&r2).mul(&r1i).add(&n_secret.mul(&msg));
    Ok((s, r))
}

/// Verifies a signature produced by the blind protocol.
pub fn verify_signature(signer_public_key: &Point, msg_hash: &[u8; 32], s: &Scalar, r: &Point) -> bool {
    let msg = Scalar::from_bytes_reduced(msg_hash);
    let r2 = match r.extract_r() {
        Ok(r2) => r2,
        Err(_) => return false,
    };
    let lh = Point::mul_base(s);
    let rh = signer_public_key.mul(&r2).add(&r.mul(&msg));
    lh == rh
}
