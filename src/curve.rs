//! Scalar and point arithmetic over a pluggable elliptic curve.
//!
//! [`Scalar`] and [`Point`] wrap the underlying curve-crate types the same
//! way a production RustCrypto-backed library does: the newtype carries no
//! state of its own, it just narrows the public API to what the blind
//! signature protocol needs and keeps the curve crate out of downstream
//! signatures.

use elliptic_curve::ops::Reduce;
use elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use elliptic_curve::{Field, PrimeField};
use p256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint};
use rand_core::{CryptoRng, RngCore};

use crate::error::CurveError;

/// Which curve a blind-signature suite is instantiated over.
///
/// `Secp256k1` is reserved in the wire format but has no implementation yet;
/// selecting it is always [`CurveError::SuiteUnknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurveId {
    Nist256,
    Secp256k1,
}

impl CurveId {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(CurveId::Secp256k1),
            0x02 => Some(CurveId::Nist256),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            CurveId::Secp256k1 => 0x01,
            CurveId::Nist256 => 0x02,
        }
    }

    pub fn point_size(self) -> usize {
        33
    }

    pub fn scalar_size(self) -> usize {
        32
    }
}

/// The curve a component is configured to run the blind signature protocol
/// over. A thin wrapper around [`CurveId`] so call sites that just want
/// "the usual curve" don't spell out `CurveId::Nist256` themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CurveSuite {
    curve_id: CurveId,
}

impl CurveSuite {
    pub fn nist256() -> Self {
        CurveSuite {
            curve_id: CurveId::Nist256,
        }
    }

    pub fn curve_id(&self) -> CurveId {
        self.curve_id
    }

    pub fn point_size(&self) -> usize {
        self.curve_id.point_size()
    }

    pub fn scalar_size(&self) -> usize {
        self.curve_id.scalar_size()
    }
}

/// A scalar mod the curve order, i.e. a private key or a blinding factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scalar(p256::Scalar);

/// A point on the curve, i.e. a public key or a signature commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point(ProjectivePoint);

impl Scalar {
    pub fn zero() -> Self {
        Scalar(p256::Scalar::ZERO)
    }

    pub fn one() -> Self {
        Scalar(p256::Scalar::ONE)
    }

    pub fn is_zero(&self) -> bool {
        bool::from(Field::is_zero(&self.0))
    }

    pub fn is_one(&self) -> bool {
        self.0 == p256::Scalar::ONE
    }

    /// Samples a uniformly random nonzero scalar.
    pub fn random(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        loop {
            let s = p256::Scalar::random(&mut *rng);
            if !bool::from(Field::is_zero(&s)) {
                return Scalar(s);
            }
        }
    }

    /// Reduces a 32-byte value (e.g. a SHA-256 digest) mod the curve order.
    pub fn from_bytes_reduced(bytes: &[u8; 32]) -> Self {
        let fb = FieldBytes::clone_from_slice(bytes);
        Scalar(p256::Scalar::reduce_bytes(&fb))
    }

    /// Parses a canonical big-endian scalar, rejecting values >= the curve order.
    pub fn from_bytes_canonical(bytes: &[u8]) -> Result<Self, CurveError> {
        if bytes.len() != 32 {
            return Err(CurveError::SuiteUnknown);
        }
        let fb = FieldBytes::clone_from_slice(bytes);
        Option::from(p256::Scalar::from_repr(fb))
            .map(Scalar)
            .ok_or(CurveError::SuiteUnknown)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_repr().into()
    }

    pub fn add(&self, other: &Scalar) -> Scalar {
        Scalar(self.0 + other.0)
    }

    pub fn sub(&self, other: &Scalar) -> Scalar {
        Scalar(self.0 - other.0)
    }

    pub fn mul(&self, other: &Scalar) -> Scalar {
        Scalar(self.0 * other.0)
    }

    /// Modular inverse; only fails for the zero scalar, which never occurs
    /// on values produced by [`Scalar::random`].
    pub fn invert(&self) -> Option<Scalar> {
        Option::from(Field::invert(&self.0)).map(Scalar)
    }

    pub fn neg(&self) -> Scalar {
        Scalar(-self.0)
    }

    pub(crate) fn inner(&self) -> p256::Scalar {
        self.0
    }
}

impl Point {
    pub fn identity() -> Self {
        Point(ProjectivePoint::IDENTITY)
    }

    pub fn generator() -> Self {
        Point(ProjectivePoint::GENERATOR)
    }

    pub fn is_identity(&self) -> bool {
        bool::from(self.0.is_identity())
    }

    pub fn add(&self, other: &Point) -> Point {
        Point(self.0 + other.0)
    }

    /// Scalar multiplication of an arbitrary point.
    pub fn mul(&self, scalar: &Scalar) -> Point {
        Point(self.0 * scalar.inner())
    }

    /// Scalar multiplication of the base point; kept distinct from
    /// [`Point::mul`] because a production curve crate gives it a faster
    /// fixed-base path.
    pub fn mul_base(scalar: &Scalar) -> Point {
        Point(ProjectivePoint::GENERATOR * scalar.inner())
    }

    /// The x-coordinate of this point reduced mod the curve order, the `r`
    /// component of an ECDSA-style signature.
    pub fn extract_r(&self) -> Result<Scalar, CurveError> {
        let affine: AffinePoint = self.0.into();
        let encoded = affine.to_encoded_point(false);
        let x = encoded.x().ok_or(CurveError::SuiteUnknown)?;
        Ok(Scalar(p256::Scalar::reduce_bytes(x)))
    }

    /// SEC1 compressed encoding.
    pub fn to_bytes_compressed(&self) -> Vec<u8> {
        let affine: AffinePoint = self.0.into();
        affine.to_encoded_point(true).as_bytes().to_vec()
    }

    pub fn from_bytes_compressed(bytes: &[u8]) -> Result<Self, CurveError> {
        let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| CurveError::SuiteUnknown)?;
        let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
            .ok_or(CurveError::SuiteUnknown)?;
        Ok(Point(ProjectivePoint::from(affine)))
    }

    pub(crate) fn inner(&self) -> ProjectivePoint {
        self.0
    }
}

/// A fresh (private, public) scalar/point pair.
pub fn generate_keypair(rng: &mut (impl RngCore + CryptoRng)) -> (Scalar, Point) {
    let k = Scalar::random(rng);
    let q = Point::mul_base(&k);
    (k, q)
}
