//! Tagged, fixed-layout binary envelopes for everything that crosses a
//! process boundary, plus the generic length-prefixed container used to
//! nest one envelope inside another.
//!
//! Every envelope starts with a one-byte type tag and a one-byte curve id,
//! so a decoder can reject a mismatched envelope before it touches any
//! curve arithmetic.

use crate::curve::{CurveId, Point, Scalar};
use crate::error::WireError;

/// One-byte discriminants for the envelopes defined in this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    PubKey = 0x01,
    SigServerParams = 0x03,
    BlindRequestPublic = 0x04,
    BlindRequestPrivate = 0x05,
    BlindSignature = 0x06,
    Signature = 0x07,
}

impl Tag {
    fn expect(byte: u8, want: Tag) -> Result<(), WireError> {
        if byte == want as u8 {
            Ok(())
        } else {
            Err(WireError::Format)
        }
    }
}

const LENC_VERSION: u16 = 1;

/// Encodes `data` behind a `version:u16 | entry_type:u16 | length:u64`
/// header so a reader can skip an envelope it doesn't recognize.
pub fn length_encode(entry_type: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + data.len());
    out.extend_from_slice(&LENC_VERSION.to_be_bytes());
    out.extend_from_slice(&entry_type.to_be_bytes());
    out.extend_from_slice(&(data.len() as u64).to_be_bytes());
    out.extend_from_slice(data);
    out
}

/// Decodes a [`length_encode`]d buffer, returning `(entry_type, data, rest)`.
pub fn length_decode(buf: &[u8]) -> Result<(u16, &[u8], &[u8]), WireError> {
    if buf.len() < 12 {
        return Err(WireError::FormatSize);
    }
    let version = u16::from_be_bytes([buf[0], buf[1]]);
    if version != LENC_VERSION {
        return Err(WireError::Format);
    }
    let entry_type = u16::from_be_bytes([buf[2], buf[3]]);
    let length = u64::from_be_bytes(buf[4..12].try_into().unwrap()) as usize;
    let body = buf.get(12..).ok_or(WireError::FormatSize)?;
    if body.len() < length {
        return Err(WireError::FormatSize);
    }
    let (data, rest) = body.split_at(length);
    Ok((entry_type, data, rest))
}

fn curve_id_byte(curve_id: CurveId) -> u8 {
    curve_id.to_byte()
}

fn read_curve_id(byte: u8) -> Result<CurveId, WireError> {
    CurveId::from_byte(byte).ok_or(WireError::Format)
}

/// `tag(1) | curve_id(1) | point(point_size)`.
pub fn marshal_pub_key(curve_id: CurveId, q: &Point) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + curve_id.point_size());
    out.push(Tag::PubKey as u8);
    out.push(curve_id_byte(curve_id));
    out.extend_from_slice(&q.to_bytes_compressed());
    out
}

pub fn unmarshal_pub_key(buf: &[u8]) -> Result<(CurveId, Point), WireError> {
    if buf.len() < 2 {
        return Err(WireError::FormatSize);
    }
    Tag::expect(buf[0], Tag::PubKey)?;
    let curve_id = read_curve_id(buf[1])?;
    let point_bytes = &buf[2..];
    if point_bytes.len() != curve_id.point_size() {
        return Err(WireError::FormatSize);
    }
    let q = Point::from_bytes_compressed(point_bytes).map_err(WireError::Curve)?;
    Ok((curve_id, q))
}

/// `tag(1) | curve_id(1) | scalar(scalar_size)`.
pub fn marshal_blind_signature(curve_id: CurveId, s: &Scalar) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + curve_id.scalar_size());
    out.push(Tag::BlindSignature as u8);
    out.push(curve_id_byte(curve_id));
    out.extend_from_slice(&s.to_bytes());
    out
}

pub fn unmarshal_blind_signature(buf: &[u8]) -> Result<(CurveId, Scalar), WireError> {
    if buf.len() < 2 {
        return Err(WireError::FormatSize);
    }
    Tag::expect(buf[0], Tag::BlindSignature)?;
    let curve_id = read_curve_id(buf[1])?;
    let scalar_bytes = &buf[2..];
    if scalar_bytes.len() != curve_id.scalar_size() {
        return Err(WireError::FormatSize);
    }
    let s = Scalar::from_bytes_canonical(scalar_bytes).map_err(WireError::Curve)?;
    Ok((curve_id, s))
}

/// A final `(s, R)` signature: `tag(1) | curve_id(1) | s(scalar_size) | R(point_size)`.
pub fn marshal_signature(curve_id: CurveId, s: &Scalar, r: &Point) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + curve_id.scalar_size() + curve_id.point_size());
    out.push(Tag::Signature as u8);
    out.push(curve_id_byte(curve_id));
    out.extend_from_slice(&s.to_bytes());
    out.extend_from_slice(&r.to_bytes_compressed());
    out
}

pub fn unmarshal_signature(buf: &[u8]) -> Result<(CurveId, Scalar, Point), WireError> {
    if buf.len() < 2 {
        return Err(WireError::FormatSize);
    }
    Tag::expect(buf[0], Tag::Signature)?;
    let curve_id = read_curve_id(buf[1])?;
    let scalar_size = curve_id.scalar_size();
    let point_size = curve_id.point_size();
    if buf.len() != 2 + scalar_size + point_size {
        return Err(WireError::FormatSize);
    }
    let s = Scalar::from_bytes_canonical(&buf[2..2 + scalar_size]).map_err(WireError::Curve)?;
    let r = Point::from_bytes_compressed(&buf[2 + scalar_size..]).map_err(WireError::Curve)?;
    Ok((curve_id, s, r))
}

/// The public half of a signature request: the blinded message scalar the
/// client sends to the signer. `tag(1) | curve_id(1) | msg_blinded(scalar_size)`.
pub fn marshal_request_public(curve_id: CurveId, msg_blinded: &Scalar) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + curve_id.scalar_size());
    out.push(Tag::BlindRequestPublic as u8);
    out.push(curve_id_byte(curve_id));
    out.extend_from_slice(&msg_blinded.to_bytes());
    out
}

pub fn unmarshal_request_public(buf: &[u8]) -> Result<(CurveId, Scalar), WireError> {
    if buf.len() < 2 {
        return Err(WireError::FormatSize);
    }
    Tag::expect(buf[0], Tag::BlindRequestPublic)?;
    let curve_id = read_curve_id(buf[1])?;
    let scalar_bytes = &buf[2..];
    if scalar_bytes.len() != curve_id.scalar_size() {
        return Err(WireError::FormatSize);
    }
    let msg_blinded = Scalar::from_bytes_canonical(scalar_bytes).map_err(WireError::Curve)?;
    Ok((curve_id, msg_blinded))
}

/// The private half of a signature request: the two blinding secrets `(m, n)`
/// the client must retain to unblind the signer's response.
/// `tag(1) | curve_id(1) | m(scalar_size) | n(scalar_size)`.
pub fn marshal_request_private(curve_id: CurveId, m: &[u8; 32], n: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + curve_id.scalar_size() * 2);
    out.push(Tag::BlindRequestPrivate as u8);
    out.push(curve_id_byte(curve_id));
    out.extend_from_slice(m);
    out.extend_from_slice(n);
    out
}

pub fn unmarshal_request_private(buf: &[u8]) -> Result<(CurveId, [u8; 32], [u8; 32]), WireError> {
    if buf.len() < 2 {
        return Err(WireError::FormatSize);
    }
    Tag::expect(buf[0], Tag::BlindRequestPrivate)?;
    let curve_id = read_curve_id(buf[1])?;
    let scalar_size = curve_id.scalar_size();
    if buf.len() != 2 + scalar_size * 2 {
        return Err(WireError::FormatSize);
    }
    let mut m = [0u8; 32];
    let mut n = [0u8; 32];
    m.copy_from_slice(&buf[2..2 + scalar_size]);
    n.copy_from_slice(&buf[2 + scalar_size..]);
    Ok((curve_id, m, n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::generate_keypair;
    use rand::rngs::OsRng;

    #[test]
    fn pub_key_round_trips() {
        let (_, q) = generate_keypair(&mut OsRng);
        let buf = marshal_pub_key(CurveId::Nist256, &q);
        let (curve_id, q2) = unmarshal_pub_key(&buf).unwrap();
        assert_eq!(curve_id, CurveId::Nist256);
        assert_eq!(q, q2);
    }

    #[test]
    fn signature_round_trips() {
        let (s, _) = generate_keypair(&mut OsRng);
        let (_, r) = generate_keypair(&mut OsRng);
        let buf = marshal_signature(CurveId::Nist256, &s, &r);
        let (curve_id, s2, r2) = unmarshal_signature(&buf).unwrap();
        assert_eq!(curve_id, CurveId::Nist256);
        assert_eq!(s, s2);
        assert_eq!(r, r2);
    }

    #[test]
    fn wrong_tag_is_rejected() {
        let (_, q) = generate_keypair(&mut OsRng);
        let buf = marshal_pub_key(CurveId::Nist256, &q);
        assert!(unmarshal_blind_signature(&buf).is_err());
    }

    #[test]
    fn length_prefixed_container_round_trips_and_skips_rest() {
        let encoded = length_encode(7, b"hello");
        let mut combined = encoded.clone();
        combined.extend_from_slice(b"tail-data");
        let (entry_type, data, rest) = length_decode(&combined).unwrap();
        assert_eq!(entry_type, 7);
        assert_eq!(data, b"hello");
        assert_eq!(rest, b"tail-data");
    }
}
