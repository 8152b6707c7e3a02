//! Every public envelope in [`dbc_core::wire`] round-trips through its own
//! marshal/unmarshal pair, and a client/signer pair can carry a full blind
//! signature exchange entirely through these envelopes (no direct struct
//! sharing between the two sides).

use dbc_core::blind::{blind_sign_request, unblind_signature, verify_signature, Signer};
use dbc_core::curve::CurveId;
use dbc_core::wire::{
    marshal_blind_signature, marshal_pub_key, marshal_request_private, marshal_request_public,
    marshal_signature, unmarshal_blind_signature, unmarshal_pub_key, unmarshal_request_private,
    unmarshal_request_public, unmarshal_signature,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

#[test]
fn blind_signature_exchange_carried_entirely_over_the_wire_format() {
    let signer = Signer::generate(&mut OsRng);
    let signer_pub_key_buf = marshal_pub_key(CurveId::Nist256, &signer.public_key());

    let (q, k) = signer.signature_params(&mut OsRng).unwrap();
    let q_buf = marshal_pub_key(CurveId::Nist256, &q);

    // Client side: only ever sees q_buf, never k.
    let (client_curve_id, client_q) = unmarshal_pub_key(&q_buf).unwrap();
    assert_eq!(client_curve_id, CurveId::Nist256);

    let msg_hash: [u8; 32] = Sha256::digest(b"redeem 10 eur").into();
    let (msg_blinded, m, n) = blind_sign_request(&mut OsRng, &client_q, &msg_hash).unwrap();
    let request_buf = marshal_request_public(CurveId::Nist256, &msg_blinded);
    let private_buf = marshal_request_private(CurveId::Nist256, &m, &n);

    // Signer side: receives only request_buf, retains k from round 1.
    let (_, msg_blinded_on_wire) = unmarshal_request_public(&request_buf).unwrap();
    let blind_sig = signer.sign(&k, &msg_blinded_on_wire).unwrap();
    let blind_sig_buf = marshal_blind_signature(CurveId::Nist256, &blind_sig);

    // Client side: unblinds using the private half it kept locally.
    let (_, blind_sig_on_wire) = unmarshal_blind_signature(&blind_sig_buf).unwrap();
    let (_, m_on_wire, n_on_wire) = unmarshal_request_private(&private_buf).unwrap();
    let (s, r) = unblind_signature(&client_q, &msg_hash, &blind_sig_on_wire, &m_on_wire, &n_on_wire).unwrap();
    let signature_buf = marshal_signature(CurveId::Nist256, &s, &r);

    // Anyone holding signer_pub_key_buf and signature_buf can verify.
    let (_, signer_public_key) = unmarshal_pub_key(&signer_pub_key_buf).unwrap();
    let (_, s_on_wire, r_on_wire) = unmarshal_signature(&signature_buf).unwrap();
    assert!(verify_signature(&signer_public_key, &msg_hash, &s_on_wire, &r_on_wire));
}
