//! Every token minted by a transaction gets a spend-book entry keyed on its
//! own 32-byte random identifier; redeeming the same token twice is
//! rejected by the spend-book, independent of the token signature checks
//! already covered in `transaction.rs`.

use dbc_core::cert::Signers;
use dbc_core::error::SpendBookError;
use dbc_core::issuer::{import_all_published, Issuer, IssuerOptions, InMemoryKeyPublisher};
use dbc_core::server_params::InMemoryKeyManager;
use dbc_core::spendbook::{is_token_spent, spend_token_if_unknown, SledSpendBook};
use dbc_core::token::{verify_token, Token};
use ed25519_dalek::SigningKey as EdSigningKey;
use rand::rngs::OsRng;

fn issuer_key_id(issuer_identity: &ed25519_dalek::VerifyingKey) -> [u8; 33] {
    let mut key_id = [0u8; 33];
    key_id[0] = 0x02;
    key_id[1..33].copy_from_slice(&issuer_identity.to_bytes());
    key_id
}

#[test]
fn redeeming_the_same_token_twice_is_rejected() {
    let now = 1_700_000_000;
    let dir = tempfile::tempdir().unwrap();
    let book = SledSpendBook::open(dir.path()).unwrap();

    let km = InMemoryKeyManager::new();
    let kp = InMemoryKeyPublisher::new();
    let issuer = Issuer::new(EdSigningKey::generate(&mut OsRng), IssuerOptions::default());
    let signers = Signers::new();

    let token = Token::no_owner([9u8; 32]);
    let tws = issuer.issue("USD", 25, token, now, &km, &kp, &mut OsRng).unwrap();
    import_all_published(&kp, &issuer.identity(), &signers, now).unwrap();

    let verified = verify_token(&tws, &signers, now).unwrap();
    let key_id = issuer_key_id(&issuer.identity());
    let unique_key = tws.token.random;
    let expiry = now + 1000;

    assert!(!is_token_spent(&book, &key_id, &unique_key).unwrap());

    spend_token_if_unknown(&book, &key_id, &unique_key, b"redeemed", expiry, now).unwrap();
    assert!(is_token_spent(&book, &key_id, &unique_key).unwrap());

    let err = spend_token_if_unknown(&book, &key_id, &unique_key, b"redeemed-again", expiry, now).unwrap_err();
    match err {
        SpendBookError::Spent(stored) => assert_eq!(stored, b"redeemed"),
        other => panic!("expected Spent, got {other:?}"),
    }

    let _ = verified.value;
}
