//! A token bearing signatures from three issuers, only two of which the
//! verifier trusts, combined into one multi-signature token and spent in a
//! split transaction.

use dbc_core::cert::Signers;
use dbc_core::issuer::{import_all_published, Issuer, IssuerOptions, IssuerParamFactory, InMemoryKeyPublisher};
use dbc_core::server_params::InMemoryKeyManager;
use dbc_core::token::{Token, TokenWithSignatures};
use dbc_core::transaction::{InMemoryKeyRing, OutputOwner, OutputSpec, Transaction};
use ed25519_dalek::SigningKey as EdSigningKey;
use rand::rngs::OsRng;

#[test]
fn three_issuers_two_trusted_token_verifies_and_spends() {
    let now = 1_700_000_000;
    let token = Token::no_owner([42u8; 32]);

    let km1 = InMemoryKeyManager::new();
    let kp1 = InMemoryKeyPublisher::new();
    let issuer1 = Issuer::new(EdSigningKey::generate(&mut OsRng), IssuerOptions::default());

    let km2 = InMemoryKeyManager::new();
    let kp2 = InMemoryKeyPublisher::new();
    let issuer2 = Issuer::new(EdSigningKey::generate(&mut OsRng), IssuerOptions::default());

    let km3 = InMemoryKeyManager::new();
    let kp3 = InMemoryKeyPublisher::new();
    let issuer3 = Issuer::new(EdSigningKey::generate(&mut OsRng), IssuerOptions::default());

    let tws1 = issuer1.issue("EUR", 10, token, now, &km1, &kp1, &mut OsRng).unwrap();
    let tws2 = issuer2.issue("EUR", 10, token, now, &km2, &kp2, &mut OsRng).unwrap();
    // issuer3 signs the same token under the same currency/value, but the
    // verifier below never learns issuer3's identity.
    let tws3 = issuer3.issue("EUR", 10, token, now, &km3, &kp3, &mut OsRng).unwrap();

    let signers = Signers::new();
    import_all_published(&kp1, &issuer1.identity(), &signers, now).unwrap();
    import_all_published(&kp2, &issuer2.identity(), &signers, now).unwrap();
    // issuer3's cert is never imported and its identity is never marked known.

    let mut combined = TokenWithSignatures {
        token,
        signatures: tws1.signatures,
    };
    combined.signatures.extend(tws2.signatures);
    combined.signatures.extend(tws3.signatures);

    let verified = dbc_core::token::verify_token(&combined, &signers, now).unwrap();
    assert_eq!(verified.currency, "EUR");
    assert_eq!(verified.value, 10);
    assert_eq!(verified.signer_count, 2);

    // Spend the combined, doubly-signed token into two fresh bearer outputs,
    // re-signed by both trusted issuers.
    let key_ring = InMemoryKeyRing::new();
    let factory1 = IssuerParamFactory::new(&issuer1, &km1, &kp1);
    let factory2 = IssuerParamFactory::new(&issuer2, &km2, &kp2);
    let mut tx = Transaction::new(
        &key_ring,
        vec![
            (issuer1.identity(), &factory1 as &dyn dbc_core::transaction::ParamFactory),
            (issuer2.identity(), &factory2 as &dyn dbc_core::transaction::ParamFactory),
        ],
    );
    tx.add_input(combined, &signers, now).unwrap();
    tx.add_output(OutputSpec {
        currency: "EUR".into(),
        value: 3,
        owner: OutputOwner::NoOwner,
    })
    .unwrap();
    tx.add_output(OutputSpec {
        currency: "EUR".into(),
        value: 7,
        owner: OutputOwner::NoOwner,
    })
    .unwrap();
    tx.balance().unwrap();

    let issuer_txs = tx.transact(now, &mut OsRng).unwrap();
    assert_eq!(issuer_txs.len(), 2);
    for issuer_tx in &issuer_txs {
        issuer_tx.transaction.verify(&signers, now).unwrap();
    }
}

#[test]
fn untrusted_issuer_alone_leaves_token_unsigned() {
    let now = 1_700_000_000;
    let token = Token::no_owner([43u8; 32]);

    let km = InMemoryKeyManager::new();
    let kp = InMemoryKeyPublisher::new();
    let issuer = Issuer::new(EdSigningKey::generate(&mut OsRng), IssuerOptions::default());
    let tws = issuer.issue("EUR", 10, token, now, &km, &kp, &mut OsRng).unwrap();

    let signers = Signers::new();
    let err = dbc_core::token::verify_token(&tws, &signers, now).unwrap_err();
    assert_eq!(err, dbc_core::error::TokenError::UnSigned);
}
