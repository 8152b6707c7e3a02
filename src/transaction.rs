//! Multi-input, multi-output transactions: spend one or more verified
//! tokens and mint fresh ones of equal total value, binding the two sides
//! together with an HMAC so a token can't be re-minted under a different
//! transaction than the one its owner actually authorized.

use std::collections::HashMap;

use ed25519_dalek::{Signature as EdSignature, Signer as _, SigningKey as EdSigningKey, Verifier as _, VerifyingKey as EdVerifyingKey};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use crate::blind::{blind_sign_request, unblind_signature};
use crate::cert::Signers;
use crate::curve::{CurveId, Point, Scalar};
use crate::error::{TransactionError, WireError};
use crate::server_params::unmarshal_public_server_params;
use crate::token::{verify_token, Token, TokenSignature, TokenWithSignatures};
use crate::wire::{length_decode, length_encode};

type HmacSha256 = Hmac<Sha256>;

const INPUTS_ENTRY: u16 = 1;
const OUTPUTS_ENTRY: u16 = 2;
const PROOFS_ENTRY: u16 = 3;
const HASHES_ENTRY: u16 = 4;
const TWS_ENTRY: u16 = 5;
const PROOF_ENTRY: u16 = 6;

/// Looks up (and lazily creates) the signer for whichever issuer handles a
/// `(currency, value)` pair. A production implementation talks to that
/// issuer over the network; [`crate::issuer::IssuerParamFactory`] is the
/// in-process default for single-issuer setups and tests.
pub trait ParamFactory: Send + Sync {
    fn get_params(&self, currency: &str, value: u64, now_unix: u64) -> Result<Vec<u8>, TransactionError>;
    fn sign(
        &self,
        currency: &str,
        value: u64,
        params_buf: &[u8],
        msg_blinded: &Scalar,
    ) -> Result<Scalar, TransactionError>;
    fn issuer_pub_key(&self, currency: &str, value: u64) -> Result<Point, TransactionError>;
}

/// Looks up a token owner's private key so its owner signature can be
/// produced while building a transaction.
pub trait KeyRing: Send + Sync {
    fn private_key_for(&self, owner: &EdVerifyingKey) -> Option<EdSigningKey>;
}

/// A process-local [`KeyRing`] backed by a `RwLock`-guarded map.
#[derive(Default)]
pub struct InMemoryKeyRing {
    keys: RwLock<HashMap<[u8; 32], EdSigningKey>>,
}

impl InMemoryKeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, signing_key: EdSigningKey) {
        self.keys
            .write()
            .insert(signing_key.verifying_key().to_bytes(), signing_key);
    }
}

impl KeyRing for InMemoryKeyRing {
    fn private_key_for(&self, owner: &EdVerifyingKey) -> Option<EdSigningKey> {
        self.keys.read().get(&owner.to_bytes()).cloned()
    }
}

/// Who controls a freshly minted output token.
#[derive(Debug, Clone)]
pub enum OutputOwner {
    NoOwner,
    SingleOwner(EdVerifyingKey),
    SplitOwner(EdVerifyingKey, EdVerifyingKey, u64),
}

/// A request to mint one new token of `value` under `currency`.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub currency: String,
    pub value: u64,
    pub owner: OutputOwner,
}

fn materialize_output(spec: &OutputSpec, rng: &mut (impl RngCore + CryptoRng)) -> Token {
    let mut random = [0u8; 32];
    rng.fill_bytes(&mut random);
    match &spec.owner {
        OutputOwner::NoOwner => Token::no_owner(random),
        OutputOwner::SingleOwner(owner) => Token::single_owner(random, *owner),
        OutputOwner::SplitOwner(first, second, cutoff) => {
            Token::split_owner(random, *first, *second, *cutoff)
        }
    }
}

const NO_OWNER_PLACEHOLDER: &[u8] = b"n/a";

/// An input's ownership authorization: a real Ed25519 signature over the
/// transaction hash, or the literal placeholder for a bearer token that
/// never had an owner to sign in the first place.
#[derive(Debug, Clone)]
pub enum TransactionProof {
    NoOwner,
    Signed(EdSignature),
}

impl TransactionProof {
    fn marshal(&self) -> Vec<u8> {
        match self {
            TransactionProof::NoOwner => NO_OWNER_PLACEHOLDER.to_vec(),
            TransactionProof::Signed(sig) => sig.to_bytes().to_vec(),
        }
    }

    fn unmarshal(buf: &[u8]) -> Result<Self, TransactionError> {
        if buf == NO_OWNER_PLACEHOLDER {
            return Ok(TransactionProof::NoOwner);
        }
        let sig: EdSignature = buf.try_into().map_err(|_| TransactionError::CorruptTransaction)?;
        Ok(TransactionProof::Signed(sig))
    }

    fn verify(&self, owner: Option<&EdVerifyingKey>, transaction_hash: &[u8; 32]) -> Result<(), TransactionError> {
        match (self, owner) {
            (TransactionProof::NoOwner, None) => Ok(()),
            (TransactionProof::Signed(_), None) => Err(TransactionError::SignatureNotEmpty),
            (TransactionProof::NoOwner, Some(_)) => Err(TransactionError::SignatureWrong),
            (TransactionProof::Signed(sig), Some(owner)) => {
                if owner.verify(transaction_hash, sig).is_ok() {
                    Ok(())
                } else {
                    Err(TransactionError::SignatureWrong)
                }
            }
        }
    }
}

struct TransactionInput {
    tws: TokenWithSignatures,
    value: u64,
    owner_at_now: Option<EdVerifyingKey>,
}

/// A transaction builder: accumulates inputs and outputs until they
/// balance, then mints the outputs once per configured issuer and collects
/// owner signatures.
pub struct Transaction<'a> {
    inputs: Vec<TransactionInput>,
    outputs: Vec<OutputSpec>,
    currency: Option<String>,
    input_value: u64,
    output_value: u64,
    key_ring: &'a dyn KeyRing,
    issuers: Vec<(EdVerifyingKey, &'a dyn ParamFactory)>,
}

impl<'a> Transaction<'a> {
    /// Builds a transaction that, once run, mints every output once for
    /// each entry in `issuers` — one [`IssuerTransaction`] per issuer.
    pub fn new(key_ring: &'a dyn KeyRing, issuers: Vec<(EdVerifyingKey, &'a dyn ParamFactory)>) -> Self {
        Transaction {
            inputs: Vec::new(),
            outputs: Vec::new(),
            currency: None,
            input_value: 0,
            output_value: 0,
            key_ring,
            issuers,
        }
    }

    fn check_currency(&mut self, currency: &str) -> Result<(), TransactionError> {
        match &self.currency {
            Some(c) if c != currency => Err(TransactionError::CurrencyMismatch),
            Some(_) => Ok(()),
            None => {
                self.currency = Some(currency.to_string());
                Ok(())
            }
        }
    }

    /// Adds a verified token as a spend input.
    pub fn add_input(
        &mut self,
        tws: TokenWithSignatures,
        signers: &Signers,
        now_unix: u64,
    ) -> Result<(), TransactionError> {
        let verified = verify_token(&tws, signers, now_unix)?;
        self.check_currency(&verified.currency)?;
        let owner_at_now = tws.token.signer(now_unix);
        self.input_value += verified.value;
        self.inputs.push(TransactionInput {
            tws,
            value: verified.value,
            owner_at_now,
        });
        Ok(())
    }

    /// Requests a new output token be minted. Fails immediately if it would
    /// push the output total above what's been deposited as inputs so far.
    pub fn add_output(&mut self, spec: OutputSpec) -> Result<(), TransactionError> {
        self.check_currency(&spec.currency)?;
        if self.output_value + spec.value > self.input_value {
            return Err(TransactionError::MissingValue);
        }
        self.output_value += spec.value;
        self.outputs.push(spec);
        Ok(())
    }

    pub fn get_balance(&self) -> i64 {
        self.input_value as i64 - self.output_value as i64
    }

    /// No-op once inputs and outputs balance; otherwise the transaction
    /// isn't ready to run yet.
    pub fn balance(&self) -> Result<(), TransactionError> {
        if self.input_value == self.output_value {
            Ok(())
        } else {
            Err(TransactionError::Unbalanced)
        }
    }

    /// Runs the transaction: checks every owned input's private key is
    /// available, binds inputs to outputs via an HMAC, collects per-input
    /// ownership proofs, then mints the (shared) set of outputs once per
    /// configured issuer, producing one independently verifiable
    /// [`IssuerTransaction`] per issuer.
    #[tracing::instrument(skip_all, fields(inputs = self.inputs.len(), outputs = self.outputs.len(), issuers = self.issuers.len()))]
    pub fn transact(
        self,
        now_unix: u64,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Vec<IssuerTransaction>, TransactionError> {
        self.balance()?;
        if self.issuers.is_empty() {
            return Err(TransactionError::ParamSource("no issuers configured".to_string()));
        }

        for input in &self.inputs {
            if let Some(owner) = &input.owner_at_now {
                if self.key_ring.private_key_for(owner).is_none() {
                    return Err(TransactionError::KeyUnavailable);
                }
            }
        }

        // Outputs are materialized once and multi-signed by every issuer
        // below, so every sub-transaction spends and mints the same tokens.
        let output_tokens: Vec<(OutputSpec, Token)> = self
            .outputs
            .iter()
            .map(|spec| (spec.clone(), materialize_output(spec, rng)))
            .collect();

        let token_list_hash = calculate_token_list_hash(self.inputs.iter().map(|i| &i.tws.token));
        let output_hash = calculate_output_hash(output_tokens.iter().map(|(_, t)| t));
        let transaction_hash = calc_hmac(&token_list_hash, &output_hash);

        let mut proofs = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            match &input.owner_at_now {
                None => proofs.push(TransactionProof::NoOwner),
                Some(owner) => {
                    let signing_key = self
                        .key_ring
                        .private_key_for(owner)
                        .ok_or(TransactionError::KeyUnavailable)?;
                    proofs.push(TransactionProof::Signed(signing_key.sign(&transaction_hash)));
                }
            }
        }

        let currency = self.currency.clone().unwrap_or_default();
        let mut issuer_transactions = Vec::with_capacity(self.issuers.len());
        for (issuer_identity, factory) in &self.issuers {
            let mut minted_outputs = Vec::with_capacity(output_tokens.len());
            let mut expects = Vec::with_capacity(output_tokens.len());
            for (spec, token) in &output_tokens {
                let params_buf = factory.get_params(&spec.currency, spec.value, now_unix)?;
                let public = unmarshal_public_server_params(&params_buf)
                    .map_err(|e| TransactionError::ParamSource(e.to_string()))?;

                let msg_hash = token.sha256();
                let (msg_blinded, m, n) = blind_sign_request(rng, &public.q, &msg_hash)
                    .map_err(|e| TransactionError::Wire(WireError::Curve(e)))?;
                let blind_sig = factory.sign(&spec.currency, spec.value, &params_buf, &msg_blinded)?;
                let (s, r) = unblind_signature(&public.q, &msg_hash, &blind_sig, &m, &n)
                    .map_err(|e| TransactionError::Wire(WireError::Curve(e)))?;
                let issuer_pub_key = factory.issuer_pub_key(&spec.currency, spec.value)?;

                minted_outputs.push(TokenWithSignatures {
                    token: *token,
                    signatures: vec![TokenSignature {
                        curve_id: CurveId::Nist256,
                        issuer_pub_key,
                        s,
                        r,
                    }],
                });
                expects.push((m, n));
            }

            // Carry over only this issuer's own signature on each input, if
            // it already has one, rather than every other issuer's too.
            let filtered_inputs: Vec<TokenWithSignatures> = self
                .inputs
                .iter()
                .map(|input| match factory.issuer_pub_key(&currency, input.value) {
                    Ok(issuer_pub_key) => input.tws.filter(&issuer_pub_key),
                    Err(_) => input.tws.clone(),
                })
                .collect();

            issuer_transactions.push(IssuerTransaction {
                issuer: *issuer_identity,
                expects,
                transaction: BinaryTransaction {
                    inputs: filtered_inputs,
                    outputs: minted_outputs,
                    proofs: proofs.clone(),
                    token_list_hash,
                    output_hash,
                    transaction_hash,
                },
                transaction_hash,
            });
        }

        Ok(issuer_transactions)
    }
}

/// One issuer's view of a completed transaction: the sub-`BinaryTransaction`
/// it co-signed, plus the blinding secrets retained for each output so the
/// builder (or a caller re-deriving this issuer's contribution) can recheck
/// the unblinding. Each `transaction` here is independently verifiable via
/// [`BinaryTransaction::verify`].
#[derive(Debug, Clone)]
pub struct IssuerTransaction {
    pub issuer: EdVerifyingKey,
    pub expects: Vec<(Scalar, Scalar)>,
    pub transaction: BinaryTransaction,
    pub transaction_hash: [u8; 32],
}

fn calculate_token_list_hash<'a>(tokens: impl Iterator<Item = &'a Token>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for token in tokens {
        hasher.update(token.sha256());
    }
    hasher.finalize().into()
}

fn calculate_output_hash<'a>(tokens: impl Iterator<Item = &'a Token>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for token in tokens {
        hasher.update(token.sha256());
    }
    hasher.finalize().into()
}

fn calc_hmac(key: &[u8; 32], msg: &[u8; 32]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// The outcome of a completed, wire-ready transaction: the spent inputs,
/// the minted outputs, the per-input ownership proofs, and the hashes that
/// bind them together.
#[derive(Debug, Clone)]
pub struct BinaryTransaction {
    pub inputs: Vec<TokenWithSignatures>,
    pub outputs: Vec<TokenWithSignatures>,
    proofs: Vec<TransactionProof>,
    token_list_hash: [u8; 32],
    output_hash: [u8; 32],
    transaction_hash: [u8; 32],
}

/// The outcome of successfully verifying a [`BinaryTransaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedTransaction {
    pub currency: String,
    pub value: u64,
}

impl BinaryTransaction {
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(length_encode(INPUTS_ENTRY, &marshal_tws_list(&self.inputs)));
        out.extend(length_encode(OUTPUTS_ENTRY, &marshal_tws_list(&self.outputs)));
        out.extend(length_encode(PROOFS_ENTRY, &marshal_proofs(&self.proofs)));
        let mut hashes = Vec::with_capacity(96);
        hashes.extend_from_slice(&self.token_list_hash);
        hashes.extend_from_slice(&self.output_hash);
        hashes.extend_from_slice(&self.transaction_hash);
        out.extend(length_encode(HASHES_ENTRY, &hashes));
        out
    }

    pub fn unmarshal(buf: &[u8]) -> Result<Self, TransactionError> {
        let (entry_type, inputs_bytes, rest) =
            length_decode(buf).map_err(|_| TransactionError::CorruptTransaction)?;
        if entry_type != INPUTS_ENTRY {
            return Err(TransactionError::CorruptTransaction);
        }
        let (entry_type, outputs_bytes, rest) =
            length_decode(rest).map_err(|_| TransactionError::CorruptTransaction)?;
        if entry_type != OUTPUTS_ENTRY {
            return Err(TransactionError::CorruptTransaction);
        }
        let (entry_type, proofs_bytes, rest) =
            length_decode(rest).map_err(|_| TransactionError::CorruptTransaction)?;
        if entry_type != PROOFS_ENTRY {
            return Err(TransactionError::CorruptTransaction);
        }
        let (entry_type, hashes_bytes, _rest) =
            length_decode(rest).map_err(|_| TransactionError::CorruptTransaction)?;
        if entry_type != HASHES_ENTRY || hashes_bytes.len() != 96 {
            return Err(TransactionError::CorruptTransaction);
        }

        let mut token_list_hash = [0u8; 32];
        let mut output_hash = [0u8; 32];
        let mut transaction_hash = [0u8; 32];
        token_list_hash.copy_from_slice(&hashes_bytes[0..32]);
        output_hash.copy_from_slice(&hashes_bytes[32..64]);
        transaction_hash.copy_from_slice(&hashes_bytes[64..96]);

        Ok(BinaryTransaction {
            inputs: unmarshal_tws_list(inputs_bytes)?,
            outputs: unmarshal_tws_list(outputs_bytes)?,
            proofs: unmarshal_proofs(proofs_bytes)?,
            token_list_hash,
            output_hash,
            transaction_hash,
        })
    }

    /// Verifies every input and output token, recomputes the binding
    /// hashes, checks every ownership proof, and finally checks value
    /// conservation across the whole transaction.
    #[tracing::instrument(skip_all, fields(inputs = self.inputs.len(), outputs = self.outputs.len()))]
    pub fn verify(&self, signers: &Signers, now_unix: u64) -> Result<VerifiedTransaction, TransactionError> {
        if self.proofs.len() != self.inputs.len() {
            return Err(TransactionError::CorruptTransaction);
        }

        let mut currency: Option<String> = None;
        let mut input_value = 0u64;
        for tws in &self.inputs {
            let verified = verify_token(tws, signers, now_unix)?;
            match &currency {
                None => currency = Some(verified.currency.clone()),
                Some(c) if c != &verified.currency => return Err(TransactionError::CurrencyMismatch),
                Some(_) => {}
            }
            input_value += verified.value;
        }

        let mut output_value = 0u64;
        for tws in &self.outputs {
            let verified = verify_token(tws, signers, now_unix)?;
            match &currency {
                None => currency = Some(verified.currency.clone()),
                Some(c) if c != &verified.currency => return Err(TransactionError::CurrencyMismatch),
                Some(_) => {}
            }
            output_value += verified.value;
        }

        let recomputed_token_list_hash = calculate_token_list_hash(self.inputs.iter().map(|t| &t.token));
        if recomputed_token_list_hash != self.token_list_hash {
            return Err(TransactionError::CorruptTransaction);
        }
        let recomputed_output_hash = calculate_output_hash(self.outputs.iter().map(|t| &t.token));
        if recomputed_output_hash != self.output_hash {
            return Err(TransactionError::CorruptTransaction);
        }
        let recomputed_transaction_hash = calc_hmac(&self.token_list_hash, &self.output_hash);
        if recomputed_transaction_hash != self.transaction_hash {
            return Err(TransactionError::CorruptTransaction);
        }

        for (tws, proof) in self.inputs.iter().zip(self.proofs.iter()) {
            let owner = tws.token.signer(now_unix);
            proof.verify(owner.as_ref(), &self.transaction_hash)?;
        }

        if input_value != output_value {
            return Err(TransactionError::Unbalanced);
        }

        Ok(VerifiedTransaction {
            currency: currency.unwrap_or_default(),
            value: output_value,
        })
    }
}

fn marshal_tws_list(list: &[TokenWithSignatures]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(list.len() as u32).to_be_bytes());
    for tws in list {
        out.extend(length_encode(TWS_ENTRY, &tws.marshal()));
    }
    out
}

fn unmarshal_tws_list(buf: &[u8]) -> Result<Vec<TokenWithSignatures>, TransactionError> {
    if buf.len() < 4 {
        return Err(TransactionError::CorruptTransaction);
    }
    let count = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let mut rest = &buf[4..];
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (entry_type, tws_bytes, tail) =
            length_decode(rest).map_err(|_| TransactionError::CorruptTransaction)?;
        if entry_type != TWS_ENTRY {
            return Err(TransactionError::CorruptTransaction);
        }
        out.push(TokenWithSignatures::unmarshal(tws_bytes)?);
        rest = tail;
    }
    Ok(out)
}

fn marshal_proofs(list: &[TransactionProof]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(list.len() as u32).to_be_bytes());
    for proof in list {
        out.extend(length_encode(PROOF_ENTRY, &proof.marshal()));
    }
    out
}

fn unmarshal_proofs(buf: &[u8]) -> Result<Vec<TransactionProof>, TransactionError> {
    if buf.len() < 4 {
        return Err(TransactionError::CorruptTransaction);
    }
    let count = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let mut rest = &buf[4..];
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (entry_type, proof_bytes, tail) =
            length_decode(rest).map_err(|_| TransactionError::CorruptTransaction)?;
        if entry_type != PROOF_ENTRY {
            return Err(TransactionError::CorruptTransaction);
        }
        out.push(TransactionProof::unmarshal(proof_bytes)?);
        rest = tail;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuer::{import_all_published, Issuer, IssuerOptions, IssuerParamFactory};
    use crate::server_params::InMemoryKeyManager;
    use rand::rngs::OsRng;

    fn setup_issuer() -> (Issuer, InMemoryKeyManager, crate::issuer::InMemoryKeyPublisher) {
        let identity = EdSigningKey::generate(&mut OsRng);
        (
            Issuer::new(identity, IssuerOptions::default()),
            InMemoryKeyManager::new(),
            crate::issuer::InMemoryKeyPublisher::new(),
        )
    }

    #[test]
    fn split_transaction_balances_and_verifies() {
        let (issuer, key_manager, key_publisher) = setup_issuer();
        let now = 1_700_000_000;

        let alice = EdSigningKey::generate(&mut OsRng);
        let bob = EdSigningKey::generate(&mut OsRng);
        let key_ring = InMemoryKeyRing::new();
        key_ring.add(alice.clone());

        let input_token = Token::single_owner([1u8; 32], alice.verifying_key());
        let input_tws = issuer
            .issue("USD", 1000, input_token, now, &key_manager, &key_publisher, &mut OsRng)
            .unwrap();

        let signers = Signers::new();
        import_all_published(&key_publisher, &issuer.identity(), &signers, now).unwrap();

        let factory = IssuerParamFactory::new(&issuer, &key_manager, &key_publisher);
        let mut tx = Transaction::new(&key_ring, vec![(issuer.identity(), &factory as &dyn ParamFactory)]);
        tx.add_input(input_tws, &signers, now).unwrap();
        tx.add_output(OutputSpec {
            currency: "USD".into(),
            value: 600,
            owner: OutputOwner::SingleOwner(bob.verifying_key()),
        })
        .unwrap();
        tx.add_output(OutputSpec {
            currency: "USD".into(),
            value: 400,
            owner: OutputOwner::SingleOwner(alice.verifying_key()),
        })
        .unwrap();
        tx.balance().unwrap();

        let issuer_txs = tx.transact(now, &mut OsRng).unwrap();
        assert_eq!(issuer_txs.len(), 1);
        let binary = &issuer_txs[0].transaction;
        let verified = binary.verify(&signers, now).unwrap();
        assert_eq!(verified.currency, "USD");
        assert_eq!(verified.value, 1000);

        let bytes = binary.marshal();
        let decoded = BinaryTransaction::unmarshal(&bytes).unwrap();
        decoded.verify(&signers, now).unwrap();
    }

    #[test]
    fn transact_fails_without_owners_private_key() {
        let (issuer, key_manager, key_publisher) = setup_issuer();
        let now = 1_700_000_000;

        let alice = EdSigningKey::generate(&mut OsRng);
        let key_ring = InMemoryKeyRing::new();

        let input_token = Token::single_owner([2u8; 32], alice.verifying_key());
        let input_tws = issuer
            .issue("USD", 1000, input_token, now, &key_manager, &key_publisher, &mut OsRng)
            .unwrap();
        let signers = Signers::new();
        import_all_published(&key_publisher, &issuer.identity(), &signers, now).unwrap();

        let factory = IssuerParamFactory::new(&issuer, &key_manager, &key_publisher);
        let mut tx = Transaction::new(&key_ring, vec![(issuer.identity(), &factory as &dyn ParamFactory)]);
        tx.add_input(input_tws, &signers, now).unwrap();
        tx.add_output(OutputSpec {
            currency: "USD".into(),
            value: 1000,
            owner: OutputOwner::NoOwner,
        })
        .unwrap();

        let err = tx.transact(now, &mut OsRng).unwrap_err();
        assert!(matches!(err, TransactionError::KeyUnavailable));
    }

    #[test]
    fn add_output_rejects_overspend() {
        let (issuer, key_manager, key_publisher) = setup_issuer();
        let now = 1_700_000_000;
        let key_ring = InMemoryKeyRing::new();
        let input_token = Token::no_owner([3u8; 32]);
        let input_tws = issuer
            .issue("USD", 100, input_token, now, &key_manager, &key_publisher, &mut OsRng)
            .unwrap();
        let signers = Signers::new();
        import_all_published(&key_publisher, &issuer.identity(), &signers, now).unwrap();

        let factory = IssuerParamFactory::new(&issuer, &key_manager, &key_publisher);
        let mut tx = Transaction::new(&key_ring, vec![(issuer.identity(), &factory as &dyn ParamFactory)]);
        tx.add_input(input_tws, &signers, now).unwrap();
        let err = tx
            .add_output(OutputSpec {
                currency: "USD".into(),
                value: 200,
                owner: OutputOwner::NoOwner,
            })
            .unwrap_err();
        assert!(matches!(err, TransactionError::MissingValue));
    }
}
