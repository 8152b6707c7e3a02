//! Crate-wide error taxonomy.
//!
//! Each subsystem defines its own error enum; [`DbcError`] aggregates them at
//! the crate boundary so callers that don't care about the distinction can
//! match on a single type.

use thiserror::Error;

/// Errors from curve/scalar arithmetic and suite selection (component A/C).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CurveError {
    #[error("curve suite unknown for this curve id")]
    SuiteUnknown,
    #[error("entropy source failed to produce a value")]
    Random,
}

/// Errors from the blind ECDSA protocol (component B).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum BlindError {
    #[error("blind signing request contains dangerous scalar values")]
    InvalidRequest,
    #[error(transparent)]
    Curve(#[from] CurveError),
}

/// Errors from binary envelope decoding (component C).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum WireError {
    #[error("wrong type tag for this envelope")]
    Format,
    #[error("envelope length does not match the expected size")]
    FormatSize,
    #[error(transparent)]
    Curve(#[from] CurveError),
}

/// Errors from the encrypted server-parameter envelope (component D).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ServerParamsError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("no symmetric key registered for this key id")]
    KeyNotFound,
    #[error("AEAD seal/open failed")]
    Aead,
    #[error("entropy source failed to produce a nonce")]
    Random,
    #[error("blind suite of the envelope does not match the expected suite")]
    WrongBlindSuite,
}

/// Errors from DBC certificates and the signer directory (component E).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CertError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("DBC signing-key self-signature failed verification (adversarial)")]
    DbcSignature,
    #[error("issuer identity signature failed verification (adversarial)")]
    IssuerSignature,
    #[error("certificate has expired")]
    Expired,
    #[error("issuer identity is not in the known-issuers set")]
    UnknownIssuer,
    #[error("malformed certificate encoding")]
    Format,
}

/// Errors from the token data model and multi-signature verification (component F).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum TokenError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Blind(#[from] BlindError),
    #[error("token violates its type invariants")]
    TokenFormat,
    #[error("token carries no accepted signatures")]
    UnSigned,
    #[error("operation requires a verified token")]
    NotVerified,
    #[error("accepted signatures disagree on currency or value")]
    MixedValues,
    #[error("requested issuer did not sign this token")]
    IssuerNotFound,
}

/// Errors from issuer key lifecycle and minting (component G).
#[derive(Debug, Error, Clone)]
pub enum IssuerError {
    #[error(transparent)]
    Curve(#[from] CurveError),
    #[error(transparent)]
    Blind(#[from] BlindError),
    #[error(transparent)]
    ServerParams(#[from] ServerParamsError),
    #[error(transparent)]
    Cert(#[from] CertError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("blind suite of the decrypted parameters does not match the issuer's suite")]
    WrongBlindSuite,
    #[error("curve id mismatch between two envelopes of the same exchange")]
    CurveMismatch,
    #[error("failed to publish newly minted DBC certificate: {0}")]
    Publish(String),
}

/// Errors from the transaction engine (component H).
#[derive(Debug, Error, Clone)]
pub enum TransactionError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Blind(#[from] BlindError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("remaining input value does not cover the requested output value")]
    MissingValue,
    #[error("transaction inputs and outputs do not balance to zero")]
    Unbalanced,
    #[error("transaction encoding is corrupt")]
    CorruptTransaction,
    #[error("transaction mixes more than one currency")]
    CurrencyMismatch,
    #[error("owner signature should have been the empty placeholder")]
    SignatureNotEmpty,
    #[error("owner signature failed verification")]
    SignatureWrong,
    #[error("server parameter source unavailable for issuer: {0}")]
    ParamSource(String),
    #[error("private key unavailable for token owner")]
    KeyUnavailable,
}

/// Errors from the spend-book adapter (component I).
#[derive(Debug, Error, Clone)]
pub enum SpendBookError {
    /// The key was already present; carries the value stored at first write.
    #[error("value already spent")]
    Spent(Vec<u8>),
    #[error("underlying key/value store failed: {0}")]
    Store(String),
}

/// Aggregate error type for consumers that don't need per-subsystem detail.
#[derive(Debug, Error)]
pub enum DbcError {
    #[error(transparent)]
    Curve(#[from] CurveError),
    #[error(transparent)]
    Blind(#[from] BlindError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    ServerParams(#[from] ServerParamsError),
    #[error(transparent)]
    Cert(#[from] CertError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Issuer(#[from] IssuerError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    SpendBook(#[from] SpendBookError),
}
