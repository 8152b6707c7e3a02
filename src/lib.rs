//! Core cryptographic and data-model primitives for blind-signed digital
//! bearer certificates (DBCs): curve arithmetic, the blind ECDSA protocol,
//! encrypted server parameters, issuer key lifecycle, the token data
//! model, multi-input/multi-output transactions, and double-spend
//! prevention.
//!
//! Nothing in this crate talks to a network; callers wire the traits in
//! [`server_params`], [`transaction`] and [`spendbook`] to whatever
//! transport and storage their deployment uses.

pub mod blind;
pub mod cert;
pub mod curve;
pub mod error;
pub mod issuer;
pub mod server_params;
pub mod spendbook;
pub mod token;
pub mod transaction;
pub mod wire;

pub use error::DbcError;
