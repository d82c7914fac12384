//! Local signing for relayer submissions.
//!
//! - `keys`: Ed25519 keypairs, Base58 addresses, seed derivation
//! - `signing`: canonical message + signed submission payload
//! - `nonce`: time-ordered idempotency keys

use thiserror::Error;

pub mod keys;
pub mod nonce;
pub mod signing;

pub use keys::{decode_address, generate_random_address, is_valid_address, Keypair};
pub use nonce::{Nonce, NonceGenerator};
pub use signing::{sign_transfer, sign_with_keypair, signing_message, verify_transfer, SignedTransfer};

/// Signing failures. No partial payload is ever produced alongside one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("secret key does not match its embedded public key")]
    KeypairMismatch,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("nonce must not be empty")]
    EmptyNonce,

    #[error("seed too short: minimum {0} characters required")]
    SeedTooShort(usize),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("failed to serialize payload: {0}")]
    Serialization(String),
}
