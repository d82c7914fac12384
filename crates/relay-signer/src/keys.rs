//! Ed25519 keypairs and Base58 Solana addresses.
//!
//! Secret keys are accepted in the two formats wallets export:
//! - 32-byte seed
//! - 64-byte keypair (seed ‖ public key)
//!
//! Deterministic derivation: seed phrase → HKDF-SHA256 → 32-byte Ed25519 seed.

use ed25519_dalek::{SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::SigningError;

const HKDF_INFO: &str = "RelayClient.KeyGen";
const MIN_SEED_LEN: usize = 16;

/// A Solana-compatible Ed25519 keypair.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        Self {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    /// Parse a Base58 secret key (32-byte seed or 64-byte keypair).
    pub fn from_base58(secret_key: &str) -> Result<Self, SigningError> {
        let bytes = bs58::decode(secret_key.trim())
            .into_vec()
            .map_err(|e| SigningError::InvalidSecretKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        match bytes.len() {
            32 => {
                let seed: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| SigningError::InvalidSecretKey("invalid key length".into()))?;
                Ok(Self {
                    signing_key: SigningKey::from_bytes(&seed),
                })
            }
            64 => {
                let keypair: [u8; 64] = bytes
                    .try_into()
                    .map_err(|_| SigningError::InvalidSecretKey("invalid key length".into()))?;
                // Checks that the trailing half is the public key of the seed.
                let signing_key = SigningKey::from_keypair_bytes(&keypair)
                    .map_err(|_| SigningError::KeypairMismatch)?;
                Ok(Self { signing_key })
            }
            n => Err(SigningError::InvalidSecretKey(format!(
                "expected 32 or 64 bytes, got {}",
                n
            ))),
        }
    }

    /// Derive a keypair from a seed phrase and optional derivation index.
    ///
    /// The same `(seed, index)` always yields the same keypair.
    pub fn derive(seed: &str, index: Option<&str>) -> Result<Self, SigningError> {
        if seed.len() < MIN_SEED_LEN {
            return Err(SigningError::SeedTooShort(MIN_SEED_LEN));
        }

        let info = match index {
            Some(i) => format!("{}:{}", HKDF_INFO, i),
            None => HKDF_INFO.to_string(),
        };

        let hk = Hkdf::<Sha256>::new(None, seed.as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(info.as_bytes(), &mut okm)
            .map_err(|e| SigningError::KeyDerivation(e.to_string()))?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&okm),
        })
    }

    /// Base58 public key, i.e. the Solana address.
    pub fn address(&self) -> String {
        bs58::encode(self.signing_key.verifying_key().as_bytes()).into_string()
    }

    /// Base58 of the 64-byte keypair, the format `generate` hands to users.
    pub fn secret_base58(&self) -> String {
        bs58::encode(self.signing_key.to_keypair_bytes()).into_string()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Decode a Base58 address into its 32 raw bytes.
pub fn decode_address(address: &str) -> Result<[u8; 32], SigningError> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| SigningError::InvalidAddress(format!("{}: {}", address, e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        SigningError::InvalidAddress(format!("{}: expected 32 bytes, got {}", address, b.len()))
    })
}

pub fn is_valid_address(address: &str) -> bool {
    decode_address(address).is_ok()
}

/// A random address that nobody holds the key for. Useful for tests and demos.
pub fn generate_random_address() -> String {
    Keypair::generate().address()
}
