//! Signing pipeline: user intent → canonical signed submission payload.
//!
//! Message format (UTF-8, Ed25519-signed, signature Base58):
//!
//! ```text
//! public:        {from}:{to}:{amount}:{mint|SOL}:{nonce}
//! confidential:  {from}:{to}:confidential:{mint|SOL}:{nonce}
//! ```

use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use relay_types::{SubmitTransferRequest, TransferDetails, NATIVE_ASSET};

use crate::keys::{decode_address, Keypair};
use crate::SigningError;

/// A signed payload plus the fields callers keep for bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransfer {
    pub request: SubmitTransferRequest,
    /// `request` serialized, ready to be sent as-is.
    pub request_json: String,
    pub from_address: String,
    pub to_address: String,
    pub nonce: String,
    pub signature: String,
}

/// Build the canonical message the relayer verifies.
pub fn signing_message(
    from_address: &str,
    to_address: &str,
    details: &TransferDetails,
    token_mint: Option<&str>,
    nonce: &str,
) -> String {
    let amount = match details {
        TransferDetails::Public { amount } => amount.to_string(),
        TransferDetails::Confidential { .. } => "confidential".to_string(),
    };
    format!(
        "{}:{}:{}:{}:{}",
        from_address,
        to_address,
        amount,
        token_mint.unwrap_or(NATIVE_ASSET),
        nonce
    )
}

/// Sign a transfer with a Base58 secret key.
pub fn sign_transfer(
    secret_key: &str,
    to_address: &str,
    details: TransferDetails,
    token_mint: Option<&str>,
    nonce: &str,
) -> Result<SignedTransfer, SigningError> {
    let keypair = Keypair::from_base58(secret_key)?;
    sign_with_keypair(&keypair, to_address, details, token_mint, nonce)
}

/// Sign a transfer with an already-parsed keypair.
pub fn sign_with_keypair(
    keypair: &Keypair,
    to_address: &str,
    details: TransferDetails,
    token_mint: Option<&str>,
    nonce: &str,
) -> Result<SignedTransfer, SigningError> {
    if nonce.trim().is_empty() {
        return Err(SigningError::EmptyNonce);
    }
    decode_address(to_address)?;
    if let Some(mint) = token_mint {
        decode_address(mint)?;
    }

    let from_address = keypair.address();
    let message = signing_message(&from_address, to_address, &details, token_mint, nonce);
    let signature = keypair.signing_key().sign(message.as_bytes());
    let signature = bs58::encode(signature.to_bytes()).into_string();

    let request = SubmitTransferRequest {
        from_address: from_address.clone(),
        to_address: to_address.to_string(),
        transfer_details: details,
        token_mint: token_mint.map(str::to_string),
        nonce: nonce.to_string(),
        signature: signature.clone(),
    };
    let request_json =
        serde_json::to_string(&request).map_err(|e| SigningError::Serialization(e.to_string()))?;

    Ok(SignedTransfer {
        request,
        request_json,
        from_address,
        to_address: to_address.to_string(),
        nonce: nonce.to_string(),
        signature,
    })
}

/// Verify a payload's signature against its `from_address`.
pub fn verify_transfer(request: &SubmitTransferRequest) -> Result<(), SigningError> {
    let public_key = decode_address(&request.from_address)?;
    let verifying_key = VerifyingKey::from_bytes(&public_key)
        .map_err(|e| SigningError::InvalidAddress(e.to_string()))?;

    let sig_bytes = bs58::decode(&request.signature)
        .into_vec()
        .map_err(|e| SigningError::InvalidSignature(e.to_string()))?;
    let sig_bytes: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| SigningError::InvalidSignature("expected 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    let message = signing_message(
        &request.from_address,
        &request.to_address,
        &request.transfer_details,
        request.token_mint.as_deref(),
        &request.nonce,
    );
    verifying_key
        .verify(message.as_bytes(), &signature)
        .map_err(|e| SigningError::InvalidSignature(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_random_address;

    const NONCE: &str = "019470a4-7e7c-7d3e-8f1a-2b3c4d5e6f7a";

    #[test]
    fn test_sign_public_transfer() {
        let kp = Keypair::generate();
        let to = generate_random_address();
        let signed = sign_transfer(
            &kp.secret_base58(),
            &to,
            TransferDetails::public(1_000_000_000),
            None,
            NONCE,
        )
        .unwrap();

        assert_eq!(signed.from_address, kp.address());
        assert_eq!(signed.to_address, to);
        assert_eq!(signed.nonce, NONCE);
        assert_eq!(signed.request.signature, signed.signature);
        assert!(verify_transfer(&signed.request).is_ok());

        let parsed: SubmitTransferRequest = serde_json::from_str(&signed.request_json).unwrap();
        assert_eq!(parsed, signed.request);
    }

    #[test]
    fn test_message_format() {
        let details = TransferDetails::public(42);
        assert_eq!(signing_message("A", "B", &details, None, "n1"), "A:B:42:SOL:n1");
        assert_eq!(signing_message("A", "B", &details, Some("M"), "n1"), "A:B:42:M:n1");

        let confidential = TransferDetails::Confidential {
            new_decryptable_available_balance: "x".into(),
            equality_proof: "y".into(),
            ciphertext_validity_proof: "z".into(),
            range_proof: "w".into(),
        };
        assert_eq!(
            signing_message("A", "B", &confidential, None, "n1"),
            "A:B:confidential:SOL:n1"
        );
    }

    #[test]
    fn test_confidential_proofs_pass_through() {
        let kp = Keypair::generate();
        let details = TransferDetails::Confidential {
            new_decryptable_available_balance: "opaque-balance".into(),
            equality_proof: "opaque-eq".into(),
            ciphertext_validity_proof: "opaque-validity".into(),
            range_proof: "opaque-range".into(),
        };
        let signed = sign_with_keypair(
            &kp,
            &generate_random_address(),
            details.clone(),
            Some(&generate_random_address()),
            NONCE,
        )
        .unwrap();
        assert_eq!(signed.request.transfer_details, details);
        assert!(verify_transfer(&signed.request).is_ok());
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let kp = Keypair::generate();
        let mut signed = sign_with_keypair(
            &kp,
            &generate_random_address(),
            TransferDetails::public(10),
            None,
            NONCE,
        )
        .unwrap();
        signed.request.transfer_details = TransferDetails::public(11);
        assert!(matches!(
            verify_transfer(&signed.request),
            Err(SigningError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let kp = Keypair::generate();
        let to = generate_random_address();

        assert!(matches!(
            sign_with_keypair(&kp, &to, TransferDetails::public(1), None, "  "),
            Err(SigningError::EmptyNonce)
        ));
        assert!(matches!(
            sign_with_keypair(&kp, "not-an-address", TransferDetails::public(1), None, NONCE),
            Err(SigningError::InvalidAddress(_))
        ));
        assert!(matches!(
            sign_with_keypair(&kp, &to, TransferDetails::public(1), Some("bad"), NONCE),
            Err(SigningError::InvalidAddress(_))
        ));
        assert!(matches!(
            sign_transfer("garbage!", &to, TransferDetails::public(1), None, NONCE),
            Err(SigningError::InvalidSecretKey(_))
        ));
    }
}
