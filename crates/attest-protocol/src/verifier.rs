use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::Value;

use attest_schemas::Address;

use crate::envelope::{signing_bytes, Author, SignedEnvelope};
use crate::error::ProtocolError;

/// Host-ledger signature check over a decoded envelope.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, envelope: &SignedEnvelope) -> Result<(), ProtocolError>;
}

/// Ed25519 authors: each pubkey must hash to its declared address and sign
/// the canonical bytes of `signed_message`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, envelope: &SignedEnvelope) -> Result<(), ProtocolError> {
        if envelope.authors.is_empty() {
            return Err(ProtocolError::ValidationFailed("no authors".into()));
        }
        let message = signing_bytes(&envelope.signed_message);
        for (i, author) in envelope.authors.iter().enumerate() {
            verify_author(author, &message).map_err(|reason| {
                ProtocolError::ValidationFailed(format!("author {i}: {reason}"))
            })?;
        }
        Ok(())
    }
}

fn verify_author(author: &Author, message: &[u8]) -> Result<(), &'static str> {
    let key_bytes: [u8; 32] = BASE64
        .decode(&author.pubkey)
        .map_err(|_| "pubkey is not base64")?
        .try_into()
        .map_err(|_| "pubkey must be 32 bytes")?;
    let sig_bytes: [u8; 64] = BASE64
        .decode(&author.signature)
        .map_err(|_| "signature is not base64")?
        .try_into()
        .map_err(|_| "signature must be 64 bytes")?;

    if Address::from_public_key(&key_bytes).as_str() != author.address {
        return Err("pubkey does not own declared address");
    }

    let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| "invalid pubkey")?;
    let sig = Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(message, &sig)
        .map_err(|_| "bad signature")
}

/// Sign `signed_message` with one key, producing a single-author envelope.
pub fn sign_envelope(key: &SigningKey, signed_message: Value) -> SignedEnvelope {
    let public = key.verifying_key().to_bytes();
    let signature = key.sign(&signing_bytes(&signed_message));
    SignedEnvelope {
        authors: vec![Author {
            address: Address::from_public_key(&public).to_string(),
            pubkey: BASE64.encode(public),
            signature: BASE64.encode(signature.to_bytes()),
        }],
        signed_message,
    }
}
