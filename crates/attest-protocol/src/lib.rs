//! attest-protocol
//!
//! Signed-message verification protocol and inbound message routing.
//!
//! An inbound message may carry a `(signed-message:<base64>)` block. The
//! protocol decodes it, authenticates every author, checks that the signer
//! owns the claimed address and that the signed data matches the order, and
//! only then claims issuance, calls the issuer and finalizes the order.

mod claim;
mod envelope;
mod error;
mod inbound;
mod issuance;
mod protocol;
mod reply;
mod verifier;

pub use claim::{ownership_phrase, parse_claim, Claim, OWNERSHIP_PREFIX};
pub use envelope::{
    decode_envelope, encode_envelope, extract_signed_block, format_signed_block, signing_bytes,
    Author, SignedEnvelope,
};
pub use error::ProtocolError;
pub use inbound::InboundRouter;
pub use issuance::IssuanceService;
pub use protocol::{ProtocolOutcome, VerificationProtocol};
pub use reply::Reply;
pub use verifier::{sign_envelope, Ed25519Verifier, SignatureVerifier};
