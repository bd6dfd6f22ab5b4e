//! Claim parsing for a verified `signed_message`.

use serde_json::Value;

use attest_schemas::{Address, AttributeSet};

use crate::error::ProtocolError;

/// Canonical ownership phrase; the address follows the prefix.
pub const OWNERSHIP_PREFIX: &str = "I own the address:";

pub fn ownership_phrase(address: &Address) -> String {
    format!("{OWNERSHIP_PREFIX} {address}")
}

/// What a signed message asserts.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub address: Address,
    pub data: Option<AttributeSet>,
    pub provider: Option<String>,
}

/// Interpret `signed_message`: either the ownership phrase as a bare string
/// or an object `{message?, data?, provider?}`. Without a message the
/// claimed address is the signer's own.
pub fn parse_claim(
    signed_message: &Value,
    signer: &Address,
    max_attributes: usize,
) -> Result<Claim, ProtocolError> {
    match signed_message {
        Value::String(message) => Ok(Claim {
            address: parse_ownership(message)?,
            data: None,
            provider: None,
        }),
        Value::Object(obj) => {
            let address = match obj.get("message") {
                None | Some(Value::Null) => signer.clone(),
                Some(Value::String(m)) => parse_ownership(m)?,
                Some(_) => {
                    return Err(ProtocolError::InvalidFormat("message must be a string".into()))
                }
            };
            let data = match obj.get("data") {
                None | Some(Value::Null) => None,
                Some(v) => Some(AttributeSet::from_json(v, max_attributes)?),
            };
            let provider = match obj.get("provider") {
                None | Some(Value::Null) => None,
                Some(Value::String(p)) if !p.trim().is_empty() => Some(p.trim().to_string()),
                Some(_) => {
                    return Err(ProtocolError::InvalidFormat(
                        "provider must be a non-empty string".into(),
                    ))
                }
            };
            Ok(Claim {
                address,
                data,
                provider,
            })
        }
        _ => Err(ProtocolError::InvalidFormat(
            "signed_message must be a string or an object".into(),
        )),
    }
}

fn parse_ownership(message: &str) -> Result<Address, ProtocolError> {
    let rest = message
        .trim()
        .strip_prefix(OWNERSHIP_PREFIX)
        .ok_or_else(|| ProtocolError::InvalidFormat("message is not an ownership claim".into()))?;
    Address::parse(rest.trim())
        .map_err(|e| ProtocolError::InvalidFormat(format!("claimed address is invalid: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signer() -> Address {
        Address::from_public_key(&[5u8; 32])
    }

    #[test]
    fn bare_phrase_yields_address() {
        let a = Address::from_public_key(&[6u8; 32]);
        let c = parse_claim(&json!(ownership_phrase(&a)), &signer(), 4).unwrap();
        assert_eq!(c.address, a);
        assert!(c.data.is_none());
    }

    #[test]
    fn object_without_message_claims_signer() {
        let c = parse_claim(
            &json!({"data": {"username": "alice", "userId": 42}, "provider": "default"}),
            &signer(),
            4,
        )
        .unwrap();
        assert_eq!(c.address, signer());
        assert_eq!(c.data.unwrap().get("userId"), Some("42"));
        assert_eq!(c.provider.as_deref(), Some("default"));
    }

    #[test]
    fn rejects_other_messages_and_bad_addresses() {
        for v in [
            json!("hello"),
            json!("I own the address: not-an-address"),
            json!({"message": 7}),
            json!({"provider": ""}),
            json!(42),
        ] {
            assert!(
                matches!(parse_claim(&v, &signer(), 4), Err(ProtocolError::InvalidFormat(_))),
                "{v} should be INVALID_FORMAT"
            );
        }
    }

    #[test]
    fn bad_data_is_invalid_data() {
        let err = parse_claim(&json!({"data": {"a": [1]}}), &signer(), 4).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidData(_)));
    }
}
