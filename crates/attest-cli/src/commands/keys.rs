//! Local key handling for producing signed-message proofs.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::SigningKey;
use serde_json::{json, Map, Value};

use attest_protocol::{format_signed_block, ownership_phrase, sign_envelope};
use attest_schemas::Address;

use super::{load_settings, parse_data};

pub fn keygen() {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let public = key.verifying_key().to_bytes();
    println!("secret_hex={}", hex::encode(key.to_bytes()));
    println!("public_key_b64={}", BASE64.encode(public));
    println!("address={}", Address::from_public_key(&public));
}

pub fn signing_key_from_hex(secret_hex: &str) -> Result<SigningKey> {
    let bytes = hex::decode(secret_hex.trim()).context("--secret-hex is not hex")?;
    let Ok(secret) = <[u8; 32]>::try_from(bytes.as_slice()) else {
        bail!("--secret-hex must encode 32 bytes, got {}", bytes.len());
    };
    Ok(SigningKey::from_bytes(&secret))
}

pub fn sign(
    secret_hex: &str,
    data: &[String],
    provider: Option<String>,
    message: Option<String>,
) -> Result<()> {
    let key = signing_key_from_hex(secret_hex)?;
    let address = Address::from_public_key(&key.verifying_key().to_bytes());

    let mut body = Map::new();
    body.insert(
        "message".into(),
        Value::String(message.unwrap_or_else(|| ownership_phrase(&address))),
    );
    if !data.is_empty() {
        let settings = load_settings()?;
        body.insert("data".into(), parse_data(data, &settings)?.to_json());
    }
    if let Some(p) = provider {
        body.insert("provider".into(), json!(p));
    }

    let envelope = sign_envelope(&key, Value::Object(body));
    println!("address={address}");
    println!("{}", format_signed_block(&envelope));
    Ok(())
}
