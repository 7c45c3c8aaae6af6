//! Identifier obfuscation
//!
//! The backend hands out the bearer token as base64 over a repeating-key
//! XOR of the plaintext. This is obfuscation, not encryption: anyone holding
//! the key (it ships in every agent) can reverse it. It is reproduced only
//! because the backend expects this exact decode.

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Key shared with the patch-management backend
pub const IDENTIFIER_KEY: &str = "Dt7Vug2dg25M2BFHZYcHr8HTyDPkZ7sX89oTxfrc7mc";

#[derive(Debug, thiserror::Error)]
pub enum ObfuscationError {
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decoded identifier is not valid UTF-8")]
    NotUtf8,

    #[error("obfuscation key is empty")]
    EmptyKey,
}

/// XOR `data` with `key` repeated to the data length
fn xor_with_key(data: &[u8], key: &[u8]) -> Vec<u8> {
    data.iter()
        .zip(key.iter().cycle())
        .map(|(byte, k)| byte ^ k)
        .collect()
}

/// Recover the bearer token from its stored form
pub fn decode_identifier(encoded: &str, key: &str) -> Result<String, ObfuscationError> {
    if key.is_empty() {
        return Err(ObfuscationError::EmptyKey);
    }
    let bytes = STANDARD.decode(encoded.trim())?;
    String::from_utf8(xor_with_key(&bytes, key.as_bytes())).map_err(|_| ObfuscationError::NotUtf8)
}

/// Produce the stored form of a bearer token
pub fn encode_identifier(token: &str, key: &str) -> Result<String, ObfuscationError> {
    if key.is_empty() {
        return Err(ObfuscationError::EmptyKey);
    }
    Ok(STANDARD.encode(xor_with_key(token.as_bytes(), key.as_bytes())))
}
