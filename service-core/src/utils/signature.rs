use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn sign(secret: &[u8], payload: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a hex signature in constant time. Case of the hex digits is ignored.
pub fn verify(secret: &[u8], payload: &[u8], signature: &str) -> Result<bool, anyhow::Error> {
    let expected = sign(secret, payload)?;
    let provided = signature.trim().to_ascii_lowercase();

    if expected.len() != provided.len() {
        return Ok(false);
    }

    Ok(expected.as_bytes().ct_eq(provided.as_bytes()).into())
}
