//! SASL derivation chains over MD5, SHA-1 and HMAC-SHA-1.
//!
//! The hash primitives come from the RustCrypto crates; this module only
//! composes them into the DIGEST-MD5 (RFC 2831) and SCRAM-SHA-1 (RFC 5802)
//! computations.

use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

use crate::error::AuthError;

type HmacSha1 = Hmac<Sha1>;

/// SHA-1 output length
pub const SHA1_LEN: usize = 20;

/// Raw MD5 digest
#[must_use]
pub fn md5(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

/// Lowercase hex MD5 digest
#[must_use]
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(md5(data))
}

/// Raw SHA-1 digest
#[must_use]
pub fn sha1(data: &[u8]) -> [u8; SHA1_LEN] {
    Sha1::digest(data).into()
}

/// HMAC-SHA-1 of `data` under `key`
///
/// # Errors
///
/// `InvalidKeyLength` if the primitive rejects the key.
pub fn hmac_sha1(key: &[u8], data: &[u8]) -> Result<[u8; SHA1_LEN], AuthError> {
    let mut mac = HmacSha1::new_from_slice(key).map_err(|_| AuthError::InvalidKeyLength)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// SCRAM `Hi()`: XOR of the HMAC feedback chain seeded with
/// `salt || 00 00 00 01`.
///
/// # Errors
///
/// `InvalidKeyLength` from [`hmac_sha1`].
pub fn salted_password(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<[u8; SHA1_LEN], AuthError> {
    let mut seed = salt.to_vec();
    seed.extend_from_slice(&[0, 0, 0, 1]);

    let mut previous = hmac_sha1(password, &seed)?;
    let mut salted = previous;
    for _ in 1..iterations {
        let next = hmac_sha1(password, &previous)?;
        for (out, byte) in salted.iter_mut().zip(next.iter()) {
            *out ^= byte;
        }
        previous = next;
    }
    Ok(salted)
}

/// Client proof and expected server signature of one SCRAM exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScramKeys {
    /// `ClientKey XOR ClientSignature`
    pub client_proof: [u8; SHA1_LEN],
    /// `HMAC(ServerKey, AuthMessage)`
    pub server_signature: [u8; SHA1_LEN],
}

/// Derive the SCRAM-SHA-1 client proof and server signature.
///
/// # Errors
///
/// `InvalidKeyLength` from [`hmac_sha1`].
pub fn scram_keys(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    auth_message: &[u8],
) -> Result<ScramKeys, AuthError> {
    let salted = salted_password(password, salt, iterations)?;

    let client_key = hmac_sha1(&salted, b"Client Key")?;
    let stored_key = sha1(&client_key);
    let client_signature = hmac_sha1(&stored_key, auth_message)?;

    let mut client_proof = client_key;
    for (out, byte) in client_proof.iter_mut().zip(client_signature.iter()) {
        *out ^= byte;
    }

    let server_key = hmac_sha1(&salted, b"Server Key")?;
    let server_signature = hmac_sha1(&server_key, auth_message)?;

    Ok(ScramKeys { client_proof, server_signature })
}

/// Inputs of a DIGEST-MD5 `response` value
#[derive(Debug, Clone, Copy)]
pub struct DigestInput<'a> {
    /// Authentication identity
    pub username: &'a str,
    /// Realm from the challenge (empty if absent)
    pub realm: &'a str,
    /// Password
    pub password: &'a str,
    /// Server nonce
    pub nonce: &'a str,
    /// Client nonce
    pub cnonce: &'a str,
    /// `serv-type/host[/serv-name]`
    pub digest_uri: &'a str,
}

/// DIGEST-MD5 `response` value (`qop=auth`, `nc=00000001`), lowercase hex.
#[must_use]
pub fn digest_md5_response(input: &DigestInput<'_>) -> String {
    let credentials = format!("{}:{}:{}", input.username, input.realm, input.password);
    let mut a1 = md5(credentials.as_bytes()).to_vec();
    a1.extend_from_slice(format!(":{}:{}", input.nonce, input.cnonce).as_bytes());

    let a2 = format!("AUTHENTICATE:{}", input.digest_uri);

    let kd = format!(
        "{}:{}:00000001:{}:auth:{}",
        md5_hex(&a1),
        input.nonce,
        input.cnonce,
        md5_hex(a2.as_bytes())
    );
    md5_hex(kd.as_bytes())
}
