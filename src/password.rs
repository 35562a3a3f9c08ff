//! PBKDF2 password hashing for protected uploads.
//!
//! The stored form is `base64(salt).base64(derived_key)`; the raw password
//! never touches a backend.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use ring::{digest, pbkdf2};
use std::num::NonZeroU32;
use thiserror::Error;

const ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => panic!("iteration count must be nonzero"),
};
const SALT_LEN: usize = 16;
const KEY_LEN: usize = digest::SHA256_OUTPUT_LEN;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("random generator failure")]
    Rng,
    #[error("malformed password hash")]
    Malformed,
}

/// Derive a storable hash from a raw password.
pub fn hash(password: &str) -> Result<String, PasswordError> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt).map_err(|_| PasswordError::Rng)?;

    let mut key = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        ITERATIONS,
        &salt,
        password.as_bytes(),
        &mut key,
    );

    Ok(format!("{}.{}", BASE64.encode(salt), BASE64.encode(key)))
}

/// Check a raw password against a stored hash in constant time.
pub fn verify(password: &str, stored: &str) -> Result<bool, PasswordError> {
    let (salt_b64, key_b64) = stored.split_once('.').ok_or(PasswordError::Malformed)?;
    let salt = BASE64.decode(salt_b64).map_err(|_| PasswordError::Malformed)?;
    let key = BASE64.decode(key_b64).map_err(|_| PasswordError::Malformed)?;

    Ok(pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        ITERATIONS,
        &salt,
        password.as_bytes(),
        &key,
    )
    .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let stored = hash("correct horse").unwrap();
        assert!(verify("correct horse", &stored).unwrap());
        assert!(!verify("wrong", &stored).unwrap());

        // Two hashes of the same password differ (random salt).
        assert_ne!(stored, hash("correct horse").unwrap());

        assert!(matches!(
            verify("x", "not-a-stored-hash"),
            Err(PasswordError::Malformed)
        ));
    }
}
