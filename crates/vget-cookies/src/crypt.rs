//! AES-256-GCM encryption for cookie blobs.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{CookieError, CookieResult};

const NONCE_LEN: usize = 12;

/// Process-held encryption key, loaded once from configuration at startup.
#[derive(Clone)]
pub struct EncryptionKey {
    key: Key<Aes256Gcm>,
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl EncryptionKey {
    /// Load from a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> CookieResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CookieError::config_error(format!("bad key encoding: {}", e)))?;
        if bytes.len() != 32 {
            return Err(CookieError::config_error(format!(
                "encryption key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            key: *Key::<Aes256Gcm>::from_slice(&bytes),
        })
    }

    /// Load from the `CREDENTIAL_ENCRYPTION_KEY` environment variable.
    pub fn from_env() -> CookieResult<Self> {
        let encoded = std::env::var("CREDENTIAL_ENCRYPTION_KEY")
            .map_err(|_| CookieError::config_error("CREDENTIAL_ENCRYPTION_KEY not set"))?;
        Self::from_base64(&encoded)
    }

    /// Encrypt plaintext into a base64 `nonce || ciphertext` blob.
    pub fn seal(&self, plaintext: &[u8]) -> CookieResult<String> {
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CookieError::crypto(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    /// Decrypt a blob produced by [`EncryptionKey::seal`].
    pub fn open(&self, blob: &str) -> CookieResult<Vec<u8>> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(blob.trim())
            .map_err(|e| CookieError::crypto(format!("bad blob encoding: {}", e)))?;
        if bytes.len() <= NONCE_LEN {
            return Err(CookieError::crypto("blob too short"));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.key);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CookieError::crypto("decryption failed (wrong key or corrupt blob)"))
    }
}

/// Content fingerprint of a plaintext jar: hex-encoded SHA-256.
///
/// Stable across re-encryption so failure accounting survives key rotation.
pub fn fingerprint(plaintext: &[u8]) -> String {
    let digest = Sha256::digest(plaintext);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EncryptionKey {
        EncryptionKey::from_base64(&base64::engine::general_purpose::STANDARD.encode([7u8; 32]))
            .unwrap()
    }

    #[test]
    fn seal_open_roundtrip() {
        let k = key();
        let blob = k.seal(b"cookie jar contents").unwrap();
        assert_eq!(k.open(&blob).unwrap(), b"cookie jar contents");
    }

    #[test]
    fn nonces_differ_between_seals() {
        let k = key();
        let a = k.seal(b"same").unwrap();
        let b = k.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let blob = key().seal(b"secret").unwrap();
        let other = EncryptionKey::from_base64(
            &base64::engine::general_purpose::STANDARD.encode([9u8; 32]),
        )
        .unwrap();
        assert!(matches!(other.open(&blob), Err(CookieError::Crypto(_))));
    }

    #[test]
    fn key_length_is_enforced() {
        let short = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(EncryptionKey::from_base64(&short).is_err());
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = fingerprint(b"jar");
        let b = fingerprint(b"jar");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, fingerprint(b"other"));
    }
}
