//! Credential vault: reversible encryption of stored account secrets.
//!
//! Blobs are `base64(nonce || ciphertext)` under AES-256-GCM with a fresh
//! 12-byte nonce per call. The key is process-wide and read-only once built.

use std::fmt;
use std::sync::Arc;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rand_core::TryRngCore;

use crate::Error;

const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct Encryptor {
    cipher: Arc<Aes256Gcm>,
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Encryptor(<key>)")
    }
}

impl Encryptor {
    pub fn new(key_bytes: &[u8]) -> Result<Self, Error> {
        if key_bytes.len() != KEY_LEN {
            return Err(Error::KeyDerivation(format!(
                "AES-256 key must be {} bytes, got {}",
                KEY_LEN,
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::clone_from_slice(key_bytes);
        Ok(Self {
            cipher: Arc::new(Aes256Gcm::new(&key)),
        })
    }

    /// Builds the vault from a base64-encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> Result<Self, Error> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| Error::KeyDerivation(format!("master key is not base64: {e}")))?;
        Self::new(&bytes)
    }

    /// A fresh random key, for first-run provisioning.
    pub fn generate_key() -> Result<[u8; KEY_LEN], Error> {
        let mut key = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| Error::KeyDerivation(e.to_string()))?;
        Ok(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| Error::Encryption(e.to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, blob: &str) -> Result<String, Error> {
        let data = BASE64
            .decode(blob)
            .map_err(|e| Error::Decryption(e.to_string()))?;
        if data.len() < NONCE_LEN {
            return Err(Error::Decryption("Ciphertext too short (missing nonce)".to_owned()));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| Error::Decryption(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| Error::Decryption(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypts_what_it_encrypts() {
        let vault = Encryptor::new(&[7u8; KEY_LEN]).unwrap();
        let blob = vault.encrypt("correct horse").unwrap();
        assert_ne!(blob, "correct horse");
        assert_eq!(vault.decrypt(&blob).unwrap(), "correct horse");
    }

    #[test]
    fn nonces_differ_between_calls() {
        let vault = Encryptor::new(&[7u8; KEY_LEN]).unwrap();
        assert_ne!(vault.encrypt("same").unwrap(), vault.encrypt("same").unwrap());
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let a = Encryptor::new(&[1u8; KEY_LEN]).unwrap();
        let b = Encryptor::new(&[2u8; KEY_LEN]).unwrap();
        let blob = a.encrypt("secret").unwrap();
        assert!(matches!(b.decrypt(&blob), Err(Error::Decryption(_))));
    }

    #[test]
    fn rejects_short_keys_and_blobs() {
        assert!(matches!(Encryptor::new(&[0u8; 16]), Err(Error::KeyDerivation(_))));
        let vault = Encryptor::new(&[0u8; KEY_LEN]).unwrap();
        assert!(matches!(vault.decrypt("AAAA"), Err(Error::Decryption(_))));
    }

    #[test]
    fn base64_key_round_trip() {
        let key = Encryptor::generate_key().unwrap();
        let vault = Encryptor::from_base64_key(&BASE64.encode(key)).unwrap();
        let other = Encryptor::new(&key).unwrap();
        assert_eq!(other.decrypt(&vault.encrypt("x").unwrap()).unwrap(), "x");
    }
}
