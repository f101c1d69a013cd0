//! Encryption of provider API keys at rest.
//!
//! The registry only ever talks to [`SecretCodec`]; [`AesGcmCodec`] is the
//! implementation used by the app. Ciphertext is stored as base64 text of
//! `nonce || sealed bytes` so it fits a plain TEXT column.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64_ENGINE;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::errors::RegistryError;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("ciphertext is not valid base64")] Encoding,
    #[error("ciphertext is too short")] Truncated,
    #[error("authentication failed")] Authentication,
    #[error("plaintext is not valid UTF-8")] Utf8,
    #[error("encryption failed")] Seal,
}

impl CodecError {
    pub(crate) fn into_decrypt(self) -> RegistryError {
        RegistryError::Decrypt(self.to_string())
    }

    pub(crate) fn into_encrypt(self) -> RegistryError {
        RegistryError::Encrypt(self.to_string())
    }
}

pub trait SecretCodec: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CodecError>;
    fn decrypt(&self, ciphertext: &str) -> Result<String, CodecError>;
}

/// AES-256-GCM with a fresh random nonce per value.
#[derive(Clone)]
pub struct AesGcmCodec {
    cipher: Aes256Gcm,
}

impl AesGcmCodec {
    pub fn from_key(key: [u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(&key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Derive the key as SHA-256 of an operator supplied passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self::from_key(key)
    }
}

impl SecretCodec for AesGcmCodec {
    fn encrypt(&self, plaintext: &str) -> Result<String, CodecError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CodecError::Seal)?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(B64_ENGINE.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CodecError> {
        let raw = B64_ENGINE
            .decode(ciphertext.trim().as_bytes())
            .map_err(|_| CodecError::Encoding)?;
        if raw.len() <= NONCE_LEN {
            return Err(CodecError::Truncated);
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CodecError::Authentication)?;
        String::from_utf8(plain).map_err(|_| CodecError::Utf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_never_emits_plaintext() {
        let codec = AesGcmCodec::from_passphrase("hunter2");
        let cipher = codec.encrypt("sk-live-123").unwrap();
        assert!(!cipher.contains("sk-live-123"));
        assert_eq!(codec.decrypt(&cipher).unwrap(), "sk-live-123");
    }

    #[test]
    fn nonces_differ_between_encryptions() {
        let codec = AesGcmCodec::from_passphrase("hunter2");
        assert_ne!(codec.encrypt("same").unwrap(), codec.encrypt("same").unwrap());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let cipher = AesGcmCodec::from_passphrase("a").encrypt("secret").unwrap();
        let err = AesGcmCodec::from_passphrase("b").decrypt(&cipher).unwrap_err();
        assert!(matches!(err, CodecError::Authentication));
    }

    #[test]
    fn malformed_input_is_rejected() {
        let codec = AesGcmCodec::from_key([7u8; 32]);
        assert!(matches!(codec.decrypt("%%%"), Err(CodecError::Encoding)));
        assert!(matches!(codec.decrypt("AAAA"), Err(CodecError::Truncated)));
    }
}
