//! Embedding encryption at rest.
//!
//! Face embeddings are biometric templates, so they are stored AES-256-GCM
//! encrypted. The key lives in a key file created on first run with 0600
//! permissions. Each blob is `nonce (12 bytes) || ciphertext`, with a fresh
//! random nonce per encryption.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key file: {0}")]
    KeyFile(#[from] std::io::Error),
    #[error("key file has wrong length: expected {KEY_LEN} bytes, got {0}")]
    BadKeyLength(usize),
    #[error("embedding blob too short to contain a nonce")]
    TruncatedBlob,
    #[error("embedding decryption failed — wrong key or corrupted blob")]
    DecryptFailed,
    #[error("embedding encryption failed")]
    EncryptFailed,
}

/// AES-256-GCM cipher for embedding blobs.
#[derive(Clone)]
pub struct EmbeddingCipher {
    cipher: Aes256Gcm,
    fingerprint: String,
}

impl EmbeddingCipher {
    /// Build a cipher from raw key bytes.
    pub fn from_key_bytes(key: &[u8; KEY_LEN]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key);
        let digest = hasher.finalize();
        // Short key fingerprint for logs; never log the key itself.
        let fingerprint = digest[..4].iter().map(|b| format!("{b:02x}")).collect();

        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            fingerprint,
        }
    }

    /// Load the key file, creating it with fresh random bytes if missing.
    pub fn load_or_create(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            let bytes = std::fs::read(path)?;
            let key: [u8; KEY_LEN] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::BadKeyLength(bytes.len()))?;
            tracing::debug!(path = %path.display(), "loaded embedding key");
            return Ok(Self::from_key_bytes(&key));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut f = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(path)?;
            f.write_all(&key)?;
        }
        #[cfg(not(unix))]
        std::fs::write(path, key)?;

        tracing::info!(path = %path.display(), "created new embedding key");
        Ok(Self::from_key_bytes(&key))
    }

    /// Short hex fingerprint of the key, for logs and status output.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Encrypt embedding values into a `nonce || ciphertext` blob.
    pub fn encrypt(&self, values: &[f32]) -> Result<Vec<u8>, CryptoError> {
        let plaintext: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a blob back into embedding values.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<f32>, CryptoError> {
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::TruncatedBlob);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)?;

        Ok(plaintext
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> EmbeddingCipher {
        EmbeddingCipher::from_key_bytes(&[7u8; KEY_LEN])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let values = vec![0.25f32, -1.5, 0.0, 3.25];
        let blob = cipher.encrypt(&values).unwrap();
        let back = cipher.decrypt(&blob).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_nonce_makes_blobs_differ() {
        let cipher = test_cipher();
        let values = vec![1.0f32; 16];
        let a = cipher.encrypt(&values).unwrap();
        let b = cipher.encrypt(&values).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_blob_fails() {
        let cipher = test_cipher();
        let mut blob = cipher.encrypt(&[1.0, 2.0]).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert!(matches!(cipher.decrypt(&blob), Err(CryptoError::DecryptFailed)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = test_cipher().encrypt(&[1.0, 2.0]).unwrap();
        let other = EmbeddingCipher::from_key_bytes(&[9u8; KEY_LEN]);
        assert!(matches!(other.decrypt(&blob), Err(CryptoError::DecryptFailed)));
    }

    #[test]
    fn test_truncated_blob() {
        let cipher = test_cipher();
        assert!(matches!(cipher.decrypt(&[1, 2, 3]), Err(CryptoError::TruncatedBlob)));
    }

    #[test]
    fn test_key_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("rollcall-key-test-{}", std::process::id()));
        let path = dir.join("embeddings.key");
        let _ = std::fs::remove_file(&path);

        let created = EmbeddingCipher::load_or_create(&path).unwrap();
        let loaded = EmbeddingCipher::load_or_create(&path).unwrap();
        assert_eq!(created.fingerprint(), loaded.fingerprint());

        let blob = created.encrypt(&[0.5, 0.5]).unwrap();
        assert_eq!(loaded.decrypt(&blob).unwrap(), vec![0.5, 0.5]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let c = test_cipher();
        assert_eq!(c.fingerprint().len(), 8);
        assert_eq!(c.fingerprint(), test_cipher().fingerprint());
        assert!(c.fingerprint().chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
