use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine;
use uuid::Uuid;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Seals staged scan images so they are unreadable while on local disk.
///
/// Each file is `nonce || ciphertext` and authenticated against the id of
/// the record it was staged for. A file renamed or copied onto another
/// record's staging path fails to open.
pub struct ImageCipher {
    cipher: Aes256Gcm,
}

impl ImageCipher {
    /// Build from `STAGING_ENCRYPTION_KEY` (base64, 32 bytes).
    pub fn from_base64_key(key_base64: &str) -> Result<Self, EncryptionError> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(key_base64.trim())
            .map_err(|_| EncryptionError::InvalidKey)?;
        if key.len() != KEY_LEN {
            return Err(EncryptionError::InvalidKey);
        }
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EncryptionError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, record_id: Uuid, image: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let payload = Payload {
            msg: image,
            aad: record_id.as_bytes(),
        };
        let ciphertext = self
            .cipher
            .encrypt(&nonce, payload)
            .map_err(|_| EncryptionError::SealFailed(record_id))?;

        let mut staged = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        staged.extend_from_slice(&nonce);
        staged.extend(ciphertext);
        Ok(staged)
    }

    pub fn open(&self, record_id: Uuid, staged: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if staged.len() < NONCE_LEN {
            return Err(EncryptionError::OpenFailed);
        }
        let (nonce, ciphertext) = staged.split_at(NONCE_LEN);
        let payload = Payload {
            msg: ciphertext,
            aad: record_id.as_bytes(),
        };
        self.cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| EncryptionError::OpenFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid staging encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Failed to seal staged image for record {0}")]
    SealFailed(Uuid),

    /// Wrong key, wrong record, or a truncated or modified file.
    #[error("Staged image failed authentication")]
    OpenFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> ImageCipher {
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; KEY_LEN]);
        ImageCipher::from_base64_key(&key).unwrap()
    }

    #[test]
    fn test_sealed_image_opens_for_same_record() {
        let cipher = cipher();
        let id = Uuid::new_v4();
        let sealed = cipher.seal(id, b"jpeg bytes").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"jpeg bytes");
        assert_eq!(cipher.open(id, &sealed).unwrap(), b"jpeg bytes");
    }

    #[test]
    fn test_sealed_image_rejects_other_record() {
        let cipher = cipher();
        let sealed = cipher.seal(Uuid::new_v4(), b"jpeg bytes").unwrap();
        assert!(matches!(
            cipher.open(Uuid::new_v4(), &sealed),
            Err(EncryptionError::OpenFailed)
        ));
    }

    #[test]
    fn test_tampered_or_truncated_file_is_rejected() {
        let cipher = cipher();
        let id = Uuid::new_v4();
        let mut sealed = cipher.seal(id, b"jpeg bytes").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(cipher.open(id, &sealed), Err(EncryptionError::OpenFailed)));
        assert!(matches!(cipher.open(id, b"short"), Err(EncryptionError::OpenFailed)));
    }

    #[test]
    fn test_short_key_is_rejected() {
        let key = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(matches!(
            ImageCipher::from_base64_key(&key),
            Err(EncryptionError::InvalidKey)
        ));
        assert!(ImageCipher::from_base64_key("not base64!").is_err());
    }
}
