use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

use crate::error::AppError;
use crate::Result;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Ciphertext + nonce pair as stored in the provider row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedCredential {
    pub ciphertext: String,
    pub nonce: String,
}

/// Encrypts provider API keys at rest (AES-256-GCM). Plaintext keys exist
/// only in memory between `decrypt` and the outbound request.
pub struct CredentialVault {
    encryption_key: [u8; KEY_SIZE],
}

impl CredentialVault {
    pub fn new(encryption_key: [u8; KEY_SIZE]) -> Self {
        Self { encryption_key }
    }

    pub fn from_base64_key(key: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key)
            .map_err(|e| AppError::ConfigError(format!("Invalid credential key: {}", e)))?;

        if key_bytes.len() != KEY_SIZE {
            return Err(AppError::ConfigError(
                "Credential key must decode to 32 bytes".to_string(),
            ));
        }

        let mut encryption_key = [0u8; KEY_SIZE];
        encryption_key.copy_from_slice(&key_bytes);

        Ok(Self { encryption_key })
    }

    pub fn encrypt(&self, api_key: &str) -> Result<EncryptedCredential> {
        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key)
            .map_err(|e| AppError::InternalError(format!("Encryption error: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let encrypted = cipher
            .encrypt(nonce, api_key.as_bytes())
            .map_err(|e| AppError::InternalError(format!("Encryption failed: {}", e)))?;

        Ok(EncryptedCredential {
            ciphertext: BASE64.encode(encrypted),
            nonce: BASE64.encode(nonce_bytes),
        })
    }

    pub fn decrypt(&self, credential: &EncryptedCredential) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key)
            .map_err(|e| AppError::InternalError(format!("Decryption error: {}", e)))?;

        let nonce_bytes = BASE64
            .decode(&credential.nonce)
            .map_err(|e| AppError::InternalError(format!("Invalid nonce: {}", e)))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = BASE64
            .decode(&credential.ciphertext)
            .map_err(|e| AppError::InternalError(format!("Invalid ciphertext: {}", e)))?;

        let decrypted = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| AppError::InternalError(format!("Decryption failed: {}", e)))?;

        String::from_utf8(decrypted)
            .map_err(|e| AppError::InternalError(format!("Invalid UTF-8: {}", e)))
    }
}
