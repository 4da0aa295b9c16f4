//! AES-256-GCM sealing of tokens at rest.
//!
//! Every token gets its own random 96-bit nonce. Ciphertext and nonce are
//! stored as separate base64 columns.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// Cipher bound to the store's master key.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Builds a cipher from a base64-encoded 32-byte master key.
    pub fn from_base64_key(key_base64: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key_base64.trim())
            .context("Encryption key is not valid base64")?;

        if key_bytes.len() != KEY_SIZE {
            return Err(anyhow!(
                "Encryption key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE,
                key_bytes.len()
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        Ok(Self { cipher })
    }

    /// Encrypts a token, returning `(ciphertext, nonce)` both base64-encoded.
    pub fn seal(&self, token: &str) -> Result<(String, String)> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, token.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok((BASE64.encode(ciphertext), BASE64.encode(nonce)))
    }

    /// Decrypts a token sealed by [`TokenCipher::seal`] under the same key.
    pub fn open(&self, ciphertext: &str, nonce: &str) -> Result<String> {
        let ciphertext = BASE64
            .decode(ciphertext)
            .context("Failed to decode ciphertext")?;
        let nonce = BASE64.decode(nonce).context("Failed to decode nonce")?;

        if nonce.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce.len()
            ));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        String::from_utf8(plaintext).context("Decrypted token is not valid UTF-8")
    }
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenCipher(<key redacted>)")
    }
}
