// splitpay/src/crypto.rs
// At-rest sealing for delegated OAuth tokens

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::{thread_rng, Rng};

use crate::error::{Result, SplitError};

const NONCE_LEN: usize = 12;

/// Seals tokens with AES-256-GCM when a key is configured.
///
/// The sealed form is `base64(nonce || ciphertext)`. Without a key tokens are
/// stored as-is, which the service warns about at startup.
#[derive(Clone)]
pub enum TokenCipher {
    Aes(Aes256Gcm),
    Plaintext,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenCipher::Aes(_) => f.write_str("TokenCipher::Aes"),
            TokenCipher::Plaintext => f.write_str("TokenCipher::Plaintext"),
        }
    }
}

impl TokenCipher {
    /// Builds a cipher from a base64-encoded 32 byte key
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let key_bytes = general_purpose::STANDARD
            .decode(key_b64.trim())
            .map_err(|e| {
                SplitError::Configuration(format!("Failed to decode TOKEN_ENCRYPTION_KEY: {}", e))
            })?;

        if key_bytes.len() != 32 {
            return Err(SplitError::Configuration(format!(
                "TOKEN_ENCRYPTION_KEY must be 32 bytes (256 bits), got {} bytes",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| SplitError::Configuration(format!("Failed to create cipher: {}", e)))?;

        Ok(TokenCipher::Aes(cipher))
    }

    pub fn is_encrypting(&self) -> bool {
        matches!(self, TokenCipher::Aes(_))
    }

    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let cipher = match self {
            TokenCipher::Aes(cipher) => cipher,
            TokenCipher::Plaintext => return Ok(plaintext.to_string()),
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| SplitError::Persistence(format!("Token encryption failed: {}", e)))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);

        Ok(general_purpose::STANDARD.encode(sealed))
    }

    /// A token that no longer opens (rotated key, corrupted row) is an invalid credential
    pub fn open(&self, sealed: &str) -> Result<String> {
        let cipher = match self {
            TokenCipher::Aes(cipher) => cipher,
            TokenCipher::Plaintext => return Ok(sealed.to_string()),
        };

        let data = general_purpose::STANDARD
            .decode(sealed)
            .map_err(|e| SplitError::CredentialInvalid(format!("Stored token is not base64: {}", e)))?;

        if data.len() <= NONCE_LEN {
            return Err(SplitError::CredentialInvalid(
                "Stored token is too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SplitError::CredentialInvalid("Stored token could not be decrypted".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| SplitError::CredentialInvalid("Stored token is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        general_purpose::STANDARD.encode([7u8; 32])
    }

    #[test]
    fn test_seal_and_open() {
        let cipher = TokenCipher::from_base64_key(&test_key()).unwrap();
        let sealed = cipher.seal("APP_USR-123456").unwrap();

        assert_ne!(sealed, "APP_USR-123456");
        assert_eq!(cipher.open(&sealed).unwrap(), "APP_USR-123456");
    }

    #[test]
    fn test_nonce_differs_per_seal() {
        let cipher = TokenCipher::from_base64_key(&test_key()).unwrap();
        assert_ne!(cipher.seal("same").unwrap(), cipher.seal("same").unwrap());
    }

    #[test]
    fn test_wrong_key_yields_invalid_credential() {
        let cipher = TokenCipher::from_base64_key(&test_key()).unwrap();
        let sealed = cipher.seal("APP_USR-123456").unwrap();

        let other = TokenCipher::from_base64_key(&general_purpose::STANDARD.encode([9u8; 32])).unwrap();
        assert!(matches!(other.open(&sealed), Err(SplitError::CredentialInvalid(_))));
    }

    #[test]
    fn test_short_key_is_configuration_error() {
        let key = general_purpose::STANDARD.encode([1u8; 16]);
        assert!(matches!(
            TokenCipher::from_base64_key(&key),
            Err(SplitError::Configuration(_))
        ));
    }

    #[test]
    fn test_plaintext_passthrough() {
        let cipher = TokenCipher::Plaintext;
        assert!(!cipher.is_encrypting());
        assert_eq!(cipher.seal("tok").unwrap(), "tok");
        assert_eq!(cipher.open("tok").unwrap(), "tok");
    }
}
