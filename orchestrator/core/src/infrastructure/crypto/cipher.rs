// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::domain::secure_channel::{ChannelKey, CryptoError, PayloadCipher};

const NONCE_LEN: usize = 12;

/// AES-256-GCM payload cipher. Output layout is `nonce || ciphertext || tag`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCipher;

impl AesGcmCipher {
    pub fn new() -> Self {
        Self
    }

    fn cipher(key: &ChannelKey) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Encryption(format!("Invalid key length: {}", e)))
    }
}

impl PayloadCipher for AesGcmCipher {
    fn encrypt(&self, key: &ChannelKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Self::cipher(key)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, key: &ChannelKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(CryptoError::Decryption("Ciphertext shorter than nonce".to_string()));
        }
        let cipher = Self::cipher(key).map_err(|e| CryptoError::Decryption(e.to_string()))?;
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::Decryption("Authentication tag mismatch".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> ChannelKey {
        ChannelKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = AesGcmCipher::new();
        let plaintext = br#"{"type":"task_offer"}"#;

        let sealed = cipher.encrypt(&key(3), plaintext).unwrap();
        assert_ne!(&sealed[NONCE_LEN..], plaintext.as_slice());

        let opened = cipher.decrypt(&key(3), &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_nonces_are_fresh() {
        let cipher = AesGcmCipher::new();
        let a = cipher.encrypt(&key(3), b"same").unwrap();
        let b = cipher.encrypt(&key(3), b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypt_rejects_wrong_key_and_tampering() {
        let cipher = AesGcmCipher::new();
        let mut sealed = cipher.encrypt(&key(3), b"payload").unwrap();

        assert!(matches!(
            cipher.decrypt(&key(4), &sealed),
            Err(CryptoError::Decryption(_))
        ));

        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(cipher.decrypt(&key(3), &sealed).is_err());
        assert!(cipher.decrypt(&key(3), &sealed[..4]).is_err());
    }
}
