//! At-rest encryption of deposit wallet private keys.
//!
//! XChaCha20-Poly1305 with a 32-byte key derived as SHA-256 of the configured passphrase. Stored
//! form is `base64(nonce || ciphertext)`; the wallet address is bound in as associated data.
//! Rotated keys stay readable through the fallback list.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::WalletKeyConfig;

pub const NONCE_BYTES: usize = 24;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptFailed(String),

    #[error("no configured key decrypts this value (key hash {key_hash})")]
    NoKeyMatched { key_hash: String },
}

struct VaultKey {
    hash: String,
    key: Zeroizing<[u8; 32]>,
}

impl VaultKey {
    fn derive(passphrase: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(passphrase.as_bytes()).into();
        Self {
            hash: key_hash(&key),
            key: Zeroizing::new(key),
        }
    }
}

/// First 16 hex characters of SHA-256 over the derived key. Safe to persist.
pub fn key_hash(key: &[u8; 32]) -> String {
    let digest = Sha256::digest(key);
    hex::encode(digest)[..16].to_string()
}

/// Legacy rows stored the private key itself: 64 hex characters, optionally `0x`-prefixed.
fn legacy_plain_key(stored: &str) -> Option<&str> {
    let candidate = stored.strip_prefix("0x").unwrap_or(stored);
    (candidate.len() == 64 && candidate.chars().all(|c| c.is_ascii_hexdigit())).then_some(candidate)
}

pub struct KeyVault {
    current: VaultKey,
    fallbacks: Vec<VaultKey>,
}

impl KeyVault {
    pub fn new(current: &str, fallbacks: &[String]) -> Self {
        let current = VaultKey::derive(current);
        let mut derived: Vec<VaultKey> = Vec::with_capacity(fallbacks.len());
        for passphrase in fallbacks {
            let key = VaultKey::derive(passphrase);
            if key.hash != current.hash && derived.iter().all(|k| k.hash != key.hash) {
                derived.push(key);
            }
        }
        Self {
            current,
            fallbacks: derived,
        }
    }

    pub fn from_config(config: &WalletKeyConfig) -> Self {
        Self::new(&config.current, &config.fallbacks)
    }

    pub fn current_key_hash(&self) -> &str {
        &self.current.hash
    }

    pub fn encrypt(&self, plaintext: &str, aad: &str) -> Result<String, CryptoError> {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = XChaCha20Poly1305::new((&*self.current.key).into());
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptFailed("aead encrypt failed".to_string()))?;

        let mut stored = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        stored.extend_from_slice(&nonce);
        stored.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(stored))
    }

    /// Keys to try, in order: the one named by `key_hash`, the current key, then fallbacks.
    fn candidates<'a>(&'a self, key_hash: Option<&str>) -> Vec<&'a VaultKey> {
        let all = std::iter::once(&self.current).chain(self.fallbacks.iter());
        let mut ordered: Vec<&VaultKey> = Vec::with_capacity(1 + self.fallbacks.len());
        if let Some(hash) = key_hash {
            ordered.extend(all.clone().filter(|k| k.hash == hash));
        }
        ordered.extend(all.filter(|k| Some(k.hash.as_str()) != key_hash));
        ordered
    }

    pub fn decrypt(
        &self,
        stored: &str,
        aad: &str,
        key_hash: Option<&str>,
    ) -> Result<Zeroizing<String>, CryptoError> {
        if let Ok(bytes) = STANDARD.decode(stored) {
            if bytes.len() > NONCE_BYTES {
                let (nonce, ciphertext) = bytes.split_at(NONCE_BYTES);
                for candidate in self.candidates(key_hash) {
                    let cipher = XChaCha20Poly1305::new((&*candidate.key).into());
                    let opened = cipher.decrypt(
                        XNonce::from_slice(nonce),
                        Payload {
                            msg: ciphertext,
                            aad: aad.as_bytes(),
                        },
                    );
                    if let Ok(plain) = opened {
                        let plain = Zeroizing::new(plain);
                        if let Ok(text) = std::str::from_utf8(&plain) {
                            return Ok(Zeroizing::new(text.to_string()));
                        }
                    }
                }
            }
        }

        if let Some(raw) = legacy_plain_key(stored) {
            tracing::warn!("Using unencrypted legacy private key; re-encrypt this wallet");
            return Ok(Zeroizing::new(raw.to_ascii_lowercase()));
        }

        Err(CryptoError::NoKeyMatched {
            key_hash: key_hash.unwrap_or("unknown").to_string(),
        })
    }
}
