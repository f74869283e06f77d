//! Key derivation and authenticated encryption for vault records.
//!
//! Every record in a vault is sealed with one AES-256-GCM key derived from the
//! user's secret (PBKDF2-HMAC-SHA256 over the vault salt). No password hash is
//! stored anywhere: a failed GCM tag check is the only signal of a wrong secret.
//!
//! Ciphertexts use the WebCrypto layout, `ciphertext || tag`.

use std::borrow::Cow;
use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

const PASSKEY_WRAP_INFO: &[u8] = b"palmirror-secure:passkey-wrap:v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("decryption failed: wrong key or corrupted data")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
    #[error("invalid key derivation parameters: {0}")]
    InvalidKdfParams(String),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    #[serde(rename = "pbkdf2-hmac-sha256")]
    Pbkdf2HmacSha256,
}

/// Password-based key derivation parameters.
///
/// Persisted next to the vault salt so a vault keeps opening with the
/// parameters it was created with, whatever the current defaults are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub algorithm: KdfAlgorithm,
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::pbkdf2(DEFAULT_PBKDF2_ITERATIONS)
    }
}

impl KdfParams {
    pub fn pbkdf2(iterations: u32) -> Self {
        Self {
            algorithm: KdfAlgorithm::Pbkdf2HmacSha256,
            iterations,
        }
    }

    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.iterations == 0 {
            return Err(CryptoError::InvalidKdfParams(
                "iterations must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A 256-bit AES-GCM key. Zeroized on drop; never serialized.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Either a user secret (password/PIN) that still needs to go through the KDF,
/// or a key that was already derived for this vault.
#[derive(Clone, Copy)]
pub enum KeyMaterial<'a> {
    Secret(&'a str),
    Key(&'a DerivedKey),
}

impl<'a> KeyMaterial<'a> {
    pub fn resolve(
        &self,
        salt: &[u8],
        kdf: &KdfParams,
    ) -> Result<Cow<'a, DerivedKey>, CryptoError> {
        match *self {
            KeyMaterial::Secret(secret) => Ok(Cow::Owned(derive_key(secret, salt, kdf)?)),
            KeyMaterial::Key(key) => Ok(Cow::Borrowed(key)),
        }
    }
}

impl fmt::Debug for KeyMaterial<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMaterial::Secret(_) => f.write_str("KeyMaterial::Secret(..)"),
            KeyMaterial::Key(_) => f.write_str("KeyMaterial::Key(..)"),
        }
    }
}

/// Derives the vault key from a password or PIN.
///
/// PBKDF2 runs over the secret's UTF-8 bytes exactly as given. No Unicode
/// normalization is applied, so existing vaults keep opening with the bytes
/// they were created with.
pub fn derive_key(secret: &str, salt: &[u8], kdf: &KdfParams) -> Result<DerivedKey, CryptoError> {
    kdf.validate()?;
    let mut key = [0u8; KEY_LEN];
    match kdf.algorithm {
        KdfAlgorithm::Pbkdf2HmacSha256 => {
            pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, kdf.iterations, &mut key);
        }
    }
    let derived = DerivedKey(key);
    key.zeroize();
    Ok(derived)
}

/// Derives the key that wraps a user secret under a passkey credential id.
pub fn derive_wrapping_key(credential_id: &[u8], salt: &[u8]) -> Result<DerivedKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), credential_id);
    let mut key = [0u8; KEY_LEN];
    hk.expand(PASSKEY_WRAP_INFO, &mut key)
        .map_err(|err| CryptoError::KeyDerivation(err.to_string()))?;
    let derived = DerivedKey(key);
    key.zeroize();
    Ok(derived)
}

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

pub fn seal(
    key: &DerivedKey,
    iv: &[u8; IV_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Encrypt)
}

pub fn open(
    key: &DerivedKey,
    iv: &[u8; IV_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decrypt);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decrypt)
}

/// Serializes `value` to UTF-8 JSON and seals it.
///
/// With [`KeyMaterial::Secret`] the key is derived from `(secret, salt, kdf)`
/// first; with [`KeyMaterial::Key`] `salt` and `kdf` are ignored.
pub fn encrypt_json<T: Serialize + ?Sized>(
    value: &T,
    material: KeyMaterial<'_>,
    salt: &[u8],
    kdf: &KdfParams,
    iv: &[u8; IV_LEN],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let key = material.resolve(salt, kdf)?;
    let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
    seal(&key, iv, aad, &plaintext)
}

/// Inverse of [`encrypt_json`]. Fails with [`CryptoError::Decrypt`] when the key
/// is wrong or the ciphertext was tampered with.
pub fn decrypt_json<T: DeserializeOwned>(
    ciphertext: &[u8],
    material: KeyMaterial<'_>,
    salt: &[u8],
    kdf: &KdfParams,
    iv: &[u8; IV_LEN],
    aad: &[u8],
) -> Result<T, CryptoError> {
    let key = material.resolve(salt, kdf)?;
    let plaintext = open(&key, iv, aad, ciphertext)?;
    Ok(serde_json::from_slice(&plaintext)?)
}
