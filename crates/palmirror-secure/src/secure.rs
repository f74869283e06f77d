//! The facade the application talks to.
//!
//! A [`SecureContext`] moves through three states:
//!
//! - [`SecureState::Uninitialized`]: no vault yet; [`SecureContext::setup`]
//!   creates one and leaves it unlocked.
//! - [`SecureState::Locked`]: a vault exists but no key is cached (fresh
//!   process, after [`SecureContext::lock`], or after a wrong secret).
//! - [`SecureState::Unlocked`]: the derived key is cached and record
//!   operations are allowed.
//!
//! The `generalSettings` record doubles as the password check: a secret is
//! correct iff the key derived from it decrypts that record.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::config::SecureConfig;
use crate::crypto::{self, CryptoError, DerivedKey, KeyMaterial};
use crate::records::{ApiKeyRecord, GeneralSettings, RecordKey, GENERAL_SETTINGS_KEY};
use crate::session::SessionKeyHolder;
use crate::store::{RecordStore, SecretKind, StoreError, UnlockHint};
use crate::webauthn::authenticator::PlatformAuthenticator;
use crate::webauthn::{CredentialError, CredentialManager, CredentialStore};

#[derive(Debug, Error)]
pub enum SecureError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("secure storage is already set up")]
    AlreadyActivated,
    #[error("secure storage has not been set up")]
    VaultNotInitialized,
    #[error("secure storage is locked")]
    SessionNotReady,
    #[error("invalid secret: {0}")]
    InvalidSecret(&'static str),
    #[error("passkey unlock is not configured")]
    PasskeysUnavailable,
    #[error("{0:?} can only be removed together with the whole vault")]
    ProtectedKey(String),
}

pub type Result<T> = std::result::Result<T, SecureError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureState {
    Uninitialized,
    Locked,
    Unlocked,
}

fn validate_secret(secret: &str, kind: SecretKind) -> Result<()> {
    if secret.is_empty() {
        return Err(SecureError::InvalidSecret("secret must not be empty"));
    }
    if kind == SecretKind::Pin && !secret.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SecureError::InvalidSecret("a PIN may only contain digits"));
    }
    Ok(())
}

#[derive(Debug)]
pub struct SecureContext {
    store: RecordStore,
    session: SessionKeyHolder,
    passkeys: Option<CredentialManager>,
}

impl SecureContext {
    /// Opens (creating if needed) the vault and credential databases named by
    /// `config`, with passkey unlock backed by `authenticator`.
    pub fn open(
        config: &SecureConfig,
        authenticator: Arc<dyn PlatformAuthenticator>,
    ) -> Result<Self> {
        for path in [&config.vault_path, &config.credential_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = RecordStore::open_path(&config.vault_path, config.kdf)?;
        let credentials = CredentialStore::open_path(&config.credential_path)?;
        let passkeys =
            CredentialManager::new(authenticator, credentials, config.relying_party.clone());
        Ok(Self::new(store).with_passkeys(passkeys))
    }

    /// A context without passkey support.
    pub fn new(store: RecordStore) -> Self {
        Self {
            store,
            session: SessionKeyHolder::new(),
            passkeys: None,
        }
    }

    pub fn with_passkeys(mut self, passkeys: CredentialManager) -> Self {
        self.passkeys = Some(passkeys);
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn passkeys(&self) -> Result<&CredentialManager> {
        self.passkeys.as_ref().ok_or(SecureError::PasskeysUnavailable)
    }

    fn session_key(&self) -> Result<Arc<DerivedKey>> {
        self.session.get().ok_or(SecureError::SessionNotReady)
    }

    /// True once the vault metadata exists.
    ///
    /// An interrupted setup leaves metadata without `generalSettings`; such a
    /// vault is activated but still reports [`SecureState::Uninitialized`] and
    /// accepts [`setup`](Self::setup).
    pub fn is_activated(&self) -> Result<bool> {
        Ok(self.store.is_activated()?)
    }

    pub fn is_secure_ready(&self) -> bool {
        self.session.is_set()
    }

    pub fn state(&self) -> Result<SecureState> {
        if !self.store.contains(GENERAL_SETTINGS_KEY)? {
            return Ok(SecureState::Uninitialized);
        }
        Ok(if self.session.is_set() {
            SecureState::Unlocked
        } else {
            SecureState::Locked
        })
    }

    /// First-time setup: creates the vault under `secret` and unlocks it.
    ///
    /// Refused once any record exists, so every record in a vault is always
    /// sealed with the same key.
    pub fn setup(&self, secret: &str, kind: SecretKind) -> Result<()> {
        validate_secret(secret, kind)?;
        if !self.store.list_keys()?.is_empty() {
            return Err(SecureError::AlreadyActivated);
        }

        let metadata = self.store.salt_and_iv()?;
        let key = crypto::derive_key(secret, &metadata.salt, &metadata.kdf)?;
        self.store
            .put(GENERAL_SETTINGS_KEY, &GeneralSettings::default(), KeyMaterial::Key(&key))?;
        self.store.set_unlock_hint(&UnlockHint::for_secret(kind, secret))?;
        self.session.set(key);

        log::info!("secure storage set up");
        Ok(())
    }

    /// Derives the key for `secret` and returns it only if it opens the vault.
    fn check_secret(&self, secret: &str) -> Result<Option<DerivedKey>> {
        let metadata = self.store.metadata()?.ok_or(SecureError::VaultNotInitialized)?;
        let key = crypto::derive_key(secret, &metadata.salt, &metadata.kdf)?;
        match self
            .store
            .get::<serde_json::Value>(GENERAL_SETTINGS_KEY, KeyMaterial::Key(&key))
        {
            Ok(_) => Ok(Some(key)),
            Err(err) if err.is_wrong_key() => Ok(None),
            Err(StoreError::NotFound(_)) => Err(SecureError::VaultNotInitialized),
            Err(err) => Err(err.into()),
        }
    }

    /// Unlocks with `secret`.
    ///
    /// Returns `Ok(false)` for a wrong secret, which also drops any key cached
    /// before the attempt.
    pub fn set_key(&self, secret: &str) -> Result<bool> {
        match self.check_secret(secret)? {
            Some(key) => {
                self.session.set(key);
                log::info!("secure storage unlocked");
                Ok(true)
            }
            None => {
                self.session.clear();
                log::warn!("unlock attempt with a wrong secret");
                Ok(false)
            }
        }
    }

    /// Like [`set_key`](Self::set_key) but leaves the session untouched.
    pub fn verify_key(&self, secret: &str) -> Result<bool> {
        Ok(self.check_secret(secret)?.is_some())
    }

    pub fn lock(&self) {
        self.session.clear();
        log::info!("secure storage locked");
    }

    pub fn set_secure_data<T: Serialize + ?Sized>(
        &self,
        key: impl Into<RecordKey>,
        value: &T,
    ) -> Result<()> {
        let session = self.session_key()?;
        let key = key.into().storage_key();
        self.store.put(&key, value, KeyMaterial::Key(&*session))?;
        Ok(())
    }

    /// Reads and decrypts `key` with the session key.
    ///
    /// A missing record is `Ok(None)`, not an error. Use
    /// [`RecordStore::get`] for the variant that reports
    /// [`StoreError::NotFound`].
    pub fn get_secure_data<T: DeserializeOwned>(
        &self,
        key: impl Into<RecordKey>,
    ) -> Result<Option<T>> {
        let session = self.session_key()?;
        let key = key.into().storage_key();
        match self.store.get(&key, KeyMaterial::Key(&*session)) {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_all_keys(&self) -> Result<BTreeSet<String>> {
        self.session_key()?;
        Ok(self.store.list_keys()?)
    }

    /// Deletes `key`. `generalSettings` holds the password check and can only
    /// go away through [`remove_vault`](Self::remove_vault).
    pub fn remove_key(&self, key: impl Into<RecordKey>) -> Result<()> {
        self.session_key()?;
        let key = key.into();
        if key == RecordKey::GeneralSettings {
            return Err(SecureError::ProtectedKey(key.storage_key()));
        }
        self.store.remove(&key.storage_key())?;
        Ok(())
    }

    pub fn general_settings(&self) -> Result<GeneralSettings> {
        Ok(self
            .get_secure_data(RecordKey::GeneralSettings)?
            .unwrap_or_default())
    }

    pub fn set_general_settings(&self, settings: &GeneralSettings) -> Result<()> {
        self.set_secure_data(RecordKey::GeneralSettings, settings)
    }

    pub fn api_key(&self, profile_id: &str) -> Result<Option<String>> {
        let record: Option<ApiKeyRecord> = self.get_secure_data(RecordKey::api_key(profile_id))?;
        Ok(record.map(|r| r.value))
    }

    pub fn set_api_key(&self, profile_id: &str, value: &str) -> Result<()> {
        self.set_secure_data(
            RecordKey::api_key(profile_id),
            &ApiKeyRecord {
                value: value.to_string(),
            },
        )
    }

    /// Ids of every `METADATA<id>` record.
    pub fn metadata_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .get_all_keys()?
            .iter()
            .filter_map(|key| match RecordKey::parse(key) {
                RecordKey::Metadata(id) => Some(id),
                _ => None,
            })
            .collect())
    }

    pub fn unlock_hint(&self) -> Result<Option<UnlockHint>> {
        Ok(self.store.unlock_hint()?)
    }

    /// Deletes the vault, the unlock hint, the passkey registration and the
    /// cached key. Everything previously stored becomes unrecoverable.
    pub fn remove_vault(&self) -> Result<()> {
        self.session.clear();
        self.store.wipe()?;
        if let Some(passkeys) = &self.passkeys {
            passkeys.reset_credential()?;
        }
        log::info!("secure storage removed");
        Ok(())
    }

    pub fn has_passkey(&self) -> Result<bool> {
        match &self.passkeys {
            Some(passkeys) => Ok(passkeys.is_registered()?),
            None => Ok(false),
        }
    }

    /// Registers a passkey that unlocks with `secret`. Returns `Ok(false)`
    /// without touching the authenticator if `secret` does not open the vault.
    pub fn register_passkey(&self, secret: &str) -> Result<bool> {
        let passkeys = self.passkeys()?;
        if self.check_secret(secret)?.is_none() {
            log::warn!("refusing to register a passkey for a wrong secret");
            return Ok(false);
        }
        passkeys.register_credential(secret)?;
        Ok(true)
    }

    /// Runs the passkey ceremony and unlocks with the recovered secret.
    pub fn unlock_with_passkey(&self) -> Result<bool> {
        let secret = self.passkeys()?.authenticate_credential()?;
        let secret = std::str::from_utf8(&secret).map_err(|_| CredentialError::Unwrap)?;
        self.set_key(secret)
    }

    pub fn reset_passkey(&self) -> Result<()> {
        self.passkeys()?.reset_credential()?;
        Ok(())
    }
}
