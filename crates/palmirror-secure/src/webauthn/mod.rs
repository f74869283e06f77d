//! Passkey unlock: the user secret wrapped under a key derived from a WebAuthn
//! credential id.
//!
//! Registration creates a platform credential and stores, in a separate
//! database from the vault, the secret sealed with
//! `HKDF-SHA256(ikm = credential id, salt = random 32 bytes)`. Authentication
//! runs an assertion restricted to that credential and unwraps the secret,
//! which the caller then feeds to the normal password path.
//!
//! The wrapping key is recomputable by anyone holding the credential database
//! and the (non-secret) credential id; this is a convenience unlock, not a
//! hardware-bound one.

pub mod authenticator;
pub mod software;

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::RelyingParty;
use crate::crypto::{self, CryptoError, IV_LEN};
use crate::schema;

use self::authenticator::{
    AuthenticatorAttachment, AuthenticatorError, CreationOptions, PlatformAuthenticator,
    RequestOptions, UserEntity, UserVerification, DEFAULT_CEREMONY_TIMEOUT,
};

pub const CREDENTIAL_ROW: &str = "credential";
pub const HKDF_SALT_LEN: usize = 32;

const USER_NAME: &str = "palmirror-user";
const USER_DISPLAY_NAME: &str = "PalMirror User";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("hex error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Authenticator(#[from] AuthenticatorError),
    #[error("no passkey is registered")]
    NoCredential,
    #[error("the authenticator answered with a different credential than the registered one")]
    CredentialMismatch,
    #[error("failed to unwrap the stored secret")]
    Unwrap,
    #[error("invalid credential record: {0}")]
    InvalidFormat(String),
    #[error("credential mutex poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, CredentialError>;

/// The persisted passkey registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    /// Hex-encoded raw credential id.
    pub credential_id: String,
    pub hkdf_salt: String,
    pub encrypted_primary_key: String,
    #[serde(rename = "encryptionIV")]
    pub encryption_iv: String,
    pub created_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn raw_credential_id(&self) -> Result<Vec<u8>> {
        Ok(hex::decode(&self.credential_id)?)
    }
}

fn decode_fixed<const N: usize>(value_b64: &str, field: &str) -> Result<[u8; N]> {
    let decoded = STANDARD.decode(value_b64)?;
    let decoded_len = decoded.len();
    decoded.try_into().map_err(|_| {
        CredentialError::InvalidFormat(format!(
            "{field} must decode to {N} bytes (got {decoded_len})"
        ))
    })
}

/// Single-row SQLite table holding the [`CredentialRecord`].
#[derive(Debug, Clone)]
pub struct CredentialStore {
    conn: Arc<Mutex<Connection>>,
}

impl CredentialStore {
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::init_credentials(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CredentialError::Poisoned)
    }

    pub fn load(&self) -> Result<Option<CredentialRecord>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM credentials WHERE name = ?1",
                params![CREDENTIAL_ROW],
                |r| r.get(0),
            )
            .optional()?;
        Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }

    /// Replaces the stored registration in a single statement.
    pub fn save(&self, record: &CredentialRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO credentials (name, value) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET value = excluded.value
            "#,
            params![CREDENTIAL_ROW, serde_json::to_string(record)?],
        )?;
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM credentials WHERE name = ?1", params![CREDENTIAL_ROW])?;
        Ok(())
    }
}

pub struct CredentialManager {
    authenticator: Arc<dyn PlatformAuthenticator>,
    store: CredentialStore,
    relying_party: RelyingParty,
    cached: Mutex<Option<CredentialRecord>>,
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager")
            .field("store", &self.store)
            .field("relying_party", &self.relying_party)
            .finish_non_exhaustive()
    }
}

impl CredentialManager {
    pub fn new(
        authenticator: Arc<dyn PlatformAuthenticator>,
        store: CredentialStore,
        relying_party: RelyingParty,
    ) -> Self {
        Self {
            authenticator,
            store,
            relying_party,
            cached: Mutex::new(None),
        }
    }

    fn cache(&self) -> Result<MutexGuard<'_, Option<CredentialRecord>>> {
        self.cached.lock().map_err(|_| CredentialError::Poisoned)
    }

    pub fn relying_party(&self) -> &RelyingParty {
        &self.relying_party
    }

    /// Creates a platform credential and wraps `secret` under it.
    ///
    /// Any previous registration is replaced. If the authenticator fails
    /// nothing is written and the previous registration stays usable.
    pub fn register_credential(&self, secret: &str) -> Result<CredentialRecord> {
        let options = CreationOptions {
            challenge: crypto::random_bytes(),
            relying_party: self.relying_party.clone(),
            user: UserEntity {
                id: uuid::Uuid::new_v4().as_bytes().to_vec(),
                name: USER_NAME.to_string(),
                display_name: USER_DISPLAY_NAME.to_string(),
            },
            attachment: AuthenticatorAttachment::Platform,
            resident_key_required: true,
            user_verification: UserVerification::Required,
            timeout: DEFAULT_CEREMONY_TIMEOUT,
        };
        let created = self.authenticator.create_credential(&options).map_err(|err| {
            log::warn!("passkey registration failed: {err}");
            CredentialError::from(err)
        })?;

        let hkdf_salt = crypto::random_bytes::<HKDF_SALT_LEN>();
        let iv = crypto::random_bytes::<IV_LEN>();
        let wrapping_key = crypto::derive_wrapping_key(&created.raw_id, &hkdf_salt)?;
        let wrapped = crypto::seal(&wrapping_key, &iv, &[], secret.as_bytes())?;

        let record = CredentialRecord {
            credential_id: hex::encode(&created.raw_id),
            hkdf_salt: STANDARD.encode(hkdf_salt),
            encrypted_primary_key: STANDARD.encode(wrapped),
            encryption_iv: STANDARD.encode(iv),
            created_at: Utc::now(),
        };
        self.store.save(&record)?;
        *self.cache()? = Some(record.clone());

        log::info!("registered passkey credential");
        Ok(record)
    }

    /// Runs an assertion for the registered credential and returns the
    /// unwrapped secret.
    pub fn authenticate_credential(&self) -> Result<Zeroizing<Vec<u8>>> {
        let record = self.credential()?.ok_or(CredentialError::NoCredential)?;
        let credential_id = record.raw_credential_id()?;

        let options = RequestOptions {
            challenge: crypto::random_bytes(),
            rp_id: self.relying_party.id.clone(),
            allow_credentials: vec![credential_id.clone()],
            user_verification: UserVerification::Required,
            timeout: DEFAULT_CEREMONY_TIMEOUT,
        };
        let assertion = self.authenticator.get_assertion(&options).map_err(|err| {
            log::warn!("passkey assertion failed: {err}");
            CredentialError::from(err)
        })?;
        if assertion.credential_id != credential_id {
            log::warn!("passkey assertion returned an unexpected credential");
            return Err(CredentialError::CredentialMismatch);
        }

        let hkdf_salt = decode_fixed::<HKDF_SALT_LEN>(&record.hkdf_salt, "hkdfSalt")?;
        let iv = decode_fixed::<IV_LEN>(&record.encryption_iv, "encryptionIV")?;
        let wrapped = STANDARD.decode(&record.encrypted_primary_key)?;

        let wrapping_key = crypto::derive_wrapping_key(&credential_id, &hkdf_salt)?;
        crypto::open(&wrapping_key, &iv, &[], &wrapped).map_err(|_| CredentialError::Unwrap)
    }

    /// Forgets the registration. Calling it with nothing registered is fine.
    pub fn reset_credential(&self) -> Result<()> {
        self.store.delete()?;
        let had_cached = self.cache()?.take().is_some();
        if had_cached {
            log::info!("passkey credential reset");
        }
        Ok(())
    }

    pub fn is_registered(&self) -> Result<bool> {
        Ok(self.credential()?.is_some())
    }

    pub fn credential(&self) -> Result<Option<CredentialRecord>> {
        let mut cached = self.cache()?;
        if cached.is_none() {
            *cached = self.store.load()?;
        }
        Ok(cached.clone())
    }
}
