//! SQLite-backed encrypted key-value table (the "vault").
//!
//! One table holds every encrypted record plus the shared metadata row stored
//! under the [`METADATA_SENTINEL`] key:
//!
//! ```json
//! { "salt": "<base64(16 bytes)>", "iv": "<base64(12 bytes)>",
//!   "kdf": { "algorithm": "pbkdf2-hmac-sha256", "iterations": 100000 } }
//! ```
//!
//! Records are JSON envelopes. Two layouts are readable:
//!
//! ```json
//! { "ciphertext": "<base64>" }
//! { "ciphertext": "<base64>", "iv": "<base64(12 bytes)>", "schemaVersion": 1 }
//! ```
//!
//! The first (legacy) layout is sealed with the vault-wide IV and no AAD. The
//! second is what [`RecordStore::put`] writes: a fresh IV per write and an AAD
//! binding the ciphertext to its logical key, so a record copied under another
//! key fails authentication. Both layouts use the single vault key.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{self, CryptoError, KdfParams, KeyMaterial, IV_LEN, SALT_LEN};
use crate::schema;

pub const METADATA_SENTINEL: &str = "PLMSecureMetadata";
pub const UNLOCK_HINT_KEY: &str = "secureMetadata";
pub const RECORD_SCHEMA_VERSION: u32 = 1;

const AAD_SCOPE: &str = "palmirror-secure";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("no data stored under {0:?}")]
    NotFound(String),
    #[error("vault metadata is missing")]
    MissingMetadata,
    #[error("invalid stored data: {0}")]
    InvalidFormat(String),
    #[error("{0:?} is reserved for vault metadata")]
    ReservedKey(String),
    #[error("unsupported record schema version: {0}")]
    UnsupportedSchemaVersion(u32),
    #[error("storage mutex poisoned")]
    Poisoned,
}

impl StoreError {
    /// True when the failure is an AEAD authentication failure, i.e. the
    /// secret/key does not match the one the record was written with.
    pub fn is_wrong_key(&self) -> bool {
        matches!(self, StoreError::Crypto(CryptoError::Decrypt))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Shared salt/IV pair plus the KDF parameters of a vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultMetadata {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub kdf: KdfParams,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultMetadataJson {
    salt: String,
    iv: String,
    #[serde(default)]
    kdf: KdfParams,
}

impl VaultMetadata {
    fn generate(kdf: KdfParams) -> Self {
        Self {
            salt: crypto::random_bytes(),
            iv: crypto::random_bytes(),
            kdf,
        }
    }

    fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&VaultMetadataJson {
            salt: STANDARD.encode(self.salt),
            iv: STANDARD.encode(self.iv),
            kdf: self.kdf,
        })?)
    }

    fn from_json(raw: &str) -> Result<Self> {
        let parsed: VaultMetadataJson = serde_json::from_str(raw)?;
        parsed.kdf.validate()?;
        Ok(Self {
            salt: decode_fixed::<SALT_LEN>(&parsed.salt, "salt")?,
            iv: decode_fixed::<IV_LEN>(&parsed.iv, "iv")?,
            kdf: parsed.kdf,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptedRecord {
    ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema_version: Option<u32>,
}

#[derive(Serialize)]
struct RecordAad<'a> {
    key: &'a str,
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    scope: &'a str,
}

fn record_aad(key: &str, schema_version: u32) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&RecordAad {
        key,
        schema_version,
        scope: AAD_SCOPE,
    })?)
}

fn decode_fixed<const N: usize>(value_b64: &str, field: &str) -> Result<[u8; N]> {
    let decoded = STANDARD.decode(value_b64)?;
    let decoded_len = decoded.len();
    decoded.try_into().map_err(|_| {
        StoreError::InvalidFormat(format!("{field} must decode to {N} bytes (got {decoded_len})"))
    })
}

fn ensure_not_reserved(key: &str) -> Result<()> {
    if key == METADATA_SENTINEL {
        return Err(StoreError::ReservedKey(key.to_string()));
    }
    Ok(())
}

fn read_metadata(conn: &Connection) -> Result<Option<VaultMetadata>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM secure_records WHERE key = ?1",
            params![METADATA_SENTINEL],
            |r| r.get(0),
        )
        .optional()?;
    raw.map(|raw| VaultMetadata::from_json(&raw)).transpose()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretKind {
    Pin,
    Password,
}

/// Plaintext hint telling the unlock screen whether to render a PIN pad (and
/// of which length) or a password field. Never contains secret material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockHint {
    #[serde(rename = "type")]
    pub kind: SecretKind,
    pub length: usize,
}

impl UnlockHint {
    /// `length` counts UTF-16 code units, the unit the unlock screen measures
    /// input in.
    pub fn for_secret(kind: SecretKind, secret: &str) -> Self {
        Self {
            kind,
            length: secret.encode_utf16().count(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
    kdf: KdfParams,
}

impl RecordStore {
    /// `kdf` is only used if this call ends up creating the vault metadata.
    pub fn open_path(path: impl AsRef<Path>, kdf: KdfParams) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, kdf)
    }

    pub fn open_in_memory(kdf: KdfParams) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, kdf)
    }

    fn from_connection(conn: Connection, kdf: KdfParams) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::init_vault(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            kdf,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Reads the vault metadata without creating it.
    pub fn metadata(&self) -> Result<Option<VaultMetadata>> {
        let conn = self.conn()?;
        read_metadata(&conn)
    }

    /// Returns the vault metadata, creating it on first use.
    ///
    /// Creation goes through `INSERT OR IGNORE` and re-reads the row, so two
    /// racing first-time callers (even from separate connections) both end up
    /// with whichever record landed first.
    pub fn salt_and_iv(&self) -> Result<VaultMetadata> {
        let conn = self.conn()?;
        if let Some(existing) = read_metadata(&conn)? {
            return Ok(existing);
        }

        self.kdf.validate()?;
        let candidate = VaultMetadata::generate(self.kdf);
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO secure_records (key, value) VALUES (?1, ?2)",
            params![METADATA_SENTINEL, candidate.to_json()?],
        )?;
        if inserted == 1 {
            log::info!(
                "created vault metadata ({} iterations)",
                candidate.kdf.iterations
            );
        }

        read_metadata(&conn)?.ok_or_else(|| {
            StoreError::InvalidFormat("vault metadata missing after insert".to_string())
        })
    }

    /// True once the vault metadata exists, whether or not anything is unlocked.
    pub fn is_activated(&self) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM secure_records WHERE key = ?1)",
            params![METADATA_SENTINEL],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        ensure_not_reserved(key)?;
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM secure_records WHERE key = ?1)",
            params![key],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    /// Encrypts `value` and stores it under `key`, replacing any previous value.
    pub fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        material: KeyMaterial<'_>,
    ) -> Result<()> {
        ensure_not_reserved(key)?;
        let metadata = self.salt_and_iv()?;

        let iv = crypto::random_bytes::<IV_LEN>();
        let aad = record_aad(key, RECORD_SCHEMA_VERSION)?;
        let ciphertext =
            crypto::encrypt_json(value, material, &metadata.salt, &metadata.kdf, &iv, &aad)?;
        let record = EncryptedRecord {
            ciphertext: STANDARD.encode(ciphertext),
            iv: Some(STANDARD.encode(iv)),
            schema_version: Some(RECORD_SCHEMA_VERSION),
        };

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO secure_records (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, serde_json::to_string(&record)?],
        )?;
        log::debug!("stored secure record {key:?}");
        Ok(())
    }

    /// Reads and decrypts `key`.
    ///
    /// Fails with [`StoreError::NotFound`] if nothing was ever written there and
    /// with a wrong-key error (see [`StoreError::is_wrong_key`]) if `material`
    /// does not match.
    pub fn get<T: DeserializeOwned>(&self, key: &str, material: KeyMaterial<'_>) -> Result<T> {
        ensure_not_reserved(key)?;
        let (raw, metadata) = {
            let conn = self.conn()?;
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM secure_records WHERE key = ?1",
                    params![key],
                    |r| r.get(0),
                )
                .optional()?;
            (raw, read_metadata(&conn)?)
        };
        let raw = raw.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let metadata = metadata.ok_or(StoreError::MissingMetadata)?;

        let record: EncryptedRecord = serde_json::from_str(&raw)?;
        let ciphertext = STANDARD.decode(&record.ciphertext)?;

        let value = match record.iv {
            None => crypto::decrypt_json(
                &ciphertext,
                material,
                &metadata.salt,
                &metadata.kdf,
                &metadata.iv,
                &[],
            )?,
            Some(iv_b64) => {
                let version = record.schema_version.unwrap_or(RECORD_SCHEMA_VERSION);
                if version != RECORD_SCHEMA_VERSION {
                    return Err(StoreError::UnsupportedSchemaVersion(version));
                }
                let iv = decode_fixed::<IV_LEN>(&iv_b64, "iv")?;
                let aad = record_aad(key, version)?;
                crypto::decrypt_json(
                    &ciphertext,
                    material,
                    &metadata.salt,
                    &metadata.kdf,
                    &iv,
                    &aad,
                )?
            }
        };
        Ok(value)
    }

    /// Deletes `key`. Deleting a missing key is not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        ensure_not_reserved(key)?;
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM secure_records WHERE key = ?1", params![key])?;
        if removed > 0 {
            log::debug!("removed secure record {key:?}");
        }
        Ok(())
    }

    /// Every stored logical key; the metadata sentinel is not included.
    pub fn list_keys(&self) -> Result<BTreeSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM secure_records WHERE key != ?1")?;
        let rows = stmt.query_map(params![METADATA_SENTINEL], |r| r.get::<_, String>(0))?;

        let mut keys = BTreeSet::new();
        for key in rows {
            keys.insert(key?);
        }
        Ok(keys)
    }

    /// Deletes every record, the vault metadata and the unlock hint.
    ///
    /// Anything encrypted under the old vault is unrecoverable afterwards.
    pub fn wipe(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let records = tx.execute("DELETE FROM secure_records", [])?;
        tx.execute("DELETE FROM plaintext_settings", [])?;
        tx.commit()?;
        log::info!("wiped vault ({records} rows)");
        Ok(())
    }

    pub fn unlock_hint(&self) -> Result<Option<UnlockHint>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM plaintext_settings WHERE key = ?1",
                params![UNLOCK_HINT_KEY],
                |r| r.get(0),
            )
            .optional()?;
        Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
    }

    pub fn set_unlock_hint(&self, hint: &UnlockHint) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO plaintext_settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![UNLOCK_HINT_KEY, serde_json::to_string(hint)?],
        )?;
        Ok(())
    }
}
