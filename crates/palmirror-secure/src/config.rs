use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::crypto::KdfParams;

pub const VAULT_DB_FILE_NAME: &str = "secure.sqlite3";
pub const CREDENTIAL_DB_FILE_NAME: &str = "credentials.sqlite3";

pub const DEFAULT_RELYING_PARTY_ID: &str = "palmirror.local";
pub const DEFAULT_RELYING_PARTY_NAME: &str = "PalMirror";

/// WebAuthn relying party the platform authenticator binds credentials to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    pub id: String,
    pub name: String,
}

impl Default for RelyingParty {
    fn default() -> Self {
        Self {
            id: DEFAULT_RELYING_PARTY_ID.to_string(),
            name: DEFAULT_RELYING_PARTY_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecureConfig {
    /// SQLite database holding the vault metadata, encrypted records and the
    /// plaintext unlock hint.
    pub vault_path: PathBuf,
    /// SQLite database holding the single passkey credential record.
    pub credential_path: PathBuf,
    /// Parameters used when a vault is created. Existing vaults keep the
    /// parameters stored in their metadata record.
    pub kdf: KdfParams,
    pub relying_party: RelyingParty,
}

impl SecureConfig {
    pub fn for_data_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            vault_path: dir.join(VAULT_DB_FILE_NAME),
            credential_path: dir.join(CREDENTIAL_DB_FILE_NAME),
            kdf: KdfParams::default(),
            relying_party: RelyingParty::default(),
        }
    }

    /// Platform data directory (e.g. `~/.local/share/palmirror` on Linux).
    pub fn from_project_dirs() -> Option<Self> {
        let proj = ProjectDirs::from("app", "PalMirror", "palmirror")?;
        Some(Self::for_data_dir(proj.data_local_dir().join("secure")))
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_relying_party(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.relying_party = RelyingParty {
            id: id.into(),
            name: name.into(),
        };
        self
    }
}
