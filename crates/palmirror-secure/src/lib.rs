//! Client-side encryption for PalMirror's local chat storage.
//!
//! All secure records are sealed with one AES-256-GCM key derived from the
//! user's password or PIN. The crate exposes:
//! - PBKDF2/HKDF key derivation and AEAD helpers (`crypto`)
//! - A SQLite-backed encrypted key-value vault (`store`)
//! - The in-memory session key slot (`session`)
//! - The lock/unlock facade the application uses (`secure`)
//! - Optional passkey unlock through a platform authenticator (`webauthn`)
//!
//! There is no server, no recovery and no key rotation: forgetting the secret
//! (and losing the passkey) means the data is gone.

pub mod config;
pub mod crypto;
pub mod records;
mod schema;
pub mod secure;
pub mod session;
pub mod store;
pub mod webauthn;

pub use config::{RelyingParty, SecureConfig};
pub use crypto::{CryptoError, DerivedKey, KdfAlgorithm, KdfParams, KeyMaterial};
pub use records::{ApiKeyRecord, GeneralSettings, ProxySettings, RecordKey};
pub use secure::{SecureContext, SecureError, SecureState};
pub use session::SessionKeyHolder;
pub use store::{RecordStore, SecretKind, StoreError, UnlockHint, VaultMetadata};
pub use webauthn::authenticator::{AuthenticatorError, PlatformAuthenticator};
pub use webauthn::software::SoftwareAuthenticator;
pub use webauthn::{CredentialError, CredentialManager, CredentialRecord, CredentialStore};
