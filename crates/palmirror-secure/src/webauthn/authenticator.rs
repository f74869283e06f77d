use std::time::Duration;

use thiserror::Error;

use crate::config::RelyingParty;

pub const CHALLENGE_LEN: usize = 32;
pub const DEFAULT_CEREMONY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AuthenticatorError {
    #[error("the user cancelled the authenticator prompt")]
    Cancelled,
    #[error("the authenticator refused the request: {0}")]
    NotAllowed(String),
    #[error("no credential on this authenticator matches the request")]
    NoMatchingCredential,
    #[error("platform authenticator unavailable: {0}")]
    Unavailable(String),
    #[error("authenticator failure: {0}")]
    Hardware(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticatorAttachment {
    Platform,
    CrossPlatform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserVerification {
    Required,
    Preferred,
    Discouraged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntity {
    /// Opaque user handle, returned again by discoverable-credential assertions.
    pub id: Vec<u8>,
    pub name: String,
    pub display_name: String,
}

/// Parameters of a `navigator.credentials.create()`-style ceremony.
#[derive(Debug, Clone)]
pub struct CreationOptions {
    pub challenge: [u8; CHALLENGE_LEN],
    pub relying_party: RelyingParty,
    pub user: UserEntity,
    pub attachment: AuthenticatorAttachment,
    pub resident_key_required: bool,
    pub user_verification: UserVerification,
    pub timeout: Duration,
}

/// Parameters of a `navigator.credentials.get()`-style ceremony.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub challenge: [u8; CHALLENGE_LEN],
    pub rp_id: String,
    /// Empty means any discoverable credential for `rp_id` may answer.
    pub allow_credentials: Vec<Vec<u8>>,
    pub user_verification: UserVerification,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredential {
    pub raw_id: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub credential_id: Vec<u8>,
    pub user_handle: Option<Vec<u8>>,
}

/// A platform authenticator (Touch ID, Windows Hello, Android biometrics...).
///
/// Only the credential id is used as key material; attestation and assertion
/// signatures are not verified, as there is no server side to verify against.
pub trait PlatformAuthenticator: Send + Sync {
    fn create_credential(
        &self,
        options: &CreationOptions,
    ) -> Result<NewCredential, AuthenticatorError>;

    fn get_assertion(&self, options: &RequestOptions) -> Result<Assertion, AuthenticatorError>;
}
