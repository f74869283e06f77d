use std::sync::{Arc, Mutex, MutexGuard};

use super::authenticator::{
    Assertion, AuthenticatorError, CreationOptions, NewCredential, PlatformAuthenticator,
    RequestOptions,
};
use crate::crypto;

const CREDENTIAL_ID_LEN: usize = 16;

#[derive(Debug, Clone)]
struct SoftwareCredential {
    id: Vec<u8>,
    rp_id: String,
    user_handle: Vec<u8>,
}

#[derive(Debug, Default)]
struct SoftwareState {
    credentials: Vec<SoftwareCredential>,
    cancel_next: bool,
}

/// In-process authenticator for tests and headless builds.
///
/// Credentials live in memory only. Clones share state, so a test can keep a
/// handle to drive prompts while the credential manager owns another.
#[derive(Debug, Clone, Default)]
pub struct SoftwareAuthenticator {
    inner: Arc<Mutex<SoftwareState>>,
}

impl SoftwareAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, SoftwareState>, AuthenticatorError> {
        self.inner.lock().map_err(|_| {
            AuthenticatorError::Hardware("authenticator mutex is poisoned".to_string())
        })
    }

    /// The next ceremony fails with [`AuthenticatorError::Cancelled`], as if
    /// the user dismissed the prompt.
    pub fn cancel_next_prompt(&self) {
        if let Ok(mut state) = self.state() {
            state.cancel_next = true;
        }
    }

    /// Drops every credential, as if the device had been reset or replaced.
    pub fn forget_all(&self) {
        if let Ok(mut state) = self.state() {
            state.credentials.clear();
        }
    }

    pub fn credential_count(&self) -> usize {
        self.state().map(|state| state.credentials.len()).unwrap_or(0)
    }
}

impl PlatformAuthenticator for SoftwareAuthenticator {
    fn create_credential(
        &self,
        options: &CreationOptions,
    ) -> Result<NewCredential, AuthenticatorError> {
        let mut state = self.state()?;
        if std::mem::take(&mut state.cancel_next) {
            return Err(AuthenticatorError::Cancelled);
        }

        let id = crypto::random_bytes::<CREDENTIAL_ID_LEN>().to_vec();
        state.credentials.push(SoftwareCredential {
            id: id.clone(),
            rp_id: options.relying_party.id.clone(),
            user_handle: options.user.id.clone(),
        });
        Ok(NewCredential { raw_id: id })
    }

    fn get_assertion(&self, options: &RequestOptions) -> Result<Assertion, AuthenticatorError> {
        let mut state = self.state()?;
        if std::mem::take(&mut state.cancel_next) {
            return Err(AuthenticatorError::Cancelled);
        }

        let found = state
            .credentials
            .iter()
            .filter(|c| c.rp_id == options.rp_id)
            .find(|c| {
                options.allow_credentials.is_empty() || options.allow_credentials.contains(&c.id)
            })
            .ok_or(AuthenticatorError::NoMatchingCredential)?;

        Ok(Assertion {
            credential_id: found.id.clone(),
            user_handle: Some(found.user_handle.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::RelyingParty;
    use crate::webauthn::authenticator::{
        AuthenticatorAttachment, UserEntity, UserVerification, CHALLENGE_LEN,
        DEFAULT_CEREMONY_TIMEOUT,
    };

    fn creation(rp_id: &str) -> CreationOptions {
        CreationOptions {
            challenge: [0; CHALLENGE_LEN],
            relying_party: RelyingParty {
                id: rp_id.to_string(),
                name: "Test".to_string(),
            },
            user: UserEntity {
                id: vec![9; 16],
                name: "user".to_string(),
                display_name: "User".to_string(),
            },
            attachment: AuthenticatorAttachment::Platform,
            resident_key_required: true,
            user_verification: UserVerification::Required,
            timeout: DEFAULT_CEREMONY_TIMEOUT,
        }
    }

    fn request(rp_id: &str, allow: Vec<Vec<u8>>) -> RequestOptions {
        RequestOptions {
            challenge: [1; CHALLENGE_LEN],
            rp_id: rp_id.to_string(),
            allow_credentials: allow,
            user_verification: UserVerification::Required,
            timeout: DEFAULT_CEREMONY_TIMEOUT,
        }
    }

    #[test]
    fn assertion_returns_the_created_credential() {
        let authenticator = SoftwareAuthenticator::new();
        let created = authenticator.create_credential(&creation("rp.test")).expect("create");
        assert_eq!(created.raw_id.len(), CREDENTIAL_ID_LEN);

        let assertion = authenticator
            .get_assertion(&request("rp.test", vec![created.raw_id.clone()]))
            .expect("assert");
        assert_eq!(assertion.credential_id, created.raw_id);
        assert_eq!(assertion.user_handle, Some(vec![9; 16]));
    }

    #[test]
    fn credentials_are_scoped_to_their_relying_party() {
        let authenticator = SoftwareAuthenticator::new();
        authenticator.create_credential(&creation("rp.test")).expect("create");
        let err = authenticator
            .get_assertion(&request("other.test", Vec::new()))
            .expect_err("wrong rp");
        assert!(matches!(err, AuthenticatorError::NoMatchingCredential));
    }

    #[test]
    fn cancel_applies_to_one_prompt_only() {
        let authenticator = SoftwareAuthenticator::new();
        authenticator.cancel_next_prompt();
        let err = authenticator
            .create_credential(&creation("rp.test"))
            .expect_err("cancelled");
        assert!(matches!(err, AuthenticatorError::Cancelled));
        assert_eq!(authenticator.credential_count(), 0);

        authenticator.create_credential(&creation("rp.test")).expect("create");
        assert_eq!(authenticator.credential_count(), 1);
    }

    #[test]
    fn forget_all_loses_every_credential() {
        let authenticator = SoftwareAuthenticator::new();
        let created = authenticator.create_credential(&creation("rp.test")).expect("create");
        authenticator.forget_all();
        let err = authenticator
            .get_assertion(&request("rp.test", vec![created.raw_id]))
            .expect_err("forgotten");
        assert!(matches!(err, AuthenticatorError::NoMatchingCredential));
    }
}
