use std::sync::Arc;

use palmirror_secure::{
    GeneralSettings, KdfParams, RecordKey, SecretKind, SecureConfig, SecureContext, SecureError,
    SecureState, SoftwareAuthenticator,
};
use serde_json::{json, Value};

fn open(dir: &std::path::Path, authenticator: &SoftwareAuthenticator) -> SecureContext {
    let config = SecureConfig::for_data_dir(dir).with_kdf(KdfParams::pbkdf2(64));
    SecureContext::open(&config, Arc::new(authenticator.clone())).expect("open secure context")
}

#[test]
fn pin_setup_reload_and_unlock() {
    let dir = tempfile::tempdir().expect("tempdir");
    let authenticator = SoftwareAuthenticator::new();

    let ctx = open(dir.path(), &authenticator);
    ctx.setup("135790", SecretKind::Pin).expect("setup");
    assert!(ctx.is_activated().expect("activated"));
    ctx.set_secure_data(RecordKey::chat("chat-1"), &json!([{ "role": "user", "content": "hi" }]))
        .expect("store chat");
    drop(ctx);

    // A fresh context stands in for a page reload: the vault is there, the key is not.
    let ctx = open(dir.path(), &authenticator);
    assert_eq!(ctx.state().expect("state"), SecureState::Locked);
    assert!(matches!(
        ctx.get_secure_data::<Value>("generalSettings"),
        Err(SecureError::SessionNotReady)
    ));

    assert!(!ctx.set_key("000000").expect("wrong pin"));
    assert_eq!(ctx.state().expect("state"), SecureState::Locked);
    assert!(matches!(
        ctx.get_secure_data::<Value>("chat-1"),
        Err(SecureError::SessionNotReady)
    ));

    assert!(ctx.set_key("135790").expect("right pin"));
    assert_eq!(
        ctx.get_secure_data::<Value>("generalSettings").expect("settings"),
        Some(json!({ "proxy": { "api_key": "" } }))
    );
    assert_eq!(
        ctx.get_secure_data::<Value>("chat-1").expect("chat"),
        Some(json!([{ "role": "user", "content": "hi" }]))
    );
}

#[test]
fn modified_settings_survive_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let authenticator = SoftwareAuthenticator::new();

    let ctx = open(dir.path(), &authenticator);
    ctx.setup("correct horse", SecretKind::Password).expect("setup");
    let mut settings = ctx.general_settings().expect("settings");
    settings.proxy.api_key = "sk-live".to_string();
    settings.extra.insert("theme".to_string(), json!("dark"));
    ctx.set_general_settings(&settings).expect("save");
    drop(ctx);

    let ctx = open(dir.path(), &authenticator);
    assert!(ctx.set_key("correct horse").expect("unlock"));
    let loaded: GeneralSettings = ctx.general_settings().expect("settings");
    assert_eq!(loaded, settings);
}

#[test]
fn vault_keeps_its_creation_kdf_params() {
    let dir = tempfile::tempdir().expect("tempdir");
    let authenticator = SoftwareAuthenticator::new();

    let ctx = open(dir.path(), &authenticator);
    ctx.setup("pw", SecretKind::Password).expect("setup");
    drop(ctx);

    // Reopening with different defaults must not change how the vault derives keys.
    let config = SecureConfig::for_data_dir(dir.path()).with_kdf(KdfParams::pbkdf2(1));
    let ctx = SecureContext::open(&config, Arc::new(authenticator)).expect("reopen");
    let metadata = ctx.store().metadata().expect("metadata").expect("present");
    assert_eq!(metadata.kdf.iterations, 64);
    assert!(ctx.set_key("pw").expect("unlock"));
}

#[test]
fn default_config_uses_100k_iterations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SecureConfig::for_data_dir(dir.path());
    let ctx = SecureContext::open(&config, Arc::new(SoftwareAuthenticator::new())).expect("open");

    ctx.setup("135790", SecretKind::Pin).expect("setup");
    let metadata = ctx.store().metadata().expect("metadata").expect("present");
    assert_eq!(metadata.kdf, KdfParams::default());
    assert_eq!(metadata.kdf.iterations, 100_000);
}

#[test]
fn removal_is_total() {
    let dir = tempfile::tempdir().expect("tempdir");
    let authenticator = SoftwareAuthenticator::new();

    let ctx = open(dir.path(), &authenticator);
    ctx.setup("pw", SecretKind::Password).expect("setup");
    ctx.set_api_key("default", "sk-1").expect("api key");
    ctx.remove_vault().expect("remove");
    drop(ctx);

    let ctx = open(dir.path(), &authenticator);
    assert!(!ctx.is_activated().expect("activated"));
    assert_eq!(ctx.state().expect("state"), SecureState::Uninitialized);
    assert!(matches!(ctx.set_key("pw"), Err(SecureError::VaultNotInitialized)));
    assert!(ctx.store().list_keys().expect("keys").is_empty());
    assert!(ctx.unlock_hint().expect("hint").is_none());
}
