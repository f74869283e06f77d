//! Logical record keys and the typed payloads stored under them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const GENERAL_SETTINGS_KEY: &str = "generalSettings";
pub const METADATA_PREFIX: &str = "METADATA";
pub const API_KEY_PREFIX: &str = "apiKey_";
pub const REC_TAG_SCORES_KEY: &str = "recTagScores";
pub const REC_DISLIKED_TAGS_KEY: &str = "recDislikedTags";
pub const REC_CHAR_HISTORY_KEY: &str = "recCharHistory";

/// Namespaces of the vault's logical keys.
///
/// `Entry` covers chat histories (stored under the bare chat id) and any other
/// application key; it is what every unrecognized storage key parses to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    GeneralSettings,
    /// Character/chat/domain state, `METADATA<id>`.
    Metadata(String),
    /// Per-profile provider key, `apiKey_<profileId>`.
    ApiKey(String),
    RecTagScores,
    RecDislikedTags,
    RecCharHistory,
    Entry(String),
}

impl RecordKey {
    pub fn parse(key: &str) -> Self {
        match key {
            GENERAL_SETTINGS_KEY => Self::GeneralSettings,
            REC_TAG_SCORES_KEY => Self::RecTagScores,
            REC_DISLIKED_TAGS_KEY => Self::RecDislikedTags,
            REC_CHAR_HISTORY_KEY => Self::RecCharHistory,
            _ => {
                if let Some(id) = key.strip_prefix(METADATA_PREFIX) {
                    Self::Metadata(id.to_string())
                } else if let Some(profile) = key.strip_prefix(API_KEY_PREFIX) {
                    Self::ApiKey(profile.to_string())
                } else {
                    Self::Entry(key.to_string())
                }
            }
        }
    }

    pub fn metadata(id: impl Into<String>) -> Self {
        Self::Metadata(id.into())
    }

    pub fn api_key(profile_id: impl Into<String>) -> Self {
        Self::ApiKey(profile_id.into())
    }

    /// Raw message history of a chat, keyed by the chat id itself.
    pub fn chat(chat_id: impl Into<String>) -> Self {
        Self::Entry(chat_id.into())
    }

    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GeneralSettings => f.write_str(GENERAL_SETTINGS_KEY),
            Self::Metadata(id) => write!(f, "{METADATA_PREFIX}{id}"),
            Self::ApiKey(profile) => write!(f, "{API_KEY_PREFIX}{profile}"),
            Self::RecTagScores => f.write_str(REC_TAG_SCORES_KEY),
            Self::RecDislikedTags => f.write_str(REC_DISLIKED_TAGS_KEY),
            Self::RecCharHistory => f.write_str(REC_CHAR_HISTORY_KEY),
            Self::Entry(key) => f.write_str(key),
        }
    }
}

impl From<&str> for RecordKey {
    fn from(key: &str) -> Self {
        Self::parse(key)
    }
}

impl From<String> for RecordKey {
    fn from(key: String) -> Self {
        Self::parse(&key)
    }
}

impl From<&RecordKey> for RecordKey {
    fn from(key: &RecordKey) -> Self {
        key.clone()
    }
}

/// Payload of the canonical `generalSettings` record. Its successful decryption
/// is what proves a candidate secret correct.
///
/// Fields this crate does not model are kept in `extra` and written back as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneralSettings {
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub value: String,
}
