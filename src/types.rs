//! Wire types for the Consul HTTP API

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};

/// Body with no fields; serializes as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// What the server does with locks held by a session when it is invalidated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBehavior {
    /// Locks are released
    #[default]
    Release,
    /// Locked keys are deleted
    Delete,
}

/// Parameters for creating a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Human-readable session name
    pub name: Option<String>,
    /// Time-to-live; the session must be renewed within it
    pub ttl: Option<Duration>,
    /// Behavior on invalidation
    pub behavior: SessionBehavior,
    /// Delay before a released lock can be re-acquired
    pub lock_delay: Option<Duration>,
}

impl SessionConfig {
    /// Session with a TTL and the default release behavior
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Default::default()
        }
    }

    /// Builder-style name setter
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// JSON body of `PUT /v1/session/create`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct SessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    pub behavior: SessionBehavior,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_delay: Option<String>,
}

impl From<&SessionConfig> for SessionRequest {
    fn from(config: &SessionConfig) -> Self {
        Self {
            name: config.name.clone(),
            ttl: config.ttl.map(format_duration),
            behavior: config.behavior,
            lock_delay: config.lock_delay.map(format_duration),
        }
    }
}

/// Response of `PUT /v1/session/create`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SessionCreated {
    #[serde(rename = "ID")]
    pub id: String,
}

/// A session as reported by `/v1/session/info` and `/v1/session/renew`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SessionEntry {
    /// Session ID
    #[serde(rename = "ID")]
    pub id: String,
    /// Session name
    pub name: String,
    /// Node the session is bound to
    pub node: String,
    /// Invalidation behavior
    pub behavior: SessionBehavior,
    /// TTL as reported by the server, e.g. `"15s"`
    #[serde(rename = "TTL")]
    pub ttl: String,
    /// Raft index at creation
    pub create_index: u64,
    /// Raft index at last modification
    pub modify_index: u64,
}

/// A key-value entry from `/v1/kv/`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct KvPair {
    /// Full key
    pub key: String,
    /// Decoded value bytes
    #[serde(deserialize_with = "decode_base64", skip_serializing)]
    pub value: Vec<u8>,
    /// Opaque user flags
    pub flags: u64,
    /// Session currently holding the key's lock
    pub session: Option<String>,
    /// Number of times the lock has been acquired
    pub lock_index: u64,
    /// Raft index at creation
    pub create_index: u64,
    /// Raft index at last modification
    pub modify_index: u64,
}

/// Value written to a lock key while it is held
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LockMarker {
    /// Holding session
    pub session: String,
}

fn decode_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    match encoded {
        Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
        None => Ok(Vec::new()),
    }
}

/// Format a duration the way Consul parses it (`"15s"`, `"1500ms"`)
pub(crate) fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}
