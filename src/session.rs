//! Session lifecycle: create, renew, destroy
//!
//! A [`Client`] holds at most one session. The session is either absent
//! (`NoSession`) or active; a failed renewal or an explicit destroy returns it
//! to absent. Renewal is never scheduled automatically.

use std::time::Duration;

use hyper::Method;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::kv::encode_key;
use crate::query::Query;
use crate::types::{Empty, SessionConfig, SessionCreated, SessionEntry, SessionRequest};

/// Shortest TTL the server accepts
pub const MIN_SESSION_TTL: Duration = Duration::from_secs(10);

/// Longest TTL the server accepts
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

impl Client {
    /// Current session ID, if one is held
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Fail with [`Error::NoSession`] naming `label` unless a session is held.
    pub fn check_session(&self, label: &str) -> Result<()> {
        match self.session {
            Some(ref id) if !id.is_empty() => Ok(()),
            _ => Err(Error::NoSession(label.to_string())),
        }
    }

    /// Create a session and make it the client's current one.
    ///
    /// On failure the previous state is kept.
    pub async fn create_session(&mut self, ctx: &Context, config: SessionConfig) -> Result<String> {
        if let Some(ttl) = config.ttl {
            if !(MIN_SESSION_TTL..=MAX_SESSION_TTL).contains(&ttl) {
                return Err(Error::InvalidRequest(format!(
                    "Session TTL must be between {}s and {}s, got {:?}",
                    MIN_SESSION_TTL.as_secs(),
                    MAX_SESSION_TTL.as_secs(),
                    ttl
                )));
            }
        }

        let request = SessionRequest::from(&config);
        let created: SessionCreated = self
            .do_request(ctx, Method::PUT, "/v1/session/create", &Query::new(), &request)
            .await?;

        if let Some(previous) = self.session.replace(created.id.clone()) {
            warn!("Replacing session {} with {}; the old one expires on its TTL", previous, created.id);
        }
        info!("Created session {}", created.id);
        Ok(created.id)
    }

    /// Destroy the current session.
    ///
    /// Succeeds without a request when no session is held. Otherwise the local
    /// session is cleared whatever the server answers, and the server's error,
    /// if any, is returned.
    pub async fn destroy_session(&mut self, ctx: &Context) -> Result<()> {
        let Some(id) = self.session.take() else {
            return Ok(());
        };

        let path = format!("/v1/session/destroy/{}", encode_key(&id));
        let result: Result<bool> = self
            .do_request(ctx, Method::PUT, &path, &Query::new(), &Empty {})
            .await;

        match result {
            Ok(_) => {
                info!("Destroyed session {}", id);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to destroy session {} (left to expire): {}", id, e);
                Err(e)
            }
        }
    }

    /// Extend the current session's TTL.
    ///
    /// Any failure is treated as losing the session: the local ID is cleared
    /// before the error is returned.
    pub async fn renew_session(&mut self, ctx: &Context) -> Result<SessionEntry> {
        self.check_session("session renew")?;
        let id = self.session.clone().unwrap_or_default();

        let path = format!("/v1/session/renew/{}", encode_key(&id));
        let result: Result<Option<Vec<SessionEntry>>> = self
            .do_request(ctx, Method::PUT, &path, &Query::new(), &Empty {})
            .await;

        let renewed = match result {
            Ok(entries) => entries
                .and_then(|entries| entries.into_iter().find(|e| e.id == id))
                .ok_or_else(|| Error::SessionExpired(id.clone())),
            Err(e) => Err(e),
        };

        match renewed {
            Ok(entry) => {
                debug!("Renewed session {} (ttl {})", id, entry.ttl);
                Ok(entry)
            }
            Err(e) => {
                warn!("Session {} lost on renewal: {}", id, e);
                self.session = None;
                Err(e)
            }
        }
    }

    /// Read the current session's server-side record.
    ///
    /// `Ok(None)` means the server no longer knows the session; the local ID is
    /// left in place so the caller decides how to react.
    pub async fn session_info(&self, ctx: &Context) -> Result<Option<SessionEntry>> {
        self.check_session("session info")?;
        let id = self.session.as_deref().unwrap_or_default();

        let path = format!("/v1/session/info/{}", encode_key(id));
        let entries: Option<Vec<SessionEntry>> = self
            .do_request(ctx, Method::GET, &path, &Query::new(), &Empty {})
            .await?;

        Ok(entries.and_then(|entries| entries.into_iter().find(|e| e.id == id)))
    }

    /// Drop the local session ID without contacting the server
    pub(crate) fn forget_session(&mut self) {
        if let Some(id) = self.session.take() {
            warn!("Session {} is no longer valid", id);
        }
    }
}
