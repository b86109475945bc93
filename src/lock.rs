//! Session-bound distributed locks
//!
//! A [`Lock`] remembers the session it was acquired under. The client's
//! session can be destroyed, replaced or found invalid at any time; once it no
//! longer matches, the lock is considered lost and reverts to unheld.

use hyper::Method;
use tracing::{info, warn};

use crate::client::Client;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::kv::kv_path;
use crate::query::Query;
use crate::types::LockMarker;

/// A named mutual-exclusion lock backed by a KV key.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use consul_client::{Client, Context, SessionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), consul_client::Error> {
/// let mut client = Client::new("http://localhost:8500")?;
/// let ctx = Context::background();
/// client.create_session(&ctx, SessionConfig::with_ttl(Duration::from_secs(15))).await?;
///
/// let mut lock = client.lock("service/web/leader");
/// lock.acquire(&ctx, &mut client).await?;
/// // ... critical section, renewing the session within its TTL ...
/// lock.release(&ctx, &mut client).await?;
/// client.destroy_session(&ctx).await?;
/// # Ok(())
/// # }
/// ```
///
/// There is exactly one owner of a held lock; `Lock` is not `Clone`.
///
/// ```compile_fail
/// let lock = consul_client::Lock::new("locks/a");
/// let copy = lock.clone();
/// ```
#[derive(Debug, PartialEq, Eq)]
pub struct Lock {
    key: String,
    /// Session the lock was acquired under; `None` while unheld.
    held_by: Option<String>,
}

impl Client {
    /// An unheld lock on `key`
    pub fn lock(&self, key: impl Into<String>) -> Lock {
        Lock::new(key)
    }
}

impl Lock {
    /// An unheld lock on `key`
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            held_by: None,
        }
    }

    /// Key guarded by this lock
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True if the lock was acquired under the client's current session.
    ///
    /// This is a local check; use [`verify`](Self::verify) to confirm with the
    /// server.
    pub fn is_held(&self, client: &Client) -> bool {
        match (&self.held_by, client.session_id()) {
            (Some(ours), Some(current)) => ours == current,
            _ => false,
        }
    }

    /// Acquire the lock for the client's session.
    ///
    /// # Errors
    /// - [`Error::NoSession`] before any request when the client holds no session
    /// - [`Error::LockHeld`] when another session holds the key
    /// - any dispatch error; a rejection for an unknown session also clears
    ///   the client's session
    pub async fn acquire(&mut self, ctx: &Context, client: &mut Client) -> Result<()> {
        client.check_session("lock acquire")?;
        let session = client.session_id().unwrap_or_default().to_string();
        self.drop_if_lost(client);

        let query = Query::new().with("acquire", session.as_str());
        let marker = LockMarker {
            session: session.clone(),
        };
        let result: Result<bool> = client
            .do_request(ctx, Method::PUT, &kv_path(&self.key), &query, &marker)
            .await;

        match result {
            Ok(true) => {
                info!("Acquired lock {} with session {}", self.key, session);
                self.held_by = Some(session);
                Ok(())
            }
            Ok(false) => {
                self.held_by = None;
                Err(Error::LockHeld(self.key.clone()))
            }
            Err(e) => {
                self.held_by = None;
                if e.is_session_invalid() {
                    client.forget_session();
                }
                Err(e)
            }
        }
    }

    /// Release the lock.
    ///
    /// A no-op when unheld, or when the session it was taken under is already
    /// gone (the server released it then). Otherwise the lock becomes unheld
    /// whatever the server answers, and the server's error is returned.
    pub async fn release(&mut self, ctx: &Context, client: &mut Client) -> Result<()> {
        if self.drop_if_lost(client) {
            return Ok(());
        }
        let Some(session) = self.held_by.take() else {
            return Ok(());
        };

        let query = Query::new().with("release", session.as_str());
        let marker = LockMarker {
            session: session.clone(),
        };
        let result: Result<bool> = client
            .do_request(ctx, Method::PUT, &kv_path(&self.key), &query, &marker)
            .await;

        match result {
            Ok(true) => {
                info!("Released lock {}", self.key);
                Ok(())
            }
            Ok(false) => {
                warn!("Lock {} was not held by session {} at release", self.key, session);
                Ok(())
            }
            Err(e) => {
                if e.is_session_invalid() {
                    client.forget_session();
                }
                warn!("Failed to release lock {}: {}", self.key, e);
                Err(e)
            }
        }
    }

    /// Confirm with the server that this lock is still held by our session.
    ///
    /// Returns `false`, and reverts to unheld, when the key is gone or records
    /// a different holder.
    pub async fn verify(&mut self, ctx: &Context, client: &mut Client) -> Result<bool> {
        if self.drop_if_lost(client) || self.held_by.is_none() {
            return Ok(false);
        }

        let pair = client.kv_get(ctx, &self.key).await?;
        let holder = pair.and_then(|p| p.session);
        if holder.is_some() && holder == self.held_by {
            return Ok(true);
        }

        warn!("Lock {} is no longer held by session {:?}", self.key, self.held_by);
        self.held_by = None;
        Ok(false)
    }

    /// Revert to unheld if the client's session no longer matches.
    /// Returns true if the lock was lost.
    fn drop_if_lost(&mut self, client: &Client) -> bool {
        match &self.held_by {
            Some(ours) if client.session_id() != Some(ours.as_str()) => {
                warn!("Lock {} lost with session {}", self.key, ours);
                self.held_by = None;
                true
            }
            _ => false,
        }
    }
}
