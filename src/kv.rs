//! Key-value helpers over `/v1/kv/`

use bytes::Bytes;
use hyper::Method;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;

use crate::client::Client;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::query::Query;
use crate::types::{Empty, KvPair};

/// Characters allowed unencoded in URI path segments per RFC 3986.
/// `/` is kept so nested keys map onto nested paths.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b':')
    .remove(b'@')
    .remove(b'/');

/// Percent-encode a key for use in a URI path.
pub(crate) fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, PATH_SEGMENT).to_string()
}

/// Path of `key` under the KV endpoint
pub(crate) fn kv_path(key: &str) -> String {
    format!("/v1/kv/{}", encode_key(key.trim_start_matches('/')))
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim_start_matches('/').is_empty() {
        return Err(Error::InvalidRequest("Key cannot be empty".to_string()));
    }
    Ok(())
}

impl Client {
    /// Read a single key.
    ///
    /// # Returns
    /// The entry, or `None` if the key doesn't exist
    pub async fn kv_get(&self, ctx: &Context, key: &str) -> Result<Option<KvPair>> {
        validate_key(key)?;
        let result: Result<Vec<KvPair>> = self
            .do_request(ctx, Method::GET, &kv_path(key), &Query::new(), &Empty {})
            .await;
        match result {
            Ok(pairs) => Ok(pairs.into_iter().next()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store raw bytes under `key`.
    ///
    /// # Returns
    /// Whether the server applied the write
    pub async fn kv_put(&self, ctx: &Context, key: &str, value: &[u8]) -> Result<bool> {
        validate_key(key)?;
        let body = self
            .send_raw(
                ctx,
                Method::PUT,
                &kv_path(key),
                &Query::new(),
                Bytes::copy_from_slice(value),
            )
            .await?;
        let applied: bool = serde_json::from_slice(&body).map_err(Error::Decode)?;
        debug!("PUT {} ({} bytes) applied={}", key, value.len(), applied);
        Ok(applied)
    }

    /// Delete `key`.
    pub async fn kv_delete(&self, ctx: &Context, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.do_request(ctx, Method::DELETE, &kv_path(key), &Query::new(), &Empty {})
            .await
    }

    /// All entries whose key starts with `prefix`.
    pub async fn kv_list(&self, ctx: &Context, prefix: &str) -> Result<Vec<KvPair>> {
        let query = Query::new().with("recurse", "");
        let result: Result<Vec<KvPair>> = self
            .do_request(ctx, Method::GET, &kv_path(prefix), &query, &Empty {})
            .await;
        match result {
            Ok(pairs) => Ok(pairs),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
