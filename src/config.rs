//! Client configuration and `CONSUL_*` environment loading

use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Default agent address
pub const DEFAULT_ADDRESS: &str = "http://localhost:8500";

/// Default datacenter name
pub const DEFAULT_DATACENTER: &str = "dc1";

/// Configuration options for the Consul client
#[derive(Clone)]
pub struct ClientConfig {
    /// Agent base URL (default: http://localhost:8500)
    pub address: String,
    /// Datacenter sent as `dc` with every request (default: dc1)
    pub datacenter: String,
    /// User-Agent header; `None` sends no header
    pub user_agent: Option<String>,
    /// ACL token sent as `X-Consul-Token`
    pub token: Option<String>,
    /// Per-request timeout in milliseconds, 0 disables it (default: 30000)
    pub timeout_ms: u64,
    /// Extra PEM CA bundle trusted for https addresses
    pub ca_file: Option<PathBuf>,
    /// Verify server certificates (default: true)
    pub reject_unauthorized: bool,
    /// Speak HTTP/2 only, including h2c on plain http (default: false)
    pub http2_only: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            datacenter: DEFAULT_DATACENTER.to_string(),
            user_agent: Some(concat!("consul-client/", env!("CARGO_PKG_VERSION")).to_string()),
            token: None,
            timeout_ms: 30000,
            ca_file: None,
            reject_unauthorized: true,
            http2_only: false,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("address", &self.address)
            .field("datacenter", &self.datacenter)
            .field("user_agent", &self.user_agent)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("ca_file", &self.ca_file)
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("http2_only", &self.http2_only)
            .finish()
    }
}

impl ClientConfig {
    /// Build a configuration from the `CONSUL_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let use_tls = parse_bool("CONSUL_HTTP_SSL")?.unwrap_or(false);
        let address = env::var("CONSUL_HTTP_ADDR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| normalize_address(s.trim(), use_tls))
            .unwrap_or(defaults.address);

        let token = env::var("CONSUL_HTTP_TOKEN").ok().filter(|s| !s.is_empty());
        let datacenter = env::var("CONSUL_DATACENTER").unwrap_or(defaults.datacenter);
        let user_agent = env::var("CONSUL_USER_AGENT").ok().or(defaults.user_agent);

        let timeout_ms = env::var("CONSUL_HTTP_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.timeout_ms);

        let reject_unauthorized = parse_bool("CONSUL_HTTP_SSL_VERIFY")?.unwrap_or(true);
        let ca_file = env::var("CONSUL_CACERT")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(ClientConfig {
            address,
            datacenter,
            user_agent,
            token,
            timeout_ms,
            ca_file,
            reject_unauthorized,
            http2_only: false,
        })
    }
}

/// Prefix a scheme when the address is a bare `host:port`
fn normalize_address(address: &str, use_tls: bool) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else if use_tls {
        format!("https://{}", address)
    } else {
        format!("http://{}", address)
    }
}

fn parse_bool(name: &str) -> Result<Option<bool>> {
    let Ok(raw) = env::var(name) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        other => Err(Error::Config(format!("{} must be a boolean, got '{}'", name, other))),
    }
}
