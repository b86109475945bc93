//! HTTP client and request dispatcher

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, USER_AGENT};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::rt::TokioExecutor;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use zeroize::Zeroize;

use crate::config::ClientConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::query::{encode_query, Query};

/// Header carrying the ACL token.
pub const TOKEN_HEADER: &str = "x-consul-token";

/// ACL token that zeros its memory on drop.
struct AuthToken(String);

impl AuthToken {
    fn new(token: String) -> Self {
        Self(token)
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

impl Drop for AuthToken {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Skips server certificate checks when `reject_unauthorized` is off.
///
/// Handshake signatures are still verified with the provider's algorithms.
#[derive(Debug)]
struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCert {
    fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &ServerName<'_>,
        _: &[u8],
        _: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Add the PEM certificates in `path` to `roots`.
fn load_ca_file(path: &Path, roots: &mut rustls::RootCertStore) -> Result<()> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("Failed to open CA file '{}': {}", path.display(), e)))?;

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Tls(format!("Failed to parse CA file: {}", e)))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "CA file '{}' contains no certificates",
            path.display()
        )));
    }

    let (added, _) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(Error::Tls(format!(
            "CA file '{}' contains no usable certificates",
            path.display()
        )));
    }
    Ok(())
}

/// Build a rustls ClientConfig for TLS connections.
fn build_tls_config(ca_file: Option<&Path>, reject_unauthorized: bool) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    if !reject_unauthorized {
        let verifier = Arc::new(AcceptAnyServerCert::new(&provider));

        return Ok(rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth());
    }

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(path) = ca_file {
        load_ca_file(path, &mut roots)?;
    }

    Ok(rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Read a response body to bytes
async fn read_body_to_bytes(body: Incoming) -> Result<Bytes> {
    body.collect()
        .await
        .map_err(|e| Error::Connection(format!("Failed to read body: {}", e)))
        .map(|c| c.to_bytes())
}

/// Decode a JSON response; an empty body decodes as `null`.
fn decode_body<R: DeserializeOwned>(body: &[u8]) -> Result<R> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        body
    };
    serde_json::from_slice(body).map_err(Error::Decode)
}

type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;

/// Client for the Consul HTTP API
///
/// Holds at most one session. Methods that create, renew or destroy it take
/// `&mut self`; share a client between tasks behind a `tokio::sync::Mutex`.
///
/// # Example
/// ```rust,no_run
/// use consul_client::{Client, Context, Empty, Query};
/// use hyper::Method;
///
/// #[tokio::main]
/// async fn main() -> Result<(), consul_client::Error> {
///     let client = Client::new("http://localhost:8500")?;
///     let ctx = Context::background();
///     let leader: String = client
///         .do_request(&ctx, Method::GET, "/v1/status/leader", &Query::new(), &Empty {})
///         .await?;
///     println!("leader: {}", leader);
///     Ok(())
/// }
/// ```
pub struct Client {
    config: Arc<ClientConfig>,
    token: Option<AuthToken>,
    http_client: HttpClient<HttpsConnector, Full<Bytes>>,
    pub(crate) session: Option<String>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.config.address)
            .field("datacenter", &self.config.datacenter)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client for `address` with default settings
    ///
    /// # Errors
    /// Returns an error if the address is not an http(s) URL
    pub fn new(address: &str) -> Result<Self> {
        let config = ClientConfig {
            address: address.to_string(),
            ..Default::default()
        };
        Self::with_config(config)
    }

    /// Create a client with custom configuration
    pub fn with_config(mut config: ClientConfig) -> Result<Self> {
        let uri: Uri = config
            .address
            .parse()
            .map_err(|e| Error::InvalidUrl(format!("Invalid address: {}", e)))?;
        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => {
                return Err(Error::InvalidUrl(format!(
                    "Address must start with http:// or https://: {}",
                    config.address
                )))
            }
        }

        let tls_config = build_tls_config(config.ca_file.as_deref(), config.reject_unauthorized)?;

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        let http_client = HttpClient::builder(TokioExecutor::new())
            .http2_only(config.http2_only)
            .build(https_connector);

        let token = config.token.take().map(AuthToken::new);

        Ok(Self {
            config: Arc::new(config),
            token,
            http_client,
            session: None,
        })
    }

    /// Base address requests are sent to
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Datacenter appended to every request
    pub fn datacenter(&self) -> &str {
        &self.config.datacenter
    }

    /// User-Agent header value, if any
    pub fn user_agent(&self) -> Option<&str> {
        self.config.user_agent.as_deref()
    }

    /// Issue one request and decode the JSON response.
    ///
    /// `body` is always serialized; pass [`Empty`](crate::Empty) when there is
    /// no payload. Use [`serde::de::IgnoredAny`] as `R` to discard the response.
    ///
    /// # Errors
    /// - [`Error::Connection`], [`Error::Timeout`], [`Error::Canceled`] on transport failure
    /// - [`Error::Status`] for any non-2xx response, with the status code preserved
    /// - [`Error::Decode`] when the body is not JSON of the expected shape
    pub async fn do_request<S, R>(
        &self,
        ctx: &Context,
        method: Method,
        path: &str,
        query: &Query,
        body: &S,
    ) -> Result<R>
    where
        S: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(Error::Encode)?;
        let response = self
            .send_raw(ctx, method, path, query, Bytes::from(payload))
            .await?;
        decode_body(&response)
    }

    /// Issue one request with a raw body and return the raw response body.
    pub async fn send_raw(
        &self,
        ctx: &Context,
        method: Method,
        path: &str,
        query: &Query,
        body: Bytes,
    ) -> Result<Bytes> {
        if !path.starts_with('/') {
            return Err(Error::InvalidRequest(format!(
                "Path must start with '/': {}",
                path
            )));
        }
        let uri = self.request_uri(path, query)?;

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");

        if let Some(user_agent) = &self.config.user_agent {
            builder = builder.header(USER_AGENT, user_agent.as_str());
        }
        if let Some(token) = &self.token {
            builder = builder.header(TOKEN_HEADER, token.as_str());
        }

        let req = builder
            .body(Full::new(body))
            .map_err(|e| Error::InvalidRequest(format!("Failed to build request: {}", e)))?;

        if ctx.is_canceled() {
            return Err(Error::Canceled);
        }

        debug!("Sending request: {} {}", method, path);

        let deadline = self.deadline(ctx);
        let budget_ms = deadline
            .map(|at| at.saturating_duration_since(Instant::now()).as_millis() as u64)
            .unwrap_or(0);

        let exchange = async {
            let response = self
                .http_client
                .request(req)
                .await
                .map_err(|e| Error::Connection(format!("Request failed: {}", e)))?;
            let status = response.status();
            let body = read_body_to_bytes(response.into_body()).await?;
            Ok::<(StatusCode, Bytes), Error>((status, body))
        };

        let timed = async {
            match deadline {
                Some(at) => match tokio::time::timeout_at(at, exchange).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(budget_ms)),
                },
                None => exchange.await,
            }
        };

        let (status, body) = tokio::select! {
            _ = ctx.cancelled() => return Err(Error::Canceled),
            result = timed => result?,
        };

        debug!("{} {} -> {}", method, path, status);

        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }
        Ok(body)
    }

    /// Earliest of the context deadline and the configured timeout
    fn deadline(&self, ctx: &Context) -> Option<Instant> {
        let configured = (self.config.timeout_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(self.config.timeout_ms));
        match (ctx.deadline(), configured) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn request_uri(&self, path: &str, query: &Query) -> Result<Uri> {
        let base = self.config.address.trim_end_matches('/');
        let encoded = encode_query(query, &self.config.datacenter);
        format!("{}{}?{}", base, path, encoded)
            .parse()
            .map_err(|e| Error::InvalidUrl(format!("Invalid request URL: {}", e)))
    }
}
