//! In-process HTTP servers for integration tests
//!
//! `serve` runs a plain HTTP/1 server on a random local port and hands every
//! request to a closure. `FakeConsul` implements just enough of the session and
//! KV endpoints to exercise sessions and locks end to end.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use consul_client::query::decode_values;
use consul_client::{Client, ClientConfig};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::HeaderMap;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// A request as seen by the test server
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, Vec<String>>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.get(key).and_then(|v| v.first()).map(String::as_str)
    }
}

type Handler = Arc<dyn Fn(Recorded) -> (StatusCode, String) + Send + Sync>;

/// Running test server; stops accepting when dropped.
pub struct TestServer {
    pub url: String,
    shutdown: watch::Sender<bool>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub async fn serve<F>(handler: F) -> TestServer
where
    F: Fn(Recorded) -> (StatusCode, String) + Send + Sync + 'static,
{
    serve_with_delay(Duration::ZERO, handler).await
}

/// Like [`serve`], but every response is held back for `delay`.
pub async fn serve_with_delay<F>(delay: Duration, handler: F) -> TestServer
where
    F: Fn(Recorded) -> (StatusCode, String) + Send + Sync + 'static,
{
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Listener has no address");
    let handler: Handler = Arc::new(handler);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    let Ok((stream, _)) = result else { continue };
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let handler = handler.clone();
                            async move {
                                if !delay.is_zero() {
                                    tokio::time::sleep(delay).await;
                                }
                                Ok::<_, Infallible>(respond(&handler, req).await)
                            }
                        });
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    });
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    });

    TestServer {
        url: format!("http://{}", addr),
        shutdown: shutdown_tx,
    }
}

async fn respond(handler: &Handler, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|c| c.to_bytes())
        .unwrap_or_default();

    let recorded = Recorded {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: decode_values(parts.uri.query().unwrap_or("")),
        headers: parts.headers,
        body,
    };

    let (status, body) = handler(recorded);
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Client pointed at `url` in datacenter `dc1`, user agent `test`
pub fn client_for(url: &str) -> Client {
    Client::with_config(ClientConfig {
        address: url.to_string(),
        user_agent: Some("test".to_string()),
        datacenter: "dc1".to_string(),
        ..Default::default()
    })
    .expect("Failed to create client")
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    session: Option<String>,
    lock_index: u64,
    create_index: u64,
    modify_index: u64,
}

#[derive(Debug, Default)]
struct State {
    index: u64,
    sessions: HashSet<String>,
    kv: BTreeMap<String, Entry>,
}

impl State {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    fn invalidate(&mut self, id: &str) {
        self.sessions.remove(id);
        for entry in self.kv.values_mut() {
            if entry.session.as_deref() == Some(id) {
                entry.session = None;
            }
        }
    }
}

/// In-memory stand-in for the session and KV endpoints
#[derive(Debug, Default)]
pub struct FakeConsul {
    state: Mutex<State>,
}

impl FakeConsul {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start serving this fake
    pub async fn start(self: &Arc<Self>) -> TestServer {
        let fake = self.clone();
        serve(move |req| fake.handle(req)).await
    }

    /// Invalidate a session as if its TTL had elapsed
    pub fn expire(&self, id: &str) {
        self.state.lock().unwrap().invalidate(id);
    }

    pub fn has_session(&self, id: &str) -> bool {
        self.state.lock().unwrap().sessions.contains(id)
    }

    pub fn holder(&self, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.kv.get(key).and_then(|e| e.session.clone())
    }

    /// Pretend another party overwrote the lock holder
    pub fn steal(&self, key: &str, session: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.kv.get_mut(key) {
            entry.session = Some(session.to_string());
        }
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.kv.get(key).map(|e| e.value.clone())
    }

    pub fn handle(&self, req: Recorded) -> (StatusCode, String) {
        let mut state = self.state.lock().unwrap();
        let path = req.path.clone();

        if let Some(rest) = path.strip_prefix("/v1/session/") {
            return Self::session(&mut state, &req, rest);
        }
        if let Some(key) = path.strip_prefix("/v1/kv/") {
            return Self::kv(&mut state, &req, key);
        }
        (StatusCode::NOT_FOUND, String::new())
    }

    fn session(state: &mut State, req: &Recorded, rest: &str) -> (StatusCode, String) {
        let (op, id) = rest.split_once('/').unwrap_or((rest, ""));
        match (req.method.clone(), op) {
            (Method::PUT, "create") => {
                let id = format!("session-{}", state.next_index());
                state.sessions.insert(id.clone());
                (StatusCode::OK, json!({ "ID": id }).to_string())
            }
            (Method::PUT, "destroy") => {
                state.invalidate(id);
                (StatusCode::OK, "true".to_string())
            }
            (Method::PUT, "renew") if state.sessions.contains(id) => {
                (StatusCode::OK, json!([session_entry(id)]).to_string())
            }
            (Method::PUT, "renew") => (
                StatusCode::NOT_FOUND,
                format!("Session id '{}' not found", id),
            ),
            (Method::GET, "info") if state.sessions.contains(id) => {
                (StatusCode::OK, json!([session_entry(id)]).to_string())
            }
            (Method::GET, "info") => (StatusCode::OK, "null".to_string()),
            _ => (StatusCode::METHOD_NOT_ALLOWED, String::new()),
        }
    }

    fn kv(state: &mut State, req: &Recorded, key: &str) -> (StatusCode, String) {
        match req.method {
            Method::GET if req.query.contains_key("recurse") => {
                let pairs: Vec<_> = state
                    .kv
                    .iter()
                    .filter(|(k, _)| k.starts_with(key))
                    .map(|(k, e)| kv_pair(k, e))
                    .collect();
                if pairs.is_empty() {
                    (StatusCode::NOT_FOUND, String::new())
                } else {
                    (StatusCode::OK, json!(pairs).to_string())
                }
            }
            Method::GET => match state.kv.get(key) {
                Some(entry) => (StatusCode::OK, json!([kv_pair(key, entry)]).to_string()),
                None => (StatusCode::NOT_FOUND, String::new()),
            },
            Method::PUT => {
                if let Some(session) = req.param("acquire") {
                    return Self::acquire(state, key, session, &req.body);
                }
                if let Some(session) = req.param("release") {
                    return Self::release(state, key, session);
                }
                let index = state.next_index();
                let entry = state.kv.entry(key.to_string()).or_insert(Entry {
                    value: Vec::new(),
                    session: None,
                    lock_index: 0,
                    create_index: index,
                    modify_index: index,
                });
                entry.value = req.body.to_vec();
                entry.modify_index = index;
                (StatusCode::OK, "true".to_string())
            }
            Method::DELETE => {
                state.kv.remove(key);
                (StatusCode::OK, "true".to_string())
            }
            _ => (StatusCode::METHOD_NOT_ALLOWED, String::new()),
        }
    }

    fn acquire(state: &mut State, key: &str, session: &str, body: &Bytes) -> (StatusCode, String) {
        if !state.sessions.contains(session) {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("invalid session \"{}\"", session),
            );
        }
        let index = state.next_index();
        let entry = state.kv.entry(key.to_string()).or_insert(Entry {
            value: Vec::new(),
            session: None,
            lock_index: 0,
            create_index: index,
            modify_index: index,
        });
        if entry.session.as_deref().is_some_and(|holder| holder != session) {
            return (StatusCode::OK, "false".to_string());
        }
        if entry.session.is_none() {
            entry.lock_index += 1;
        }
        entry.session = Some(session.to_string());
        entry.value = body.to_vec();
        entry.modify_index = index;
        (StatusCode::OK, "true".to_string())
    }

    fn release(state: &mut State, key: &str, session: &str) -> (StatusCode, String) {
        if !state.sessions.contains(session) {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("invalid session \"{}\"", session),
            );
        }
        match state.kv.get_mut(key) {
            Some(entry) if entry.session.as_deref() == Some(session) => {
                entry.session = None;
                (StatusCode::OK, "true".to_string())
            }
            _ => (StatusCode::OK, "false".to_string()),
        }
    }
}

fn session_entry(id: &str) -> serde_json::Value {
    json!({
        "ID": id,
        "Name": "",
        "Node": "node-1",
        "Behavior": "release",
        "TTL": "15s",
        "LockDelay": 15000000000u64,
        "CreateIndex": 1,
        "ModifyIndex": 1
    })
}

fn kv_pair(key: &str, entry: &Entry) -> serde_json::Value {
    json!({
        "Key": key,
        "Value": STANDARD.encode(&entry.value),
        "Flags": 0,
        "Session": entry.session,
        "LockIndex": entry.lock_index,
        "CreateIndex": entry.create_index,
        "ModifyIndex": entry.modify_index
    })
}
