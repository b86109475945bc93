//! An async client for the Consul HTTP API
//!
//! Every call goes through one dispatcher, [`Client::do_request`], which
//! encodes the query (always adding the client's datacenter), serializes a
//! JSON body, honors the call's [`Context`] and decodes the JSON response.
//! Sessions and locks are layered on top of it.
//!
//! # Features
//! - HTTP/1.1 and HTTP/2, with TLS through rustls
//! - Per-call cancellation and deadlines
//! - Session create/renew/destroy with a local "no session" guard
//! - Session-bound locks with loss detection
//! - Key-value get/put/delete/list
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use consul_client::{Client, Context, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), consul_client::Error> {
//!     let mut client = Client::new("http://localhost:8500")?;
//!     let ctx = Context::background().with_timeout(Duration::from_secs(5));
//!
//!     client.kv_put(&ctx, "config/theme", b"dark").await?;
//!     if let Some(pair) = client.kv_get(&ctx, "config/theme").await? {
//!         println!("theme = {}", String::from_utf8_lossy(&pair.value));
//!     }
//!
//!     client.create_session(&ctx, SessionConfig::with_ttl(Duration::from_secs(15))).await?;
//!     let mut lock = client.lock("locks/report");
//!     lock.acquire(&ctx, &mut client).await?;
//!     lock.release(&ctx, &mut client).await?;
//!     client.destroy_session(&ctx).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod kv;
pub mod lock;
pub mod query;
pub mod session;
pub mod types;

pub use client::Client;
pub use config::ClientConfig;
pub use context::Context;
pub use error::{Error, Result};
pub use lock::Lock;
pub use query::{encode_query, Param, Query};
pub use types::*;
