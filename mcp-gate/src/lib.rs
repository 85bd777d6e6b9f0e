//! # mcp-gate
//!
//! Authentication and transport-dispatch core for Model Context Protocol
//! servers.
//!
//! Protocol traffic is only forwarded to the engine once the caller's bearer
//! credential has been verified: signed tokens against the issuer's remote
//! key set, opaque tokens through a pluggable callback. Unauthenticated
//! callers get a 401 pointing at the RFC 9728 protected resource metadata.
//!
//! ## Features
//!
//! - **Token verification**: JWT checks against a cached remote key set,
//!   with issuer, audience and expiry validation
//! - **Opaque tokens**: delegated to an [`OpaqueTokenVerifier`], fail closed
//!   without one
//! - **Deferred services**: [`ServiceHandle`] lets the engine reference the
//!   data service before it exists
//! - **Transport dispatch**: streamable HTTP, SSE, message post and session
//!   teardown endpoints in front of one [`ProtocolEngine`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use mcp_gate::{GatewayConfig, GatewayServer};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = GatewayConfig::from_env()?;
//! let gateway = GatewayServer::builder()
//!     .config(config)
//!     .engine(my_engine)
//!     .service_factory(|| my_store())
//!     .build()?;
//!
//! let app = gateway.router();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod jwks;
pub mod services;
pub mod store;
pub mod token;

#[cfg(feature = "axum")]
pub mod auth;
#[cfg(feature = "axum")]
pub mod dispatch;
#[cfg(feature = "axum")]
pub mod server;

pub use config::{AuthConfig, ConfigError, GatewayConfig};
pub use error::{Error, Result};
pub use jwks::{KeySetProvider, RemoteKeySet};
pub use services::{ServiceFactory, ServiceHandle};
pub use store::{Note, NoteStore};
pub use token::{OpaqueTokenVerifier, TokenKind, TokenVerifier, classify};

#[cfg(feature = "axum")]
pub use auth::{AuthGate, Authenticated, CallerIdentity};
#[cfg(feature = "axum")]
pub use dispatch::{PROTOCOL_PATH, ProtocolEngine};
#[cfg(feature = "axum")]
pub use server::{GatewayServer, GatewayServerBuilder, SESSION_HEADER};
