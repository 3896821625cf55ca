//! # outrelay-server
//!
//! HTTP dispatch layer in front of the connection manager.
//!
//! - `GET /line/{id}?<escaped line>`: relay one line
//! - `GET /close/{id}`: close a session
//! - `GET /keepalive/{id}`: keep an idle session open
//! - `GET /health`: liveness and open-session count
//!
//! Handlers reach the manager through [`LineHandler`], and shutdown is
//! driven by a `CancellationToken` in [`ShutdownCoordinator`].

#![deny(unsafe_code)]

pub mod config;
pub mod extract;
pub mod handlers;
pub mod health;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use extract::{ExtractError, extract_line};
pub use handlers::{LineHandler, status_for};
pub use server::{RelayServer, ServerHandle};
pub use shutdown::ShutdownCoordinator;
