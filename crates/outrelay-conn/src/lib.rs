//! # outrelay-conn
//!
//! The connection manager: maps a session id to a long-lived outbound
//! streaming request, opens it on the first line, writes every accepted line
//! into it in order, and closes it on request, on inactivity, on a failed
//! write, or when the collector ends the response.
//!
//! - [`ConnManager`]: `send` / `close_conn` / `keep_alive`
//! - [`pipe`]: the hand-off between `send` callers and the request body
//! - [`keepalive`]: the per-session resettable inactivity timer
//! - [`transport`]: the outbound request, behind the [`Transport`] trait

#![deny(unsafe_code)]

pub mod errors;
pub mod keepalive;
pub mod manager;
pub mod pipe;
pub mod transport;

pub use errors::{ConnError, PipeError, TransportError};
pub use manager::ConnManager;
pub use transport::{HttpTransport, Transport};
