//! # outrelay-core
//!
//! Shared vocabulary for the outrelay crates:
//!
//! - **Session ids**: [`SessionId`], the opaque caller-assigned key of a relayed stream
//! - **Line grammar**: [`SequencedLine`] parsing and [`LineError`]
//! - **Keepalive window**: [`KEEPALIVE_WINDOW`], shared by every session
//! - **Logging**: subscriber setup and a capturing layer for tests

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod line;
pub mod logging;

pub use constants::KEEPALIVE_WINDOW;
pub use ids::SessionId;
pub use line::{LineError, SequencedLine};
