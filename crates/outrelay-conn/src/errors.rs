//! Connection manager error types.

use outrelay_core::LineError;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors returned by [`ConnManager`](crate::ConnManager) operations.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The raw line does not match the line grammar.
    #[error(transparent)]
    InvalidLine(#[from] LineError),

    /// A line other than the first arrived for an id without a session.
    #[error("cannot send line with number {seq}: no existing connection")]
    NoConnection {
        /// Sequence number of the rejected line.
        seq: u64,
    },

    /// `close_conn` or `keep_alive` for an id without a session.
    #[error("connection not open")]
    NotOpen,

    /// The line could not be handed to the outbound stream. The session has
    /// been torn down.
    #[error("sending line: {0}")]
    SendFailed(#[source] PipeError),
}

/// Errors crossing the session pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipeError {
    /// The other end of the pipe is gone, or the session was torn down.
    #[error("pipe closed")]
    Closed,
}

/// Failures of a session's outbound request. Only ever logged.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the response headers never arrived.
    #[error("sending POST request: {0}")]
    Request(#[source] reqwest::Error),

    /// The collector answered with a non-success status.
    #[error("got non-OK response status {0}")]
    Status(StatusCode),

    /// Reading the response body failed.
    #[error("reading response body: {0}")]
    Body(#[source] reqwest::Error),
}
