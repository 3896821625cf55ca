//! Outbound transport.
//!
//! [`Transport::stream`] runs one session's outbound request to completion:
//! the pipe's read end is the request body, and the call returns once the
//! collector has finished the response. [`HttpTransport`] does this with a
//! streaming `POST` over `reqwest`; tests substitute in-memory collectors.

use async_trait::async_trait;
use outrelay_core::SessionId;
use reqwest::{Body, Client};
use tracing::debug;

use crate::errors::TransportError;
use crate::pipe::PipeReader;

/// Carries a session's pipe to the collector.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Stream `body` to the collector for `id`.
    ///
    /// Returns `Ok(())` when the collector accepted the stream and then ended
    /// its response normally. Any other outcome is an error.
    async fn stream(&self, id: &SessionId, body: PipeReader) -> Result<(), TransportError>;
}

/// Streams each session as the body of a `POST <base>/<id>` request.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport posting under `base_url`.
    ///
    /// Trailing slashes on `base_url` are collapsed into exactly one.
    pub fn new(base_url: &str, client: Client) -> Self {
        Self {
            client,
            base_url: format!("{}/", base_url.trim_end_matches('/')),
        }
    }

    /// Collector URL for a session; the id is encoded as one path segment.
    pub fn session_url(&self, id: &SessionId) -> String {
        format!("{}{}", self.base_url, urlencoding::encode(id.as_str()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn stream(&self, id: &SessionId, body: PipeReader) -> Result<(), TransportError> {
        let url = self.session_url(id);
        debug!(session = %id, %url, "opening outbound stream");

        let response = self
            .client
            .post(&url)
            .body(Body::wrap_stream(body))
            .send()
            .await
            .map_err(TransportError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }

        // Nothing useful comes back; drain until the collector hangs up.
        let mut response = response;
        while response
            .chunk()
            .await
            .map_err(TransportError::Body)?
            .is_some()
        {}
        Ok(())
    }
}
