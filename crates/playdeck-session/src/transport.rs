//! Transport abstraction for talking to the playground server

use async_trait::async_trait;
use playdeck_wire::{EnvelopeStream, HttpClient, Result, StreamEnvelope, TurnRequest};
use serde_json::Value;

/// The three server calls a session needs
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a step on the streaming endpoint
    async fn stream(&self, request: &TurnRequest) -> Result<EnvelopeStream>;

    /// Run a step on the buffered endpoint
    async fn run_buffered(&self, request: &TurnRequest) -> Result<Value>;

    /// Clear server-side history for a session
    async fn clear_session(&self, session_id: &str) -> Result<()>;

    /// Run a step on the buffered endpoint, presented as the envelopes the
    /// streaming endpoint would have produced
    async fn buffered_envelopes(&self, request: &TurnRequest) -> Result<EnvelopeStream> {
        let body = self.run_buffered(request).await?;
        let envelopes = StreamEnvelope::from_buffered(body);
        Ok(Box::pin(futures::stream::iter(envelopes.into_iter().map(Ok))))
    }
}

/// Transport over HTTP
pub struct HttpTransport {
    client: HttpClient,
}

impl HttpTransport {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn stream(&self, request: &TurnRequest) -> Result<EnvelopeStream> {
        self.client.stream(request).await
    }

    async fn run_buffered(&self, request: &TurnRequest) -> Result<Value> {
        self.client.run_buffered(request).await
    }

    async fn clear_session(&self, session_id: &str) -> Result<()> {
        self.client.clear_session(session_id).await
    }
}
