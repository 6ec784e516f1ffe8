//! Incremental SSE frame decoder

use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use serde_json::Value;
use tokio_stream::Stream;

use crate::envelope::{DEFAULT_EVENT_TYPE, StreamEnvelope};
use crate::error::{Error, Result};

/// A stream of decoded envelopes for one connection
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<StreamEnvelope>> + Send>>;

/// Turns raw SSE bytes into envelopes.
///
/// Bytes are held until a newline arrives, so a multi-byte character split
/// across network chunks is decoded intact. The pending event type is sticky:
/// it stays in effect until the next `event:` line.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    event_type: Option<String>,
    data: String,
    has_data: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed arbitrary bytes and drain every frame they complete
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEnvelope> {
        self.buffer.extend_from_slice(chunk);
        let mut envelopes = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(envelope) = self.process_line(strip_cr(&line)) {
                envelopes.push(envelope);
            }
        }

        envelopes
    }

    /// Flush whatever the stream left unterminated
    pub fn finish(&mut self) -> Option<StreamEnvelope> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            if let Some(envelope) = self.process_line(strip_cr(&line)) {
                return Some(envelope);
            }
        }
        self.terminate()
    }

    /// Decode a complete SSE body in one shot
    pub fn decode_all(input: &str) -> Vec<StreamEnvelope> {
        let mut decoder = Self::new();
        let mut envelopes = decoder.feed(input.as_bytes());
        envelopes.extend(decoder.finish());
        envelopes
    }

    fn process_line(&mut self, line: &str) -> Option<StreamEnvelope> {
        if line.is_empty() {
            return self.terminate();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = field_value(line, "event") {
            self.event_type = Some(value.trim().to_string());
        } else if let Some(value) = field_value(line, "data") {
            self.data.push_str(value);
            self.has_data = true;
        }
        None
    }

    fn terminate(&mut self) -> Option<StreamEnvelope> {
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        let raw = std::mem::take(&mut self.data);
        let event_type = self
            .event_type
            .clone()
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());

        let payload = match serde_json::from_str::<Value>(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Non-JSON data for {}, keeping raw text: {}", event_type, e);
                Value::String(raw)
            }
        };

        Some(StreamEnvelope::new(event_type, payload))
    }
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Decode a byte stream into envelopes.
///
/// A read that stays idle for longer than `idle_timeout` ends the stream with
/// [`Error::IdleTimeout`]. A clean end of stream flushes any frame the server
/// did not terminate with a blank line.
pub fn decode_stream<S, B, E>(bytes: S, idle_timeout: Option<Duration>) -> EnvelopeStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut bytes = Box::pin(bytes);

    Box::pin(stream! {
        let mut decoder = FrameDecoder::new();

        loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, bytes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!("No bytes for {:?}, abandoning stream", limit);
                        yield Err(Error::IdleTimeout(limit));
                        return;
                    }
                },
                None => bytes.next().await,
            };

            match next {
                Some(Ok(chunk)) => {
                    for envelope in decoder.feed(chunk.as_ref()) {
                        yield Ok(envelope);
                    }
                }
                Some(Err(e)) => {
                    yield Err(Error::Stream(e.to_string()));
                    return;
                }
                None => break,
            }
        }

        if let Some(envelope) = decoder.finish() {
            yield Ok(envelope);
        }
    })
}
