//! playdeck-wire: wire protocol for the tool playground event stream
//!
//! This crate owns everything that touches bytes on the network: the
//! request body, the SSE frame decoder, typed event payloads, usage and cost
//! accounting, and the HTTP client for the three playground endpoints.

mod de;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod http;
pub mod types;
pub mod usage;

pub use envelope::{DedupKey, StreamEnvelope, WireEvent};
pub use error::{Error, Result};
pub use frame::{EnvelopeStream, FrameDecoder, decode_stream};
pub use http::{Endpoints, HttpClient, HttpFailure};
pub use types::*;
pub use usage::{CostBreakdown, RateCard, RateTable, UsageSnapshot};
