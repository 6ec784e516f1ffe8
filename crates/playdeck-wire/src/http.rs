//! HTTP client for the playground endpoints

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    envelope::StreamEnvelope,
    error::{Error, Result},
    frame::{EnvelopeStream, FrameDecoder, decode_stream},
    types::TurnRequest,
};

/// Maximum number of characters of an error body kept for display
pub const RAW_PREVIEW_LIMIT: usize = 800;

pub const DEFAULT_STREAM_PATH: &str = "/api/tool-playground/stream";
pub const DEFAULT_BUFFERED_PATH: &str = "/api/tool-playground/run";
pub const DEFAULT_CLEAR_PATH: &str = "/api/tool-playground/clear";

static HTML_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));

/// Structured description of a response that was not what the client asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpFailure {
    pub status: u16,
    pub status_text: String,
    pub content_type: Option<String>,
    pub raw_preview: String,
    /// The body was an HTML page, which means the server crashed rather
    /// than reporting a handled error
    pub is_html: bool,
    pub html_title: Option<String>,
    /// Message from a JSON error body
    pub message: Option<String>,
}

impl HttpFailure {
    /// Classify a response body
    pub fn classify(
        status: u16,
        status_text: &str,
        content_type: Option<&str>,
        body: &str,
    ) -> Self {
        let is_html = looks_like_html(body);
        let html_title = if is_html {
            HTML_TITLE
                .captures(body)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|t| !t.is_empty())
        } else {
            None
        };
        let message = if is_html {
            None
        } else {
            serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| json_error_message(&v))
        };

        Self {
            status,
            status_text: status_text.to_string(),
            content_type: content_type.map(str::to_string),
            raw_preview: truncate_chars(body, RAW_PREVIEW_LIMIT),
            is_html,
            html_title,
            message,
        }
    }

    /// One-line description for display
    pub fn summary(&self) -> String {
        let head = format!("HTTP {} {}", self.status, self.status_text)
            .trim_end()
            .to_string();
        if self.is_html {
            match &self.html_title {
                Some(title) => format!("{}: server returned an HTML error page ({})", head, title),
                None => format!("{}: server returned an HTML error page", head),
            }
        } else if let Some(message) = &self.message {
            format!("{}: {}", head, message)
        } else if self.raw_preview.trim().is_empty() {
            format!("{}: empty response body", head)
        } else {
            format!("{}: {}", head, truncate_chars(self.raw_preview.trim(), 200))
        }
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Heuristic: a body starting with `<!doctype` or `<html`
pub fn looks_like_html(body: &str) -> bool {
    let head: String = body
        .trim_start_matches('\u{feff}')
        .trim_start()
        .chars()
        .take(9)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

fn json_error_message(value: &Value) -> Option<String> {
    let candidate = value.get("error").or_else(|| value.get("message"))?;
    match candidate {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Truncate a string to `max` characters, appending "..." if truncated.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// Default whole-request limit for the buffered endpoint
pub const DEFAULT_BUFFERED_TIMEOUT: Duration = Duration::from_secs(600);

/// Endpoint URLs and their time limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub stream_url: String,
    pub buffered_url: String,
    pub clear_url: String,
    /// Longest silence tolerated between reads of the event stream
    pub idle_timeout: Option<Duration>,
    /// Limit on a whole buffered request
    pub buffered_timeout: Option<Duration>,
}

impl Endpoints {
    /// Endpoints under `base_url` using the default paths
    pub fn from_base(base_url: &str) -> Result<Self> {
        Self::with_paths(
            base_url,
            DEFAULT_STREAM_PATH,
            DEFAULT_BUFFERED_PATH,
            DEFAULT_CLEAR_PATH,
        )
    }

    /// Endpoints under `base_url` using custom paths
    pub fn with_paths(
        base_url: &str,
        stream_path: &str,
        buffered_path: &str,
        clear_path: &str,
    ) -> Result<Self> {
        let base = base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(Error::InvalidConfig("base_url is empty".into()));
        }
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "base_url must start with http:// or https://, got {}",
                base
            )));
        }
        let join = |path: &str| format!("{}/{}", base, path.trim_start_matches('/'));
        Ok(Self {
            stream_url: join(stream_path),
            buffered_url: join(buffered_path),
            clear_url: join(clear_path),
            idle_timeout: Some(Duration::from_secs(120)),
            buffered_timeout: Some(DEFAULT_BUFFERED_TIMEOUT),
        })
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_buffered_timeout(mut self, buffered_timeout: Option<Duration>) -> Self {
        self.buffered_timeout = buffered_timeout;
        self
    }
}

/// Client for the streaming, buffered and clear-session endpoints
pub struct HttpClient {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpClient {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// POST to the streaming endpoint and decode the event stream
    pub async fn stream(&self, request: &TurnRequest) -> Result<EnvelopeStream> {
        tracing::debug!(
            "POST {} (step {:?}, {} history turns)",
            self.endpoints.stream_url,
            request.step,
            request.chat_history.len()
        );

        let response = self
            .client
            .post(&self.endpoints.stream_url)
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let content_type = header_content_type(&response);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::status(HttpFailure::classify(
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                content_type.as_deref(),
                &body,
            )));
        }

        let is_sse = content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("text/event-stream"));
        if !is_sse {
            // Some deployments answer the streaming endpoint with a complete
            // body; read it whole and decide what it is.
            let body = response.text().await?;
            let envelopes = envelopes_from_body(
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                content_type.as_deref(),
                &body,
            )?;
            return Ok(Box::pin(futures::stream::iter(envelopes.into_iter().map(Ok))));
        }

        Ok(decode_stream(
            response.bytes_stream(),
            self.endpoints.idle_timeout,
        ))
    }

    /// POST to the buffered endpoint and return the JSON result
    pub async fn run_buffered(&self, request: &TurnRequest) -> Result<Value> {
        tracing::debug!("POST {} (buffered)", self.endpoints.buffered_url);

        let mut builder = self
            .client
            .post(&self.endpoints.buffered_url)
            .header(ACCEPT, "application/json")
            .json(request);
        // The buffered endpoint sends nothing until the run finishes, so
        // only a whole-request limit applies here.
        if let Some(limit) = self.endpoints.buffered_timeout {
            builder = builder.timeout(limit);
        }
        let response = builder.send().await?;

        let status = response.status();
        let content_type = header_content_type(&response);
        let body = response.text().await?;
        parse_buffered_body(
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            content_type.as_deref(),
            &body,
        )
    }

    /// Ask the server to forget the history of `session_id`
    pub async fn clear_session(&self, session_id: &str) -> Result<()> {
        tracing::debug!("POST {} ({})", self.endpoints.clear_url, session_id);

        let response = self
            .client
            .post(&self.endpoints.clear_url)
            .header(ACCEPT, "application/json")
            .json(&json!({ "session_id": session_id }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let content_type = header_content_type(&response);
        let body = response.text().await.unwrap_or_default();
        Err(Error::status(HttpFailure::classify(
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            content_type.as_deref(),
            &body,
        )))
    }
}

fn header_content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Validate a buffered response: non-2xx, HTML and non-JSON bodies are failures
pub fn parse_buffered_body(
    status: u16,
    status_text: &str,
    content_type: Option<&str>,
    body: &str,
) -> Result<Value> {
    let success = (200..300).contains(&status);
    if !success || looks_like_html(body) {
        return Err(Error::status(HttpFailure::classify(
            status,
            status_text,
            content_type,
            body,
        )));
    }
    serde_json::from_str::<Value>(body).map_err(|_| {
        let mut failure = HttpFailure::classify(status, status_text, content_type, body);
        failure.message = Some("response body is not JSON".to_string());
        Error::status(failure)
    })
}

/// Turn a complete 2xx body from the streaming endpoint into envelopes.
///
/// A JSON body is treated like a buffered result and an SSE body is decoded
/// in one pass. Anything else is a failure.
pub fn envelopes_from_body(
    status: u16,
    status_text: &str,
    content_type: Option<&str>,
    body: &str,
) -> Result<Vec<StreamEnvelope>> {
    if looks_like_html(body) {
        return Err(Error::status(HttpFailure::classify(
            status,
            status_text,
            content_type,
            body,
        )));
    }
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Ok(StreamEnvelope::from_buffered(value));
    }
    if has_sse_fields(body) {
        return Ok(FrameDecoder::decode_all(body));
    }
    let mut failure = HttpFailure::classify(status, status_text, content_type, body);
    failure.message = Some("response body is not JSON".to_string());
    Err(Error::status(failure))
}

fn has_sse_fields(body: &str) -> bool {
    body.lines()
        .map(str::trim_start)
        .any(|line| line.starts_with("data:") || line.starts_with("event:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML_500: &str = "<!doctype html>\n<html><head><title>Server Error</title></head>\
        <body><h1>Whoops</h1></body></html>";

    #[test]
    fn test_html_500_is_classified() {
        let failure =
            HttpFailure::classify(500, "Internal Server Error", Some("text/html"), HTML_500);
        assert!(failure.is_html);
        assert_eq!(failure.html_title.as_deref(), Some("Server Error"));
        assert_eq!(failure.status, 500);
        assert_eq!(failure.content_type.as_deref(), Some("text/html"));
        assert!(failure.message.is_none());
        assert!(failure.summary().contains("Server Error"));
    }

    #[test]
    fn test_html_detection_is_case_and_whitespace_insensitive() {
        assert!(looks_like_html("  \n<HTML><body>x</body></HTML>"));
        assert!(looks_like_html("\u{feff}<!DOCTYPE html>"));
        assert!(!looks_like_html("{\"error\":\"<html>\"}"));
        assert!(!looks_like_html(""));
    }

    #[test]
    fn test_json_error_body_keeps_message() {
        let failure = HttpFailure::classify(
            422,
            "Unprocessable Entity",
            Some("application/json"),
            r#"{"error":{"message":"message is required"}}"#,
        );
        assert!(!failure.is_html);
        assert_eq!(failure.message.as_deref(), Some("message is required"));
        assert_eq!(
            failure.summary(),
            "HTTP 422 Unprocessable Entity: message is required"
        );
    }

    #[test]
    fn test_raw_preview_is_capped() {
        let body = format!("<!doctype html>{}", "x".repeat(5000));
        let failure = HttpFailure::classify(502, "Bad Gateway", None, &body);
        assert_eq!(failure.raw_preview.chars().count(), RAW_PREVIEW_LIMIT + 3);
        assert!(failure.raw_preview.ends_with("..."));
    }

    #[test]
    fn test_buffered_body_ok() {
        let value = parse_buffered_body(200, "OK", Some("application/json"), r#"{"assistant":"hi"}"#)
            .unwrap();
        assert_eq!(value["assistant"], "hi");
    }

    #[test]
    fn test_buffered_body_non_json_on_200() {
        let err = parse_buffered_body(200, "OK", Some("text/plain"), "fatal error").unwrap_err();
        let failure = err.http_failure().unwrap();
        assert_eq!(failure.message.as_deref(), Some("response body is not JSON"));
        assert!(!failure.is_html);
    }

    #[test]
    fn test_buffered_body_html_on_200() {
        let err = parse_buffered_body(200, "OK", Some("text/html"), HTML_500).unwrap_err();
        assert!(err.is_html_failure());
    }

    #[test]
    fn test_buffered_body_non_2xx_json() {
        let err = parse_buffered_body(404, "Not Found", None, r#"{"message":"no route"}"#)
            .unwrap_err();
        assert_eq!(err.http_failure().unwrap().message.as_deref(), Some("no route"));
    }

    #[test]
    fn test_endpoints_from_base() {
        let ep = Endpoints::from_base("https://app.example.com/").unwrap();
        assert_eq!(ep.stream_url, "https://app.example.com/api/tool-playground/stream");
        assert_eq!(ep.clear_url, "https://app.example.com/api/tool-playground/clear");
        assert_eq!(ep.idle_timeout, Some(Duration::from_secs(120)));
        assert_eq!(ep.buffered_timeout, Some(DEFAULT_BUFFERED_TIMEOUT));
    }

    #[test]
    fn test_buffered_timeout_is_independent_of_idle_timeout() {
        let ep = Endpoints::from_base("http://localhost:3000")
            .unwrap()
            .with_idle_timeout(Some(Duration::from_secs(5)))
            .with_buffered_timeout(None);
        assert_eq!(ep.idle_timeout, Some(Duration::from_secs(5)));
        assert_eq!(ep.buffered_timeout, None);
    }

    #[test]
    fn test_plain_text_stream_body_fails() {
        let err = envelopes_from_body(
            200,
            "OK",
            Some("text/plain"),
            "PHP Fatal error: Allowed memory size exhausted in /app/index.php",
        )
        .unwrap_err();
        let failure = err.http_failure().unwrap();
        assert_eq!(failure.status, 200);
        assert_eq!(failure.status_text, "OK");
        assert_eq!(failure.content_type.as_deref(), Some("text/plain"));
        assert!(failure.raw_preview.starts_with("PHP Fatal error"));
        assert_eq!(failure.message.as_deref(), Some("response body is not JSON"));
    }

    #[test]
    fn test_stream_body_json_and_sse() {
        let envs =
            envelopes_from_body(200, "OK", Some("application/json"), r#"{"assistant":"hi"}"#)
                .unwrap();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].event_type, "complete");

        let envs = envelopes_from_body(
            200,
            "OK",
            Some("text/plain"),
            "event: complete\ndata: {\"assistant\":\"hi\"}\n\n",
        )
        .unwrap();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].payload["assistant"], "hi");
    }

    #[test]
    fn test_stream_body_html_fails() {
        let err = envelopes_from_body(200, "OK", Some("text/html"), HTML_500).unwrap_err();
        assert!(err.is_html_failure());
    }

    #[test]
    fn test_endpoints_reject_bad_base() {
        assert!(Endpoints::from_base("").is_err());
        assert!(Endpoints::from_base("ftp://x").is_err());
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("h\u{e9}llo", 2), "h\u{e9}...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }
}
