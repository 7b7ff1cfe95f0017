//! Newline-delimited JSON response streaming.
//!
//! ## Contract
//!
//! One request is issued. The response body is decoded incrementally and
//! split on newline boundaries; every complete line that parses as JSON is
//! delivered through `on_data`. Malformed lines are logged and skipped —
//! they never abort the stream. A trailing unterminated line is parsed once
//! more when the body ends.
//!
//! `on_complete` fires exactly once, after all data (including the flushed
//! remainder) has been delivered. A failed request (non-success status or
//! network error, before or mid-stream) fires `on_error` exactly once and
//! `on_complete` not at all. There is no built-in retry; retry policy
//! belongs to the caller.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::HeardError;

/// Incremental decoder for newline-delimited JSON bodies.
///
/// Bytes are buffered until a `\n` is seen, so multi-byte UTF-8 sequences
/// and JSON objects split across network chunks reassemble correctly.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk; returns the values parsed from every line
    /// completed by this chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buf.extend_from_slice(chunk);

        let mut values = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(value) = parse_line(&line) {
                values.push(value);
            }
        }
        values
    }

    /// Flush the buffered remainder at end of stream, parsing it as a
    /// final attempt.
    pub fn finish(&mut self) -> Option<Value> {
        let rest = std::mem::take(&mut self.buf);
        parse_line(&rest)
    }
}

fn parse_line(raw: &[u8]) -> Option<Value> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, line = %trimmed, "skipping malformed stream line");
            None
        }
    }
}

/// Issue `request` and deliver its newline-delimited JSON body through the
/// three callbacks. See the module docs for the exact contract.
pub async fn stream_json_lines<D, E, C>(
    request: reqwest::RequestBuilder,
    mut on_data: D,
    on_error: E,
    on_complete: C,
) where
    D: FnMut(Value),
    E: FnOnce(HeardError),
    C: FnOnce(),
{
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            on_error(e.into());
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        on_error(api_error(status.as_u16(), &body));
        return;
    }

    let mut response = response;
    let mut decoder = LineDecoder::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                for value in decoder.push(&chunk) {
                    on_data(value);
                }
            }
            Ok(None) => {
                if let Some(value) = decoder.finish() {
                    on_data(value);
                }
                debug!("stream complete");
                on_complete();
                return;
            }
            Err(e) => {
                on_error(e.into());
                return;
            }
        }
    }
}

/// Build an API error from a failed response, surfacing the JSON `detail`
/// field when the backend provides one.
pub(crate) fn api_error(status: u16, body: &str) -> HeardError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                "request failed".to_string()
            } else {
                body.trim().to_string()
            }
        });
    HeardError::Api { status, message }
}
