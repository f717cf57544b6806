//! Server-sent event framing.
//!
//! Outbound frames follow a single-line grammar:
//!
//! ```text
//! frame   = "data: " payload LF LF
//! payload = {"content": string, "done": false}     ; one fragment
//!         | {"content": "", "done": true}          ; terminal success
//!         | {"error": string, "done": true}        ; terminal failure
//! ```
//!
//! The framing itself is done by axum's `Sse` response; this module owns the
//! payloads. [`SseParser`] is the decoder. It accepts the general event-stream
//! syntax (multi-line `data`, comments, CRLF) so it can also read the upstream
//! provider's stream, which ends with `data: [DONE]`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest event, in bytes, the parser buffers before giving up.
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// One frame sent to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// An incremental piece of assistant text
    Content(String),
    /// Terminal success
    Done,
    /// Terminal failure with a caller-safe message
    Error(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    done: bool,
}

impl Frame {
    fn to_wire(&self) -> WireFrame {
        match self {
            Self::Content(content) => WireFrame {
                content: Some(content.clone()),
                error: None,
                done: false,
            },
            Self::Done => WireFrame {
                content: Some(String::new()),
                error: None,
                done: true,
            },
            Self::Error(error) => WireFrame {
                content: None,
                error: Some(error.clone()),
                done: true,
            },
        }
    }

    /// JSON payload of this frame.
    pub fn to_json(&self) -> String {
        // WireFrame only holds strings and a bool
        serde_json::to_string(&self.to_wire()).unwrap_or_else(|_| String::from("{\"done\":true}"))
    }

    /// Decode a frame payload (the part after `data: `).
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        let wire: WireFrame = serde_json::from_str(payload)?;
        Ok(match (wire.error, wire.done) {
            (Some(error), _) => Self::Error(error),
            (None, true) => Self::Done,
            (None, false) => Self::Content(wire.content.unwrap_or_default()),
        })
    }
}

/// Decoder failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SseError {
    #[error("event exceeds {limit} bytes without a terminating blank line")]
    EventTooLarge { limit: usize },
}

/// Incremental event-stream decoder.
///
/// Feed raw bytes as they arrive; every completed event's `data` is returned.
/// Chunk boundaries may fall anywhere, including inside a UTF-8 sequence.
/// Bytes already searched for a line break are not searched again.
#[derive(Debug)]
pub struct SseParser {
    buffer: Vec<u8>,
    /// Prefix of `buffer` known to hold no line break
    scanned: usize,
    data: Vec<String>,
    data_bytes: usize,
    limit: usize,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_limit(MAX_EVENT_BYTES)
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser that rejects events larger than `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            data: Vec::new(),
            data_bytes: 0,
            limit,
        }
    }

    /// Consume a chunk and return the data of every event it completed.
    ///
    /// Fails once a partial line plus the data gathered for the current
    /// event grows past the limit. The parser should be discarded then.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, SseError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            let line = trim_cr(&self.buffer[start..end]);
            let line = String::from_utf8_lossy(line).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
            start = end + 1;
            from = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() + self.data_bytes > self.limit {
            return Err(SseError::EventTooLarge { limit: self.limit });
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let event = self.data.join("\n");
            self.data.clear();
            self.data_bytes = 0;
            return Some(event);
        }

        // Comment / keep-alive
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        // event, id and retry carry nothing the relay needs
        if field == "data" {
            self.data_bytes += value.len() + 1;
            self.data.push(value.to_string());
        }
        None
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}
