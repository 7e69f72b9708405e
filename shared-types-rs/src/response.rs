// shared-types-rs/src/response.rs
// Structured response returned by every node, nested recursively for upstream calls

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::target::Transport;

/// Outward-facing response of a single node
///
/// Serialized as JSON into HTTP bodies and gRPC messages. Upstream results
/// embed the upstream's own `Response`, so the value is a tree whose depth is
/// the depth of the call chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub name: String,
    #[serde(rename = "type")]
    pub transport: String,
    #[serde(default)]
    pub code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstream_calls: Vec<UpstreamResult>,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Response {
    pub fn new(name: impl Into<String>, transport: Transport) -> Self {
        Self {
            name: name.into(),
            transport: transport.label().to_string(),
            code: 0,
            error: String::new(),
            upstream_calls: Vec::new(),
            duration: String::new(),
            body: String::new(),
            start_time: None,
            end_time: None,
        }
    }

    pub fn append_upstream(&mut self, result: UpstreamResult) {
        self.upstream_calls.push(result);
    }

    /// Record the elapsed time as text, e.g. `"101.2ms"`
    pub fn set_duration(&mut self, elapsed: Duration) {
        self.duration = format_duration(elapsed);
    }

    /// True when any direct upstream call carries an error
    pub fn has_upstream_error(&self) -> bool {
        self.upstream_calls.iter().any(UpstreamResult::is_error)
    }

    pub fn to_json(&self) -> String {
        // A Response contains only strings, integers and timestamps
        serde_json::to_string(self).unwrap_or_else(|e| {
            log::error!("Failed to serialize response: {}", e);
            String::from("{}")
        })
    }

    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// Outcome of calling one upstream target
///
/// Created once per target per request by the call adapter and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamResult {
    pub uri: String,
    #[serde(default)]
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The body decoded as a nested `Response`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Box<Response>>,
    /// The body as text when it could not be decoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl UpstreamResult {
    pub fn new(uri: impl Into<String>, code: i32) -> Self {
        Self {
            uri: uri.into(),
            code,
            error: None,
            response: None,
            raw: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach a body, decoding it as a nested `Response` when possible
    ///
    /// Decode failures are absorbed: a proxy in front of the upstream may
    /// answer with its own non-JSON error page, and that text is kept as
    /// `raw` without turning the call into a failure.
    pub fn with_body(mut self, body: &[u8]) -> Self {
        if body.is_empty() {
            return self;
        }
        match Response::from_json(body) {
            Ok(response) => self.response = Some(Box::new(response)),
            Err(e) => {
                log::debug!("Upstream {} returned an undecodable body: {}", self.uri, e);
                self.raw = Some(String::from_utf8_lossy(body).into_owned());
            }
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_deref()
    }
}

/// Render a duration the way it appears in responses
pub fn format_duration(d: Duration) -> String {
    format!("{:?}", d)
}
