//! # Standardized Error Types
//!
//! Error taxonomy of the fake service node: synthetic faults, upstream call
//! failures, and the process-level startup error.

use std::error::Error as StdError;
use std::fmt;

/// A type alias for Result with the error type defaulting to [`ServiceError`]
pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Message carried by every synthetic error unless configured otherwise
pub const INJECTED_ERROR_MESSAGE: &str = "Service error automatically injected";

/// A synthetic failure produced by the error injector
///
/// The code is interpreted by the inbound transport: an HTTP status for HTTP
/// servers, a gRPC status code for gRPC servers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct InjectedError {
    pub code: i32,
    pub message: String,
}

impl InjectedError {
    pub fn new(code: i32) -> Self {
        Self {
            code,
            message: INJECTED_ERROR_MESSAGE.to_string(),
        }
    }
}

/// How an upstream call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// Connection, timeout or protocol failure before a status was received
    Transport,
    /// The upstream answered with a non-success HTTP status
    Status,
    /// The upstream answered with a non-OK gRPC status
    Rpc,
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamErrorKind::Transport => write!(f, "transport"),
            UpstreamErrorKind::Status => write!(f, "status"),
            UpstreamErrorKind::Rpc => write!(f, "rpc"),
        }
    }
}

/// A single upstream call that failed at the transport level
///
/// Body decode failures are never represented here; an undecodable body is
/// kept as raw text on the call result instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("error processing upstream request {uri}: {message}")]
pub struct UpstreamError {
    pub uri: String,
    /// Status code reported by the transport, 0 when none was received
    pub code: i32,
    pub kind: UpstreamErrorKind,
    pub message: String,
}

impl UpstreamError {
    pub fn new(
        uri: impl Into<String>,
        code: i32,
        kind: UpstreamErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            code,
            kind,
            message: message.into(),
        }
    }

    /// Classify a failed HTTP exchange
    pub fn from_http(uri: impl Into<String>, err: &reqwest::Error) -> Self {
        let code = err.status().map(|s| i32::from(s.as_u16())).unwrap_or(0);
        let kind = if err.is_status() {
            UpstreamErrorKind::Status
        } else {
            UpstreamErrorKind::Transport
        };
        Self::new(uri, code, kind, err.to_string())
    }

    /// An HTTP response that arrived with a non-success status
    pub fn unexpected_status(uri: impl Into<String>, status: u16) -> Self {
        Self::new(
            uri,
            i32::from(status),
            UpstreamErrorKind::Status,
            format!("expected status 2xx, got {}", status),
        )
    }

    /// Classify a failed gRPC call
    pub fn from_status(uri: impl Into<String>, status: &tonic::Status) -> Self {
        Self::new(
            uri,
            status.code() as i32,
            UpstreamErrorKind::Rpc,
            format!("{:?}: {}", status.code(), status.message()),
        )
    }

    /// True when no response of any kind was received
    pub fn is_transport(&self) -> bool {
        self.kind == UpstreamErrorKind::Transport
    }
}

/// Process-level failures raised while starting or running the node
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid configuration: {0}")]
    Config(#[source] Box<dyn StdError + Send + Sync>),

    #[error("Invalid upstream target '{uri}': {reason}")]
    Target { uri: String, reason: String },

    #[error("Failed to build upstream client for {uri}: {source}")]
    Client {
        uri: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("Telemetry initialization failed: {0}")]
    Telemetry(String),

    #[error("Server error: {0}")]
    Server(#[source] Box<dyn StdError + Send + Sync>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn config<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ServiceError::Config(Box::new(err))
    }

    pub fn server<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ServiceError::Server(Box::new(err))
    }
}
