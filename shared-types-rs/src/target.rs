// shared-types-rs/src/target.rs
// Upstream target descriptors, resolved once from configuration

use std::fmt;
use std::str::FromStr;

/// Inbound or outbound protocol of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Http,
    Grpc,
}

impl Transport {
    /// Label written into the `type` field of responses
    pub fn label(&self) -> &'static str {
        match self {
            Transport::Http => "HTTP",
            Transport::Grpc => "gRPC",
        }
    }

    /// Status code of a successful response
    pub fn success_code(&self) -> i32 {
        match self {
            Transport::Http => 200,
            Transport::Grpc => 0,
        }
    }

    /// Status code used when an upstream call failed
    pub fn internal_error_code(&self) -> i32 {
        match self {
            Transport::Http => 500,
            // google.rpc.Code.INTERNAL
            Transport::Grpc => 13,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("upstream address is empty")]
    Empty,

    #[error("unsupported scheme in '{0}', expected http://, https:// or grpc://")]
    UnsupportedScheme(String),

    #[error("missing host in '{0}'")]
    MissingHost(String),
}

/// A configured upstream dependency
///
/// The transport is decided once, when the target list is parsed, so call
/// sites dispatch on the variant instead of re-inspecting the address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpstreamTarget {
    /// Called with `GET <uri>`
    Http { uri: String },
    /// Called with `FakeService/Handle`; `endpoint` is the dialable `http://` form
    Grpc { uri: String, endpoint: String },
}

impl UpstreamTarget {
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let uri = raw.trim();
        if uri.is_empty() {
            return Err(TargetError::Empty);
        }

        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| TargetError::UnsupportedScheme(uri.to_string()))?;

        if rest.is_empty() || rest.starts_with('/') {
            return Err(TargetError::MissingHost(uri.to_string()));
        }

        match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(UpstreamTarget::Http {
                uri: uri.to_string(),
            }),
            "grpc" => Ok(UpstreamTarget::Grpc {
                uri: uri.to_string(),
                endpoint: format!("http://{}", rest),
            }),
            _ => Err(TargetError::UnsupportedScheme(uri.to_string())),
        }
    }

    /// Parse every configured address, failing on the first invalid one
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Self>, TargetError> {
        raw.iter().map(|s| Self::parse(s.as_ref())).collect()
    }

    /// The address exactly as configured
    pub fn uri(&self) -> &str {
        match self {
            UpstreamTarget::Http { uri } | UpstreamTarget::Grpc { uri, .. } => uri,
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            UpstreamTarget::Http { .. } => Transport::Http,
            UpstreamTarget::Grpc { .. } => Transport::Grpc,
        }
    }
}

impl FromStr for UpstreamTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}
