// fake-service-rs/src/lib.rs
// Synthetic service node: answers over HTTP or gRPC, fans out to configured
// upstreams and shapes latency, errors and load on the way

pub mod api {
    tonic::include_proto!("fake_service");
}

pub mod grpc;
pub mod handler;
pub mod http;
pub mod upstream;
pub mod worker;

use error_handling_rs::ServiceError;
use shared_types_rs::UpstreamTarget;

pub use handler::Handler;
pub use upstream::{CallOutcome, UpstreamCaller, UpstreamClients};
pub use worker::WorkerPool;

/// Parse the configured upstream addresses, rejecting unknown schemes
pub fn parse_targets(uris: &[String]) -> Result<Vec<UpstreamTarget>, ServiceError> {
    uris.iter()
        .map(|uri| {
            UpstreamTarget::parse(uri).map_err(|e| ServiceError::Target {
                uri: uri.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}
