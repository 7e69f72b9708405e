// fake-service-rs/src/upstream.rs
// Upstream call adapter: one call per target over HTTP or gRPC

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use config_rs::ClientConfig;
use error_handling_rs::{ServiceError, UpstreamError, UpstreamErrorKind};
use shared_types_rs::{UpstreamResult, UpstreamTarget};
use telemetrist::{Logger, SpanContext};
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::Channel;
use tracing::Instrument;

use crate::api::fake_service_client::FakeServiceClient;
use crate::api::Nil;

/// Result of one upstream call; the error is set when the call failed
pub type CallOutcome = (UpstreamResult, Option<UpstreamError>);

/// Calls a single upstream target
///
/// Implementations always produce an [`UpstreamResult`], even when the call
/// fails, so callers never branch on the transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamCaller: Send + Sync {
    async fn call(&self, target: UpstreamTarget, context: SpanContext) -> CallOutcome;
}

/// Transport clients shared by every request
///
/// Built once at startup; gRPC channels are keyed by the configured address
/// and connect lazily on first use.
#[derive(Clone)]
pub struct UpstreamClients {
    http: reqwest::Client,
    grpc: Arc<HashMap<String, FakeServiceClient<Channel>>>,
    logger: Logger,
}

impl UpstreamClients {
    pub fn build(
        targets: &[UpstreamTarget],
        config: &ClientConfig,
        logger: Logger,
    ) -> Result<Self, ServiceError> {
        let mut builder = reqwest::Client::builder().timeout(config.http_request_timeout);
        if !config.http_keep_alives {
            builder = builder.pool_max_idle_per_host(0);
        }
        let http = builder.build().map_err(|e| ServiceError::Client {
            uri: "http".to_string(),
            source: Box::new(e),
        })?;

        let mut grpc = HashMap::new();
        for target in targets {
            if let UpstreamTarget::Grpc { uri, endpoint } = target {
                let channel = Channel::from_shared(endpoint.clone())
                    .map_err(|e| ServiceError::Client {
                        uri: uri.clone(),
                        source: Box::new(e),
                    })?
                    .timeout(config.grpc_timeout)
                    .connect_lazy();
                log::info!("Provisioned gRPC client for {} via {}", uri, endpoint);
                grpc.insert(uri.clone(), FakeServiceClient::new(channel));
            }
        }

        Ok(Self {
            http,
            grpc: Arc::new(grpc),
            logger,
        })
    }

    async fn call_http(&self, uri: &str, context: &SpanContext) -> CallOutcome {
        let mut request = self.http.get(uri);
        for (name, value) in context.to_headers() {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return failed(UpstreamResult::new(uri, 0), UpstreamError::from_http(uri, &e));
            }
        };

        let status = response.status();
        let code = i32::from(status.as_u16());
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                let err =
                    UpstreamError::new(uri, code, UpstreamErrorKind::Transport, e.to_string());
                return failed(UpstreamResult::new(uri, code), err);
            }
        };

        let result = UpstreamResult::new(uri, code).with_body(&body);
        if status.is_success() {
            (result, None)
        } else {
            failed(result, UpstreamError::unexpected_status(uri, status.as_u16()))
        }
    }

    async fn call_grpc(&self, uri: &str, context: &SpanContext) -> CallOutcome {
        let Some(client) = self.grpc.get(uri) else {
            let err = UpstreamError::new(
                uri,
                0,
                UpstreamErrorKind::Transport,
                "no gRPC client provisioned for this address",
            );
            return failed(UpstreamResult::new(uri, 0), err);
        };
        let mut client = client.clone();

        let mut request = tonic::Request::new(Nil {});
        for (name, value) in context.to_headers() {
            match value.parse::<AsciiMetadataValue>() {
                Ok(value) => {
                    request.metadata_mut().insert(name, value);
                }
                Err(e) => log::debug!("Skipping trace header {}: {}", name, e),
            }
        }

        match client.handle(request).await {
            Ok(response) => {
                let message = response.into_inner().message;
                (
                    UpstreamResult::new(uri, tonic::Code::Ok as i32).with_body(message.as_bytes()),
                    None,
                )
            }
            Err(status) => {
                let err = UpstreamError::from_status(uri, &status);
                failed(UpstreamResult::new(uri, err.code).with_body(status.details()), err)
            }
        }
    }
}

fn failed(result: UpstreamResult, err: UpstreamError) -> CallOutcome {
    (result.with_error(err.message.clone()), Some(err))
}

#[async_trait]
impl UpstreamCaller for UpstreamClients {
    async fn call(&self, target: UpstreamTarget, context: SpanContext) -> CallOutcome {
        let mut span = self.logger.call_upstream(target.uri(), &context);
        let child = span.context().clone();

        let call = async {
            match &target {
                UpstreamTarget::Http { uri } => self.call_http(uri, &child).await,
                UpstreamTarget::Grpc { uri, .. } => self.call_grpc(uri, &child).await,
            }
        };
        let (result, error) = call.instrument(span.span().clone()).await;

        span.set_metadata("response", result.code);
        if let Some(err) = &error {
            span.set_error(err);
        }
        span.finished();

        (result, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn clients(targets: &[UpstreamTarget]) -> UpstreamClients {
        let config = ClientConfig {
            http_request_timeout: Duration::from_secs(2),
            grpc_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        };
        UpstreamClients::build(targets, &config, Logger::new()).unwrap()
    }

    #[tokio::test]
    async fn test_grpc_clients_keyed_by_address() {
        let targets =
            UpstreamTarget::parse_all(&["grpc://localhost:9091", "http://localhost:9092"]).unwrap();
        let clients = clients(&targets);
        assert_eq!(clients.grpc.len(), 1);
        assert!(clients.grpc.contains_key("grpc://localhost:9091"));
    }

    #[tokio::test]
    async fn test_http_connect_failure_is_absorbed() {
        // nothing listens on the discard port
        let target = UpstreamTarget::parse("http://127.0.0.1:9").unwrap();
        let clients = clients(&[target.clone()]);

        let (result, error) = clients.call(target, SpanContext::new_root()).await;
        let error = error.expect("call should fail");
        assert!(error.is_transport());
        assert_eq!(result.uri, "http://127.0.0.1:9");
        assert_eq!(result.code, 0);
        assert!(result.is_error());
        assert!(result.response.is_none() && result.raw.is_none());
    }

    #[tokio::test]
    async fn test_unprovisioned_grpc_target() {
        let target = UpstreamTarget::parse("grpc://127.0.0.1:9").unwrap();
        let clients = clients(&[]);

        let (result, error) = clients.call(target, SpanContext::new_root()).await;
        assert!(error.is_some());
        assert_eq!(result.code, 0);
        assert!(result.is_error());
    }
}
