// fake-service-rs/src/grpc.rs
// gRPC front end for FakeService/Handle

use std::future::Future;
use std::sync::Arc;

use shared_types_rs::Transport;
use telemetrist::SpanContext;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{transport::Server, Code, Request, Response, Status};

use crate::api::fake_service_server::{FakeService, FakeServiceServer};
use crate::api::{self, Nil};
use crate::handler::Handler;

pub struct FakeServiceImpl {
    handler: Arc<Handler>,
}

impl FakeServiceImpl {
    pub fn new(handler: Arc<Handler>) -> Self {
        Self { handler }
    }
}

#[tonic::async_trait]
impl FakeService for FakeServiceImpl {
    async fn handle(&self, request: Request<Nil>) -> Result<Response<api::Response>, Status> {
        let parent = SpanContext::from_headers(|name| {
            request.metadata().get(name).and_then(|v| v.to_str().ok())
        });

        let response = self.handler.handle(Transport::Grpc, parent).await;
        let message = response.to_json();

        if response.code == Code::Ok as i32 {
            Ok(Response::new(api::Response { message }))
        } else {
            // the full response tree travels in the status details
            Err(Status::with_details(
                Code::from(response.code),
                response.error,
                message.into_bytes().into(),
            ))
        }
    }
}

/// Serve gRPC on `listener` until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    handler: Arc<Handler>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), tonic::transport::Error> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("gRPC server listening on {}", addr);
    }

    Server::builder()
        .add_service(FakeServiceServer::new(FakeServiceImpl::new(handler)))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
}
