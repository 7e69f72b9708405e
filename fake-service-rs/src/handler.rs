// fake-service-rs/src/handler.rs
// Per-request orchestration shared by the HTTP and gRPC front ends

use std::sync::Arc;

use chrono::Utc;
use config_rs::ServiceConfig;
use shared_types_rs::{Response, Transport, UpstreamTarget};
use simulation::{remaining, InjectedFault, Injector, LoadGenerator, RequestDuration};
use telemetrist::{Logger, SpanContext, SpanHandle};
use tokio::time::Instant;
use tracing::Instrument;

use crate::upstream::UpstreamCaller;
use crate::worker::WorkerPool;

/// Handles one inbound request from start to response
///
/// The flow is: inject a fault or not, fan out to every upstream, sleep
/// until the target duration is reached, respond. An injected error or a
/// failed upstream ends the request early with the same response shape.
pub struct Handler {
    name: String,
    message: String,
    targets: Vec<UpstreamTarget>,
    workers: usize,
    caller: Arc<dyn UpstreamCaller>,
    duration: RequestDuration,
    injector: Injector,
    load: LoadGenerator,
    logger: Logger,
}

impl Handler {
    /// A handler with no injected faults, no load and no added latency
    pub fn new(
        name: impl Into<String>,
        message: impl Into<String>,
        targets: Vec<UpstreamTarget>,
        caller: Arc<dyn UpstreamCaller>,
        logger: Logger,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            targets,
            workers: 1,
            caller,
            duration: RequestDuration::fixed(std::time::Duration::ZERO),
            injector: Injector::disabled(),
            load: LoadGenerator::disabled(),
            logger,
        }
    }

    pub fn from_config(
        config: &ServiceConfig,
        targets: Vec<UpstreamTarget>,
        caller: Arc<dyn UpstreamCaller>,
        logger: Logger,
    ) -> Self {
        Self::new(&config.name, &config.message, targets, caller, logger)
            .with_workers(config.upstream_workers)
            .with_duration(RequestDuration::from_config(&config.timing))
            .with_injector(Injector::from_config(&config.errors))
            .with_load(LoadGenerator::new(&config.load))
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_duration(mut self, duration: RequestDuration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_injector(mut self, injector: Injector) -> Self {
        self.injector = injector;
        self
    }

    pub fn with_load(mut self, load: LoadGenerator) -> Self {
        self.load = load;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn targets(&self) -> &[UpstreamTarget] {
        &self.targets
    }

    /// Serve one request arriving over `transport`
    ///
    /// `parent` is the trace context sent by the caller, if any.
    pub async fn handle(&self, transport: Transport, parent: Option<SpanContext>) -> Response {
        let started = Instant::now();
        let _load = self.load.generate();
        let mut span = self.logger.handle_request(transport.label(), parent);

        let mut response = Response::new(&self.name, transport);
        response.start_time = Some(Utc::now());

        match self.injector.decide() {
            Some(InjectedFault::Error(err)) => {
                response.code = err.code;
                response.error = err.message.clone();
                span.set_error(&err);
                return self.complete(response, started, &mut span);
            }
            Some(InjectedFault::Delay(delay)) => {
                let mut sleep = self.logger.sleep_service(span.context(), delay);
                sleep.set_metadata("injected", true);
                tokio::time::sleep(delay).await;
                sleep.finished();
            }
            None => {}
        }

        if !self.targets.is_empty() {
            let mut pool =
                WorkerPool::new(self.workers, Arc::clone(&self.caller), span.context().clone());
            let outcome = pool.run(&self.targets).instrument(span.span().clone()).await;

            for result in pool.into_responses() {
                response.append_upstream(result);
            }

            if let Err(err) = outcome {
                response.code = transport.internal_error_code();
                response.error = err.to_string();
                span.set_error(&err);
                return self.complete(response, started, &mut span);
            }
        }

        let wait = remaining(self.duration.calculate(), started.elapsed());
        let mut sleep = self.logger.sleep_service(span.context(), wait);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        sleep.finished();

        response.code = transport.success_code();
        response.body = self.message.clone();
        self.complete(response, started, &mut span)
    }

    fn complete(
        &self,
        mut response: Response,
        started: Instant,
        span: &mut SpanHandle,
    ) -> Response {
        response.set_duration(started.elapsed());
        response.end_time = Some(Utc::now());

        span.set_metadata("response", response.code);
        span.finished();
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{CallOutcome, MockUpstreamCaller};
    use config_rs::LoadConfig;
    use error_handling_rs::{UpstreamError, UpstreamErrorKind, INJECTED_ERROR_MESSAGE};
    use shared_types_rs::UpstreamResult;
    use std::time::Duration;

    fn logger() -> Logger {
        Logger::new()
    }

    fn ok(target: &UpstreamTarget) -> CallOutcome {
        (UpstreamResult::new(target.uri(), 200), None)
    }

    fn unavailable(target: &UpstreamTarget) -> CallOutcome {
        let err = UpstreamError::new(target.uri(), 14, UpstreamErrorKind::Rpc, "Unavailable");
        (UpstreamResult::new(target.uri(), 14).with_error("Unavailable"), Some(err))
    }

    /// Holds 1 KiB per request, so every request takes a guard
    fn memory_load() -> LoadGenerator {
        LoadGenerator::new(&LoadConfig {
            memory_bytes: 1024,
            ..LoadConfig::default()
        })
    }

    fn handler(uris: &[&str], caller: MockUpstreamCaller) -> Handler {
        let targets = UpstreamTarget::parse_all(uris).unwrap();
        Handler::new("web", "Hello World", targets, Arc::new(caller), logger()).with_workers(2)
    }

    #[tokio::test]
    async fn test_no_upstreams_success() {
        let mut caller = MockUpstreamCaller::new();
        caller.expect_call().never();

        let response = handler(&[], caller).handle(Transport::Http, None).await;
        assert_eq!(response.name, "web");
        assert_eq!(response.transport, "HTTP");
        assert_eq!(response.code, 200);
        assert_eq!(response.body, "Hello World");
        assert!(response.error.is_empty());
        assert!(response.upstream_calls.is_empty());
        assert!(response.start_time.is_some() && response.end_time.is_some());
    }

    #[tokio::test]
    async fn test_injected_error_short_circuits() {
        let mut caller = MockUpstreamCaller::new();
        caller.expect_call().never();

        let handler = handler(&["http://api:9090"], caller)
            .with_injector(Injector::always(503))
            .with_duration(RequestDuration::fixed(Duration::from_secs(10)));

        let started = std::time::Instant::now();
        let response = handler.handle(Transport::Http, None).await;

        assert_eq!(response.code, 503);
        assert_eq!(response.error, INJECTED_ERROR_MESSAGE);
        assert!(response.body.is_empty());
        assert!(response.upstream_calls.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_upstream_failure_is_internal_error() {
        let mut caller = MockUpstreamCaller::new();
        caller.expect_call().times(2).returning(|target, _| {
            if target.uri().starts_with("grpc") {
                unavailable(&target)
            } else {
                ok(&target)
            }
        });

        let response = handler(&["http://svc-a:9090", "grpc://svc-b:9090"], caller)
            .handle(Transport::Grpc, None)
            .await;

        assert_eq!(response.code, 13);
        assert_eq!(response.transport, "gRPC");
        assert!(response.error.contains("grpc://svc-b:9090"));
        assert!(response.body.is_empty());
        assert_eq!(response.upstream_calls.len(), 2);
        assert_eq!(response.upstream_calls.iter().filter(|r| r.is_error()).count(), 1);
    }

    #[tokio::test]
    async fn test_all_upstreams_succeed() {
        let mut caller = MockUpstreamCaller::new();
        caller.expect_call().times(3).returning(|target, _| ok(&target));

        let response = handler(&["http://a:9090", "http://b:9090", "grpc://c:9090"], caller)
            .handle(Transport::Grpc, None)
            .await;

        assert_eq!(response.code, 0);
        assert_eq!(response.body, "Hello World");
        assert_eq!(response.upstream_calls.len(), 3);
        assert!(!response.has_upstream_error());
    }

    #[tokio::test]
    async fn test_trace_is_continued_upstream() {
        let parent = SpanContext::new_root();
        let trace_id = parent.trace_id.clone();

        let mut caller = MockUpstreamCaller::new();
        caller
            .expect_call()
            .withf(move |_, ctx| ctx.trace_id == trace_id)
            .times(1)
            .returning(|target, _| ok(&target));

        let response = handler(&["http://a:9090"], caller)
            .handle(Transport::Http, Some(parent))
            .await;
        assert_eq!(response.code, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_until_target_duration() {
        let mut caller = MockUpstreamCaller::new();
        caller.expect_call().never();

        let handler =
            handler(&[], caller).with_duration(RequestDuration::fixed(Duration::from_millis(100)));
        let started = Instant::now();
        let response = handler.handle(Transport::Http, None).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(150));
        assert_eq!(response.code, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_upstreams_add_no_sleep() {
        struct Slow;

        #[async_trait::async_trait]
        impl UpstreamCaller for Slow {
            async fn call(&self, target: UpstreamTarget, _context: SpanContext) -> CallOutcome {
                tokio::time::sleep(Duration::from_millis(200)).await;
                ok(&target)
            }
        }

        let targets = UpstreamTarget::parse_all(&["http://slow:9090"]).unwrap();
        let handler = Handler::new("web", "Hello", targets, Arc::new(Slow), logger())
            .with_duration(RequestDuration::fixed(Duration::from_millis(50)));

        let started = Instant::now();
        handler.handle(Transport::Http, None).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_delay_then_success() {
        let mut caller = MockUpstreamCaller::new();
        caller.expect_call().never();

        let handler = handler(&[], caller)
            .with_injector(Injector::delays(1.0, Duration::from_millis(30)));
        let started = Instant::now();
        let response = handler.handle(Transport::Http, None).await;

        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(response.code, 200);
        assert!(response.error.is_empty());
    }

    #[tokio::test]
    async fn test_load_released_after_injected_error() {
        let mut caller = MockUpstreamCaller::new();
        caller.expect_call().never();

        let load = memory_load();
        let handler = handler(&["http://api:9090"], caller)
            .with_injector(Injector::always(500))
            .with_load(load.clone());

        let response = handler.handle(Transport::Http, None).await;
        assert_eq!(response.code, 500);
        assert_eq!(load.active(), 0);
    }

    #[tokio::test]
    async fn test_load_released_after_upstream_failure() {
        let mut caller = MockUpstreamCaller::new();
        caller.expect_call().times(1).returning(|target, _| unavailable(&target));

        let load = memory_load();
        let handler = handler(&["grpc://svc-b:9090"], caller).with_load(load.clone());

        let response = handler.handle(Transport::Http, None).await;
        assert_eq!(response.code, 500);
        assert_eq!(load.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_released_when_request_is_dropped() {
        struct Hang;

        #[async_trait::async_trait]
        impl UpstreamCaller for Hang {
            async fn call(&self, _target: UpstreamTarget, _context: SpanContext) -> CallOutcome {
                std::future::pending().await
            }
        }

        let load = memory_load();
        let targets = UpstreamTarget::parse_all(&["http://hang:9090"]).unwrap();
        let handler =
            Handler::new("web", "Hello", targets, Arc::new(Hang), logger()).with_load(load.clone());

        let mut request = Box::pin(handler.handle(Transport::Http, None));
        let waited = tokio::time::timeout(Duration::from_millis(50), &mut request).await;
        assert!(waited.is_err());
        assert_eq!(load.active(), 1);

        drop(request);
        assert_eq!(load.active(), 0);
    }
}
