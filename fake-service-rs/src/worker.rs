// fake-service-rs/src/worker.rs
// Bounded-concurrency fan-out over the upstream targets

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use error_handling_rs::{UpstreamError, UpstreamErrorKind};
use shared_types_rs::{UpstreamResult, UpstreamTarget};
use telemetrist::SpanContext;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::upstream::UpstreamCaller;

const WORKER_FAILED: &str = "upstream worker terminated during the call";

/// Runs one call per target with at most `workers` calls in flight
///
/// Failed calls never cancel their siblings. A worker that dies mid-call
/// still leaves an error result for the target it held. Dropping a pending
/// [`WorkerPool::run`] future aborts every worker it started.
pub struct WorkerPool {
    workers: usize,
    caller: Arc<dyn UpstreamCaller>,
    context: SpanContext,
    responses: Vec<UpstreamResult>,
}

impl WorkerPool {
    /// Create a pool; a worker count below 1 is treated as 1
    pub fn new(workers: usize, caller: Arc<dyn UpstreamCaller>, context: SpanContext) -> Self {
        Self {
            workers: workers.max(1),
            caller,
            context,
            responses: Vec::new(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Call every target and wait for all of them
    ///
    /// Returns the first error observed, by completion order, when any call
    /// failed. Every result, failed or not, is available from
    /// [`WorkerPool::responses`] afterwards.
    pub async fn run(&mut self, targets: &[UpstreamTarget]) -> Result<(), UpstreamError> {
        self.responses.clear();
        if targets.is_empty() {
            return Ok(());
        }

        let queue = Arc::new(Mutex::new(targets.iter().cloned().collect::<VecDeque<_>>()));
        let results = Arc::new(Mutex::new(Vec::with_capacity(targets.len())));
        let first_error: Arc<Mutex<Option<UpstreamError>>> = Arc::new(Mutex::new(None));
        // worker index -> target it is calling right now
        let in_flight: Arc<Mutex<HashMap<usize, UpstreamTarget>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let mut workers = JoinSet::new();
        for id in 0..self.workers.min(targets.len()) {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let first_error = Arc::clone(&first_error);
            let in_flight = Arc::clone(&in_flight);
            let caller = Arc::clone(&self.caller);
            let context = self.context.clone();

            let worker = async move {
                loop {
                    let Some(target) = queue.lock().await.pop_front() else {
                        break;
                    };
                    in_flight.lock().await.insert(id, target.clone());
                    let (result, error) = caller.call(target, context.clone()).await;
                    in_flight.lock().await.remove(&id);

                    if let Some(err) = error {
                        first_error.lock().await.get_or_insert(err);
                    }
                    results.lock().await.push(result);
                }
            };
            workers.spawn(worker.instrument(tracing::Span::current()));
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                log::error!("Upstream worker terminated abnormally: {}", e);
            }
        }

        // targets still held by a dead worker get a failed result of their own
        let orphaned: Vec<UpstreamTarget> =
            in_flight.lock().await.drain().map(|(_, target)| target).collect();
        for target in orphaned {
            results
                .lock()
                .await
                .push(UpstreamResult::new(target.uri(), 0).with_error(WORKER_FAILED));
            first_error.lock().await.get_or_insert(UpstreamError::new(
                target.uri(),
                0,
                UpstreamErrorKind::Transport,
                WORKER_FAILED,
            ));
        }

        self.responses = std::mem::take(&mut *results.lock().await);
        let first = first_error.lock().await.take();
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Results of the last [`WorkerPool::run`], in completion order
    pub fn responses(&self) -> &[UpstreamResult] {
        &self.responses
    }

    pub fn into_responses(self) -> Vec<UpstreamResult> {
        self.responses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{CallOutcome, MockUpstreamCaller};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn targets(uris: &[&str]) -> Vec<UpstreamTarget> {
        UpstreamTarget::parse_all(uris).unwrap()
    }

    fn ok(target: &UpstreamTarget) -> CallOutcome {
        (UpstreamResult::new(target.uri(), 200), None)
    }

    fn refused(target: &UpstreamTarget) -> CallOutcome {
        let err = UpstreamError::new(
            target.uri(),
            0,
            UpstreamErrorKind::Transport,
            "connection refused",
        );
        (UpstreamResult::new(target.uri(), 0).with_error("connection refused"), Some(err))
    }

    /// Tracks how many calls overlap
    struct SlowCaller {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamCaller for SlowCaller {
        async fn call(&self, target: UpstreamTarget, _context: SpanContext) -> CallOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ok(&target)
        }
    }

    #[tokio::test]
    async fn test_empty_targets_is_noop() {
        let mut caller = MockUpstreamCaller::new();
        caller.expect_call().never();

        let mut pool = WorkerPool::new(4, Arc::new(caller), SpanContext::new_root());
        assert!(pool.run(&[]).await.is_ok());
        assert!(pool.responses().is_empty());
    }

    #[tokio::test]
    async fn test_collects_one_result_per_target() {
        let mut caller = MockUpstreamCaller::new();
        caller.expect_call().times(5).returning(|target, _| ok(&target));

        let targets = targets(&[
            "http://a:9090",
            "http://b:9090",
            "grpc://c:9090",
            "http://d:9090",
            "grpc://e:9090",
        ]);
        let mut pool = WorkerPool::new(2, Arc::new(caller), SpanContext::new_root());
        pool.run(&targets).await.unwrap();

        let mut uris: Vec<&str> = pool.responses().iter().map(|r| r.uri.as_str()).collect();
        uris.sort();
        assert_eq!(
            uris,
            vec![
                "grpc://c:9090",
                "grpc://e:9090",
                "http://a:9090",
                "http://b:9090",
                "http://d:9090",
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_keeps_all_results() {
        let mut caller = MockUpstreamCaller::new();
        caller.expect_call().times(3).returning(|target, _| {
            if target.uri().contains("broken") {
                refused(&target)
            } else {
                ok(&target)
            }
        });

        let targets = targets(&["http://a:9090", "http://broken:9090", "grpc://c:9090"]);
        let mut pool = WorkerPool::new(3, Arc::new(caller), SpanContext::new_root());
        let err = pool.run(&targets).await.unwrap_err();

        assert_eq!(err.uri, "http://broken:9090");
        assert_eq!(pool.responses().len(), 3);
        assert_eq!(pool.responses().iter().filter(|r| r.is_error()).count(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let caller = Arc::new(SlowCaller {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let uris: Vec<String> = (0..8).map(|i| format!("http://svc-{}:9090", i)).collect();
        let targets = UpstreamTarget::parse_all(&uris).unwrap();

        let mut pool = WorkerPool::new(3, caller.clone(), SpanContext::new_root());
        pool.run(&targets).await.unwrap();

        assert_eq!(pool.responses().len(), 8);
        let peak = caller.peak.load(Ordering::SeqCst);
        assert!(peak <= 3 && peak >= 2, "peak concurrency {}", peak);
    }

    #[tokio::test]
    async fn test_worker_count_is_clamped() {
        let mut caller = MockUpstreamCaller::new();
        caller.expect_call().times(2).returning(|target, _| ok(&target));

        let mut pool = WorkerPool::new(0, Arc::new(caller), SpanContext::new_root());
        assert_eq!(pool.workers(), 1);
        pool.run(&targets(&["http://a:9090", "http://b:9090"])).await.unwrap();
        assert_eq!(pool.into_responses().len(), 2);
    }

    #[tokio::test]
    async fn test_context_is_passed_to_every_call() {
        let context = SpanContext::new_root();
        let trace_id = context.trace_id.clone();

        let mut caller = MockUpstreamCaller::new();
        caller
            .expect_call()
            .withf(move |_, ctx| ctx.trace_id == trace_id)
            .times(2)
            .returning(|target, _| ok(&target));

        let mut pool = WorkerPool::new(2, Arc::new(caller), context);
        pool.run(&targets(&["http://a:9090", "grpc://b:9090"])).await.unwrap();
    }

    /// Panics on any target whose host contains "crash"
    struct CrashingCaller;

    #[async_trait]
    impl UpstreamCaller for CrashingCaller {
        async fn call(&self, target: UpstreamTarget, _context: SpanContext) -> CallOutcome {
            if target.uri().contains("crash") {
                panic!("caller crashed");
            }
            ok(&target)
        }
    }

    #[tokio::test]
    async fn test_panicking_call_still_reports_target() {
        let caller = Arc::new(CrashingCaller);
        let targets = targets(&["http://a:9090", "http://crash:9090", "grpc://c:9090"]);
        let mut pool = WorkerPool::new(2, caller, SpanContext::new_root());
        let err = pool.run(&targets).await.unwrap_err();

        assert_eq!(err.uri, "http://crash:9090");
        assert!(err.is_transport());
        assert_eq!(pool.responses().len(), 3);

        let crashed = pool
            .responses()
            .iter()
            .find(|r| r.uri == "http://crash:9090")
            .unwrap();
        assert!(crashed.is_error());
        assert_eq!(crashed.error.as_deref(), Some(WORKER_FAILED));
    }
}
