use std::sync::Arc;

use gale_core::prelude::{Clock, ShutdownHandle};
use gale_instruments::MetricsAggregator;

use crate::catalog::PreparedCatalog;
use crate::dispatch::Dispatcher;
use crate::executor::Executor;

/// Shared, read-only state for every scheduler and virtual user in a run.
#[derive(Clone)]
pub struct RunContext {
    run_id: String,
    executor: Arc<Executor>,
    shutdown_handle: ShutdownHandle,
    aggregator: Arc<MetricsAggregator>,
    dispatcher: Arc<dyn Dispatcher>,
    catalog: Arc<PreparedCatalog>,
    clock: Arc<dyn Clock>,
    seed: Option<u64>,
}

impl RunContext {
    pub(crate) fn new(
        run_id: String,
        executor: Arc<Executor>,
        aggregator: Arc<MetricsAggregator>,
        dispatcher: Arc<dyn Dispatcher>,
        catalog: Arc<PreparedCatalog>,
        clock: Arc<dyn Clock>,
        seed: Option<u64>,
    ) -> Self {
        let shutdown_handle = executor.shutdown_handle().clone();
        Self {
            run_id,
            executor,
            shutdown_handle,
            aggregator,
            dispatcher,
            catalog,
            clock,
            seed,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Trigger this to abort the run.
    pub fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown_handle
    }

    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.aggregator
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn catalog(&self) -> &Arc<PreparedCatalog> {
        &self.catalog
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicU64, Ordering};

    use futures::future::BoxFuture;
    use futures::FutureExt;
    use url::Url;

    use super::*;
    use crate::catalog::{RequestSpec, ResolvedRequest, WorkloadCatalog, WorkloadGroup};
    use crate::dispatch::DispatchResult;

    /// Answers every request immediately with a fixed status and counts calls.
    #[derive(Default)]
    pub(crate) struct StaticDispatcher {
        pub(crate) status: u16,
        pub(crate) calls: AtomicU64,
    }

    impl StaticDispatcher {
        pub(crate) fn new(status: u16) -> Self {
            Self {
                status,
                calls: AtomicU64::new(0),
            }
        }

        pub(crate) fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Dispatcher for StaticDispatcher {
        fn dispatch(&self, _request: &ResolvedRequest) -> BoxFuture<'static, DispatchResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let status = self.status;
            async move { Ok(status) }.boxed()
        }
    }

    pub(crate) fn catalog() -> WorkloadCatalog {
        WorkloadCatalog::new([
            WorkloadGroup::new(
                "search",
                [
                    RequestSpec::parse("/api/v1/crates?q=serde"),
                    RequestSpec::parse("/api/v1/crates?q=tokio"),
                    RequestSpec::parse("/api/v1/crates?q=rand"),
                ],
            ),
            WorkloadGroup::new(
                "summary",
                [
                    RequestSpec::parse("/api/v1/summary"),
                    RequestSpec::parse("/api/v1/categories"),
                ],
            )
            .in_order(),
        ])
    }

    pub(crate) fn context(dispatcher: Arc<dyn Dispatcher>, clock: Arc<dyn Clock>) -> RunContext {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let executor = Arc::new(Executor::new(runtime, ShutdownHandle::new()));
        let prepared = catalog()
            .prepare(&Url::parse("http://localhost:8080").unwrap())
            .unwrap();

        RunContext::new(
            "test-run".to_string(),
            executor,
            Arc::new(MetricsAggregator::new()),
            dispatcher,
            Arc::new(prepared),
            clock,
            Some(42),
        )
    }
}
