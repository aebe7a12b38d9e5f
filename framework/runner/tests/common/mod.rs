#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use gale_runner::prelude::{
    DispatchResult, Dispatcher, RequestSpec, ResolvedRequest, RunDefinitionBuilder, TagSet,
    WorkloadCatalog, WorkloadGroup,
};
use parking_lot::Mutex;

/// Stands in for an HTTP client. Answers 200 unless told otherwise.
#[derive(Default)]
pub struct MockDispatcher {
    latency: Duration,
    statuses: HashMap<String, u16>,
    errors: HashSet<String>,
    calls: AtomicU64,
    paths: Mutex<Vec<String>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_status(mut self, path: &str, status: u16) -> Self {
        self.statuses.insert(path.to_string(), status);
        self
    }

    pub fn with_error(mut self, path: &str) -> Self {
        self.errors.insert(path.to_string());
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().clone()
    }
}

impl Dispatcher for MockDispatcher {
    fn dispatch(&self, request: &ResolvedRequest) -> BoxFuture<'static, DispatchResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let path = request.url.path().to_string();
        self.paths.lock().push(path.clone());

        let latency = self.latency;
        let fail = self.errors.contains(&path);
        let status = self.statuses.get(&path).copied().unwrap_or(200);

        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if fail {
                anyhow::bail!("connection refused for {path}");
            }
            Ok(status)
        }
        .boxed()
    }
}

/// Five requests per iteration: three searches in random order, then the summary pages in order.
pub fn catalog() -> WorkloadCatalog {
    WorkloadCatalog::new([
        WorkloadGroup::new(
            "search",
            [
                RequestSpec::parse("/api/v1/crates?q=serde"),
                RequestSpec::parse("/api/v1/crates?q=tokio&page=2"),
                RequestSpec::parse("/api/v1/keywords?q=async"),
            ],
        )
        .with_tags(TagSet::new().with("endpoint", "search")),
        WorkloadGroup::new(
            "summary",
            [
                RequestSpec::parse("/api/v1/summary"),
                RequestSpec::parse("/api/v1/categories"),
            ],
        )
        .with_tags(TagSet::new().with("endpoint", "summary"))
        .in_order(),
    ])
}

pub const REQUESTS_PER_ITERATION: u64 = 5;

pub fn builder(name: &str) -> RunDefinitionBuilder {
    RunDefinitionBuilder::new(name)
        .with_target("http://localhost:8080")
        .with_catalog(catalog())
        .with_seed(1234)
}

pub fn dispatcher(mock: MockDispatcher) -> (Arc<MockDispatcher>, Arc<dyn Dispatcher>) {
    let mock = Arc::new(mock);
    let dyn_dispatcher: Arc<dyn Dispatcher> = mock.clone();
    (mock, dyn_dispatcher)
}
