use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::catalog::ResolvedRequest;

/// The response status, or an error if no response was received.
pub type DispatchResult = anyhow::Result<u16>;

/// Sends requests to the system under test.
///
/// Gale does not ship an HTTP client. Embedders implement this with whichever client they use, and
/// the runner drives the returned future on its own runtime. The future is dropped if the run is
/// aborted while it is in flight.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, request: &ResolvedRequest) -> BoxFuture<'static, DispatchResult>;
}

impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn dispatch(&self, request: &ResolvedRequest) -> BoxFuture<'static, DispatchResult> {
        (**self).dispatch(request)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Request to {url} timed out after {timeout:?}")]
pub struct RequestTimedOut {
    pub url: String,
    pub timeout: Duration,
}

/// Fails any request that takes longer than `timeout`. The timed out request is recorded as a
/// failure like any other dispatch error.
pub struct TimeoutDispatcher<D> {
    inner: D,
    timeout: Duration,
}

impl<D: Dispatcher> TimeoutDispatcher<D> {
    pub fn new(inner: D, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<D: Dispatcher> Dispatcher for TimeoutDispatcher<D> {
    fn dispatch(&self, request: &ResolvedRequest) -> BoxFuture<'static, DispatchResult> {
        let fut = self.inner.dispatch(request);
        let timeout = self.timeout;
        let url = request.url.to_string();

        async move {
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_) => Err(RequestTimedOut { url, timeout }.into()),
            }
        }
        .boxed()
    }
}
