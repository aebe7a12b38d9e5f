use std::future::Future;

use gale_core::prelude::{ShutdownHandle, ShutdownSignalError};

/// Runs async work for virtual users, which are plain threads.
#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
    shutdown_handle: ShutdownHandle,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Runtime, shutdown_handle: ShutdownHandle) -> Self {
        Self {
            runtime,
            shutdown_handle,
        }
    }

    /// Run async code in place, blocking until it completes.
    ///
    /// The future is dropped if the run is aborted before it completes, and a
    /// [ShutdownSignalError] is returned instead. Submitting a future which does not support
    /// cancelling may prevent the run from aborting promptly.
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let mut shutdown_listener = self.shutdown_handle.new_listener();
        self.runtime.block_on(async move {
            tokio::select! {
                result = fut => result,
                _ = shutdown_listener.wait_for_shutdown() => {
                    Err(anyhow::anyhow!(ShutdownSignalError::default()))
                },
            }
        })
    }

    /// Submit async code to be run in the background.
    ///
    /// The future is not cancelled when the run is aborted, and the runner does not wait for it
    /// to complete.
    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        self.runtime.spawn(fut);
    }

    pub fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn executor() -> Executor {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        Executor::new(runtime, ShutdownHandle::new())
    }

    #[test]
    fn execute_in_place_returns_result() {
        let executor = executor();
        let value = executor.execute_in_place(async { Ok(7) }).unwrap();
        assert_eq!(7, value);
    }

    #[test]
    fn abort_cancels_in_flight_future() {
        let executor = executor();
        executor.shutdown_handle().shutdown();

        let err = executor
            .execute_in_place(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .unwrap_err();
        assert!(err.is::<ShutdownSignalError>());
    }
}
