use tokio::signal;

use crate::executor::Executor;

/// Abort the run when the process receives Ctrl-C.
pub(crate) fn start_shutdown_listener(executor: &Executor) {
    let handle = executor.shutdown_handle().clone();
    executor.spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                log::warn!("Received shutdown signal, aborting run...");
                handle.shutdown();
            }
            Err(e) => {
                log::error!("Failed to listen for Ctrl-C, the run can only be aborted by thresholds: {e:?}");
            }
        }
    });
}
