//! Convergence loop
//!
//! A single task pulls [`ReconciliationResult`]s off the watcher channel and
//! runs one [`Reconciler`] pass per result, strictly one after another.

mod reconciler;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::types::ReconciliationResult;

pub use reconciler::{PassSummary, Reconciler};

/// Consume results until cancelled or until the watcher goes away
///
/// Cancellation is only observed between passes; a pass that has started
/// runs to completion.
pub async fn run(
    reconciler: Arc<Reconciler>,
    mut results: mpsc::Receiver<ReconciliationResult>,
    cancel: CancellationToken,
) {
    info!("convergence loop started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("shutdown requested, stopping convergence loop");
                break;
            }
            result = results.recv() => {
                let Some(result) = result else {
                    info!("result channel closed, stopping convergence loop");
                    break;
                };
                reconciler.reconcile(&result).await;
            }
        }
    }
}
