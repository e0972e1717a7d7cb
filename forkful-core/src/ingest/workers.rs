use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::{CouponError, Result};
use crate::store::CouponStore;

pub(crate) const DEFAULT_WORKER_COUNT: usize = 4;
pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Applies batches to the store with the operation fixed by the directory
/// the file arrived in.
pub(crate) struct BatchSink {
    store: Arc<dyn CouponStore>,
    file_name: String,
    is_add: bool,
}

impl BatchSink {
    pub(crate) fn new(store: Arc<dyn CouponStore>, file_name: String, is_add: bool) -> Self {
        Self {
            store,
            file_name,
            is_add,
        }
    }

    pub(crate) async fn apply(&self, codes: &[String]) -> Result<()> {
        if codes.is_empty() {
            return Ok(());
        }
        if self.is_add {
            self.store.add_coupons(&self.file_name, codes).await
        } else {
            self.store.deactivate_coupons(&self.file_name, codes).await
        }
    }
}

/// Fixed-size pool draining the batch channel. The first store failure is
/// published to the single-slot error channel and stops that worker; the
/// rest keep draining until the channel closes. Cancellation drops in-flight
/// work immediately.
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(
        worker_count: usize,
        sink: Arc<BatchSink>,
        batch_rx: mpsc::Receiver<Vec<String>>,
        error_tx: mpsc::Sender<CouponError>,
        committed: Arc<AtomicI64>,
        cancel: CancellationToken,
    ) -> Self {
        let batch_rx = Arc::new(Mutex::new(batch_rx));
        let handles = (0..worker_count)
            .map(|worker_id| {
                let sink = Arc::clone(&sink);
                let batch_rx = Arc::clone(&batch_rx);
                let error_tx = error_tx.clone();
                let committed = Arc::clone(&committed);
                let cancel = cancel.clone();
                tokio::spawn(run_worker(
                    worker_id, sink, batch_rx, error_tx, committed, cancel,
                ))
            })
            .collect();
        Self { handles }
    }

    pub(crate) async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    worker_id: usize,
    sink: Arc<BatchSink>,
    batch_rx: Arc<Mutex<mpsc::Receiver<Vec<String>>>>,
    error_tx: mpsc::Sender<CouponError>,
    committed: Arc<AtomicI64>,
    cancel: CancellationToken,
) {
    loop {
        let received = {
            let mut rx = batch_rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                batch = rx.recv() => batch,
            }
        };
        let Some(codes) = received else {
            return;
        };
        if cancel.is_cancelled() {
            return;
        }
        match sink.apply(&codes).await {
            Ok(()) => {
                committed.fetch_add(codes.len() as i64, Ordering::Relaxed);
            }
            Err(err) => {
                error!("worker {} failed to process batch: {}", worker_id, err);
                // Only the first failure fits the slot; later ones are dropped.
                let _ = error_tx.try_send(err);
                return;
            }
        }
    }
}
