use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use flate2::read::GzDecoder;
use md5::{Digest, Md5};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ProcessorConfig;
use crate::error::{CouponError, Result};
use crate::model::{ProcessedFile, ProcessingStatus};
use crate::store::CouponStore;

use super::workers::{BatchSink, WorkerPool, DEFAULT_CHANNEL_CAPACITY, DEFAULT_WORKER_COUNT};

const HASH_BUFFER_BYTES: usize = 64 * 1024;
/// Upper bound on a single line; also the decoder's read-ahead buffer.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Drives one coupon file from discovery to a terminal ledger status:
/// fingerprint, ledger reconciliation, gzip line scan, batched fan-out to
/// the worker pool, and finalisation.
pub struct FileProcessor {
    store: Arc<dyn CouponStore>,
    config: ProcessorConfig,
    worker_count: usize,
    channel_capacity: usize,
}

struct Fingerprint {
    file: File,
    md5: String,
    size: i64,
}

impl FileProcessor {
    pub fn new(store: Arc<dyn CouponStore>, config: ProcessorConfig) -> Self {
        Self {
            store,
            config,
            worker_count: DEFAULT_WORKER_COUNT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Override the pool sizing. Capacity bounds in-flight memory to
    /// roughly (capacity + workers) x batch-size codes.
    pub fn with_pool_settings(mut self, worker_count: usize, channel_capacity: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self.channel_capacity = channel_capacity.max(1);
        self
    }

    /// Process a single file. Failures stay local: they are logged, recorded
    /// in the ledger once a row exists, and never surface to the caller.
    pub async fn process_file(&self, path: &Path, is_add: bool, cancel: &CancellationToken) {
        info!("Processing file: {}", path.display());

        let fingerprint = {
            let path_buf = path.to_path_buf();
            match tokio::task::spawn_blocking(move || fingerprint_file(&path_buf)).await {
                Ok(Ok(fingerprint)) => fingerprint,
                Ok(Err(e)) => {
                    error!("failed to fingerprint {}: {}", path.display(), e);
                    return;
                }
                Err(e) => {
                    error!("fingerprint task failed for {}: {}", path.display(), e);
                    return;
                }
            }
        };

        let file_name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_string(),
            None => {
                error!("file has no usable name: {}", path.display());
                return;
            }
        };

        let prior = match self.store.is_file_processed(is_add, &file_name).await {
            Ok(prior) => prior,
            Err(e) => {
                error!("failed to check processed files: {}", e);
                return;
            }
        };

        let mut id = Uuid::new_v4();
        let mut watermark = 0i64;
        if let Some(prior) = prior {
            match prior.status {
                ProcessingStatus::Completed => {
                    info!("File {} already processed, skipping", file_name);
                    return;
                }
                ProcessingStatus::Initiated => {
                    info!("File {} is already under processing, skipping", file_name);
                    return;
                }
                ProcessingStatus::Failed => {
                    id = prior.id;
                    if prior.processed_count > 0 {
                        watermark = prior.processed_count;
                        info!("Resuming {} from line {}", file_name, watermark + 1);
                    }
                }
            }
        }

        let record = ProcessedFile {
            id,
            md5: fingerprint.md5,
            file_name: file_name.clone(),
            is_add,
            size: fingerprint.size,
            processed_count: 0,
            status: ProcessingStatus::Initiated,
            timestamp: Utc::now().timestamp(),
        };
        if let Err(e) = self.store.insert_processed_file(&record).await {
            error!("failed to record processed file: {}", e);
            return;
        }

        let (total, outcome) = self
            .pump_batches(fingerprint.file, is_add, &file_name, watermark, cancel.clone())
            .await;

        // The ledger is finalised on every exit path, cancellation included;
        // the next run's resume decision depends on this row.
        let status = if outcome.is_ok() {
            ProcessingStatus::Completed
        } else {
            ProcessingStatus::Failed
        };
        if let Err(e) = self.store.update_processing_status(id, status, total).await {
            error!("failed to record processed file: {}", e);
        }

        match outcome {
            Ok(()) => info!("Processed {} coupons from {}", total, file_name),
            Err(CouponError::Cancelled) => {
                info!("Cancelled {} after {} committed coupons", file_name, total)
            }
            Err(e) => error!("failed to process file {}: {}", file_name, e),
        }
    }

    /// Decompress and batch the file, fanning batches out to the worker
    /// pool. Returns the committed line count and the terminal outcome.
    async fn pump_batches(
        &self,
        file: File,
        is_add: bool,
        file_name: &str,
        watermark: i64,
        cancel: CancellationToken,
    ) -> (i64, Result<()>) {
        let batch_size = self.config.effective_batch_size();
        let (batch_tx, batch_rx) = mpsc::channel::<Vec<String>>(self.channel_capacity);
        let (error_tx, error_rx) = mpsc::channel::<CouponError>(1);
        let committed = Arc::new(AtomicI64::new(watermark));
        let sink = Arc::new(BatchSink::new(
            Arc::clone(&self.store),
            file_name.to_string(),
            is_add,
        ));
        let pool = WorkerPool::spawn(
            self.worker_count,
            sink,
            batch_rx,
            error_tx,
            Arc::clone(&committed),
            cancel.clone(),
        );

        let reader = tokio::task::spawn_blocking(move || {
            read_lines(file, batch_size, watermark, batch_tx, error_rx, cancel)
        });

        let (mut outcome, mut error_rx) = match reader.await {
            Ok((outcome, error_rx)) => (outcome, error_rx),
            Err(e) => {
                pool.join().await;
                return (
                    committed.load(Ordering::Relaxed),
                    Err(CouponError::Storage(format!("line reader task failed: {e}"))),
                );
            }
        };

        // The batch sender dropped with the reader, so the pool drains what
        // is queued and exits.
        pool.join().await;

        if outcome.is_ok() {
            if let Ok(err) = error_rx.try_recv() {
                outcome = Err(err);
            }
        }

        (committed.load(Ordering::Relaxed), outcome)
    }
}

/// Stream the raw compressed bytes through MD5, then rewind for decoding.
fn fingerprint_file(path: &Path) -> std::io::Result<Fingerprint> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len() as i64;

    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; HASH_BUFFER_BYTES];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let md5 = hex::encode(hasher.finalize());
    file.seek(SeekFrom::Start(0))?;

    Ok(Fingerprint { file, md5, size })
}

/// Blocking producer: scans decompressed lines, skips up to the watermark,
/// and hands full batches to the pool. Runs on the blocking thread pool so a
/// full channel parks decompression instead of a runtime worker.
fn read_lines(
    file: File,
    batch_size: usize,
    watermark: i64,
    batch_tx: mpsc::Sender<Vec<String>>,
    mut error_rx: mpsc::Receiver<CouponError>,
    cancel: CancellationToken,
) -> (Result<()>, mpsc::Receiver<CouponError>) {
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::with_capacity(MAX_LINE_BYTES, decoder);
    let mut line = String::new();
    let mut line_number = 0i64;
    let mut codes: Vec<String> = Vec::with_capacity(batch_size);

    loop {
        if cancel.is_cancelled() {
            return (Err(CouponError::Cancelled), error_rx);
        }
        line.clear();
        let read = match reader.read_line(&mut line) {
            Ok(read) => read,
            Err(e) => return (Err(CouponError::Io(e)), error_rx),
        };
        if read == 0 {
            break;
        }
        line_number += 1;
        if line_number <= watermark {
            continue;
        }
        let code = line.trim();
        if code.is_empty() {
            continue;
        }
        codes.push(code.to_string());
        if codes.len() >= batch_size {
            let batch = std::mem::replace(&mut codes, Vec::with_capacity(batch_size));
            if let Err(e) = enqueue(batch, &batch_tx, &mut error_rx, &cancel) {
                return (Err(e), error_rx);
            }
        }
    }

    if !codes.is_empty() {
        if let Err(e) = enqueue(codes, &batch_tx, &mut error_rx, &cancel) {
            return (Err(e), error_rx);
        }
    }

    (Ok(()), error_rx)
}

fn enqueue(
    batch: Vec<String>,
    batch_tx: &mpsc::Sender<Vec<String>>,
    error_rx: &mut mpsc::Receiver<CouponError>,
    cancel: &CancellationToken,
) -> Result<()> {
    // A published worker failure stops the producer before more work queues.
    if let Ok(err) = error_rx.try_recv() {
        return Err(err);
    }
    if batch_tx.blocking_send(batch).is_err() {
        // Every worker has exited; surface whichever error got published.
        if let Ok(err) = error_rx.try_recv() {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(CouponError::Cancelled);
        }
        return Err(CouponError::Storage("batch channel closed".to_string()));
    }
    Ok(())
}
