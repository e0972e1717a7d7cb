#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use uuid::Uuid;

use forkful_core::{
    CouponError, CouponStore, InMemoryCouponStore, ProcessedFile, ProcessingStatus,
    ProcessorConfig, Result,
};

/// Gzip `contents` into `dir/name`. Written in one go, so only suitable for
/// files that exist before the watcher looks at the directory.
pub fn write_gz(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(contents.as_bytes()).unwrap();
    encoder.finish().unwrap();
    path
}

/// Gzip `contents` into `dir/name` via a temporary name plus rename, so a
/// live watcher only sees the file once it is complete.
pub fn write_gz_renamed(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let staged = write_gz(dir, &format!("{name}.partial"), contents);
    let path = dir.join(name);
    std::fs::rename(&staged, &path).unwrap();
    path
}

pub fn codes(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

pub fn numbered_lines(count: usize) -> String {
    let mut out = String::new();
    for i in 1..=count {
        out.push_str(&format!("L{i}\n"));
    }
    out
}

pub fn processor_config(data_directory: &Path, batch_size: usize) -> ProcessorConfig {
    ProcessorConfig {
        data_directory: data_directory.to_path_buf(),
        batch_size,
    }
}

/// Store wrapper that fails every batch write from the `fail_from`-th call
/// onward (1-based). Reads pass straight through.
pub struct FlakyStore {
    inner: Arc<InMemoryCouponStore>,
    batch_calls: AtomicUsize,
    fail_from: usize,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryCouponStore>, fail_from: usize) -> Self {
        Self {
            inner,
            batch_calls: AtomicUsize::new(0),
            fail_from,
        }
    }

    fn next_call_fails(&self) -> bool {
        self.batch_calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.fail_from
    }
}

#[async_trait]
impl CouponStore for FlakyStore {
    async fn add_coupons(&self, file_name: &str, codes: &[String]) -> Result<()> {
        if self.next_call_fails() {
            return Err(CouponError::Storage("injected batch failure".to_string()));
        }
        self.inner.add_coupons(file_name, codes).await
    }

    async fn deactivate_coupons(&self, file_name: &str, codes: &[String]) -> Result<()> {
        if self.next_call_fails() {
            return Err(CouponError::Storage("injected batch failure".to_string()));
        }
        self.inner.deactivate_coupons(file_name, codes).await
    }

    async fn is_file_processed(
        &self,
        is_add: bool,
        file_name: &str,
    ) -> Result<Option<ProcessedFile>> {
        self.inner.is_file_processed(is_add, file_name).await
    }

    async fn insert_processed_file(&self, file: &ProcessedFile) -> Result<()> {
        self.inner.insert_processed_file(file).await
    }

    async fn update_processing_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        processed_count: i64,
    ) -> Result<()> {
        self.inner
            .update_processing_status(id, status, processed_count)
            .await
    }

    async fn validate_coupon_code(&self, code: &str) -> Result<bool> {
        self.inner.validate_coupon_code(code).await
    }
}

/// Store wrapper recording every batch write: call count, the codes sent,
/// and the peak number of concurrent writes. An optional per-call delay
/// simulates a slow backend.
pub struct RecordingStore {
    inner: Arc<InMemoryCouponStore>,
    delay: Duration,
    batch_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<InMemoryCouponStore>) -> Self {
        Self::with_delay(inner, Duration::ZERO)
    }

    pub fn with_delay(inner: Arc<InMemoryCouponStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            batch_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn sent_codes(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    async fn record(&self, codes: &[String]) {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.sent.lock().unwrap().extend(codes.iter().cloned());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl CouponStore for RecordingStore {
    async fn add_coupons(&self, file_name: &str, codes: &[String]) -> Result<()> {
        self.record(codes).await;
        let result = self.inner.add_coupons(file_name, codes).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn deactivate_coupons(&self, file_name: &str, codes: &[String]) -> Result<()> {
        self.record(codes).await;
        let result = self.inner.deactivate_coupons(file_name, codes).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn is_file_processed(
        &self,
        is_add: bool,
        file_name: &str,
    ) -> Result<Option<ProcessedFile>> {
        self.inner.is_file_processed(is_add, file_name).await
    }

    async fn insert_processed_file(&self, file: &ProcessedFile) -> Result<()> {
        self.inner.insert_processed_file(file).await
    }

    async fn update_processing_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        processed_count: i64,
    ) -> Result<()> {
        self.inner
            .update_processing_status(id, status, processed_count)
            .await
    }

    async fn validate_coupon_code(&self, code: &str) -> Result<bool> {
        self.inner.validate_coupon_code(code).await
    }
}
