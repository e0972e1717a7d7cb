//! Coupon ingestion pipeline for the forkful ordering backend.
//!
//! The pipeline watches a data directory for gzip-compressed code files,
//! streams them through a batching worker pool into the coupon store, and
//! keeps a processed-file ledger so interrupted runs resume where they
//! stopped. The store also answers the order path's validation query: a
//! code is accepted only when at least two distinct source files carry it
//! active.

pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod store;

pub use config::{Config, DbConfig, ProcessorConfig, DEFAULT_BATCH_SIZE};
pub use error::{CouponError, Result};
pub use ingest::{DirectoryWatcher, FileProcessor};
pub use model::{Coupon, ProcessedFile, ProcessingStatus};
pub use store::{CouponStore, InMemoryCouponStore, PostgresCouponStore};
