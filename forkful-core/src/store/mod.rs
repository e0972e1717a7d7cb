use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{ProcessedFile, ProcessingStatus};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryCouponStore;
pub use postgres::PostgresCouponStore;

/// Persistence capability consumed by the ingestor (writer) and the order
/// service (reader). Implementations must tolerate concurrent callers; the
/// processor issues batched writes from several workers at once.
#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Bulk upsert: every code becomes (or stays) active under `file_name`,
    /// with `last_seen` refreshed. Ids are assigned on first insert and kept
    /// afterwards. Empty input succeeds with no side effect.
    async fn add_coupons(&self, file_name: &str, codes: &[String]) -> Result<()>;

    /// Bulk update marking the given codes inactive under `file_name`.
    /// Codes that were never added are silently tolerated.
    async fn deactivate_coupons(&self, file_name: &str, codes: &[String]) -> Result<()>;

    /// Ledger lookup by the (is_add, file_name) composite key. `None` means
    /// the file has never been seen, which is distinct from an error.
    async fn is_file_processed(
        &self,
        is_add: bool,
        file_name: &str,
    ) -> Result<Option<ProcessedFile>>;

    /// Insert a ledger row, or refresh it when the id already exists (resume
    /// reuses the prior id). The stored watermark is left untouched on
    /// refresh; only the deferred finaliser rewrites it.
    async fn insert_processed_file(&self, file: &ProcessedFile) -> Result<()>;

    /// Set the terminal status and final count on the ledger row.
    async fn update_processing_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        processed_count: i64,
    ) -> Result<()>;

    /// True iff at least two distinct files currently carry `code` active.
    async fn validate_coupon_code(&self, code: &str) -> Result<bool>;
}
