use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{CouponError, Result};
use crate::model::{Coupon, ProcessedFile, ProcessingStatus};
use crate::store::CouponStore;

/// In-memory store double. Implements the same contract as the Postgres
/// backend so the pipeline can be exercised without a database.
#[derive(Debug, Default)]
pub struct InMemoryCouponStore {
    inner: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    /// Keyed by (code, file_name), mirroring the unique constraint.
    coupons: HashMap<(String, String), Coupon>,
    ledger: HashMap<Uuid, ProcessedFile>,
}

impl InMemoryCouponStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one coupon record, if present.
    pub fn coupon(&self, code: &str, file_name: &str) -> Option<Coupon> {
        let state = self.inner.lock().unwrap();
        state
            .coupons
            .get(&(code.to_string(), file_name.to_string()))
            .cloned()
    }

    /// All records contributed by one file, in no particular order.
    pub fn coupons_for_file(&self, file_name: &str) -> Vec<Coupon> {
        let state = self.inner.lock().unwrap();
        state
            .coupons
            .values()
            .filter(|coupon| coupon.file_name == file_name)
            .cloned()
            .collect()
    }

    pub fn coupon_count(&self) -> usize {
        self.inner.lock().unwrap().coupons.len()
    }

    /// Ledger snapshot by the logical (is_add, file_name) key.
    pub fn ledger_entry(&self, is_add: bool, file_name: &str) -> Option<ProcessedFile> {
        let state = self.inner.lock().unwrap();
        state
            .ledger
            .values()
            .find(|file| file.is_add == is_add && file.file_name == file_name)
            .cloned()
    }

    pub fn ledger_len(&self) -> usize {
        self.inner.lock().unwrap().ledger.len()
    }
}

#[async_trait]
impl CouponStore for InMemoryCouponStore {
    async fn add_coupons(&self, file_name: &str, codes: &[String]) -> Result<()> {
        if codes.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let mut state = self.inner.lock().unwrap();
        for code in codes {
            let key = (code.clone(), file_name.to_string());
            state
                .coupons
                .entry(key)
                .and_modify(|coupon| {
                    coupon.last_seen = now;
                    coupon.active = true;
                })
                .or_insert_with(|| Coupon {
                    id: Uuid::new_v4(),
                    code: code.clone(),
                    file_name: file_name.to_string(),
                    last_seen: now,
                    active: true,
                });
        }
        Ok(())
    }

    async fn deactivate_coupons(&self, file_name: &str, codes: &[String]) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        for code in codes {
            let key = (code.clone(), file_name.to_string());
            if let Some(coupon) = state.coupons.get_mut(&key) {
                coupon.active = false;
            }
        }
        Ok(())
    }

    async fn is_file_processed(
        &self,
        is_add: bool,
        file_name: &str,
    ) -> Result<Option<ProcessedFile>> {
        Ok(self.ledger_entry(is_add, file_name))
    }

    async fn insert_processed_file(&self, file: &ProcessedFile) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        state
            .ledger
            .entry(file.id)
            .and_modify(|existing| {
                existing.md5 = file.md5.clone();
                existing.size = file.size;
                existing.status = file.status;
                existing.timestamp = file.timestamp;
            })
            .or_insert_with(|| file.clone());
        Ok(())
    }

    async fn update_processing_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        processed_count: i64,
    ) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        let entry = state
            .ledger
            .get_mut(&id)
            .ok_or_else(|| CouponError::Storage(format!("no ledger row with id {id}")))?;
        entry.status = status;
        entry.processed_count = processed_count;
        Ok(())
    }

    async fn validate_coupon_code(&self, code: &str) -> Result<bool> {
        let state = self.inner.lock().unwrap();
        let mut files_seen: Vec<&str> = Vec::with_capacity(2);
        for coupon in state.coupons.values() {
            if coupon.code == code && coupon.active && !files_seen.contains(&coupon.file_name.as_str())
            {
                files_seen.push(&coupon.file_name);
                if files_seen.len() >= 2 {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
