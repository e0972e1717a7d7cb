use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tokio::time::timeout;
use tracing::info;
use uuid::Uuid;

use crate::config::DbConfig;
use crate::error::{CouponError, Result};
use crate::model::{ProcessedFile, ProcessingStatus};
use crate::store::CouponStore;

const INDEX_CREATION_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONNECTIONS: u32 = 8;

/// Postgres-backed coupon store shared by the ingestor and the order path.
#[derive(Clone, Debug)]
pub struct PostgresCouponStore {
    pool: PgPool,
}

fn processed_file_from_row(row: &PgRow) -> Result<ProcessedFile> {
    let decode = |e: sqlx::Error| CouponError::Storage(format!("failed to decode ledger row: {e}"));

    let id: Uuid = row.try_get("id").map_err(decode)?;
    let status_raw: String = row.try_get("status").map_err(decode)?;
    let status = ProcessingStatus::parse(&status_raw).ok_or_else(|| {
        CouponError::Storage(format!(
            "unknown processing status {status_raw:?} on ledger row {id}"
        ))
    })?;

    Ok(ProcessedFile {
        id,
        md5: row.try_get("md5").map_err(decode)?,
        file_name: row.try_get("file_name").map_err(decode)?,
        is_add: row.try_get("is_add").map_err(decode)?,
        size: row.try_get("size").map_err(decode)?,
        processed_count: row.try_get("processed_count").map_err(decode)?,
        status,
        timestamp: row.try_get("timestamp").map_err(decode)?,
    })
}

impl PostgresCouponStore {
    /// Connect and bootstrap the schema, including the validation index the
    /// order path depends on. Index creation is bounded at ten seconds.
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        if config.kind != "postgres" {
            return Err(CouponError::Config(format!(
                "unsupported database type: {}",
                config.kind
            )));
        }

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(&config.connection_url())
            .await
            .map_err(|e| CouponError::Storage(format!("failed to connect to database: {e}")))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!("Coupon store ready on {}:{}", config.host, config.port);
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS coupons (
                id UUID PRIMARY KEY,
                code TEXT NOT NULL,
                file_name TEXT NOT NULL,
                last_seen BIGINT NOT NULL,
                active BOOLEAN NOT NULL,
                UNIQUE (code, file_name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS processed_files (
                id UUID PRIMARY KEY,
                md5 TEXT NOT NULL,
                file_name TEXT NOT NULL,
                is_add BOOLEAN NOT NULL,
                size BIGINT NOT NULL,
                processed_count BIGINT NOT NULL,
                status TEXT NOT NULL,
                timestamp BIGINT NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS processed_files_is_add_file_name_idx
                ON processed_files (is_add, file_name)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(self.pool())
                .await
                .map_err(|e| CouponError::Storage(format!("failed to ensure schema: {e}")))?;
        }

        // The partial index backs the short-circuiting validation query;
        // without it the lookup degrades to a full scan per order.
        let create_index = sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS coupons_code_file_name_active_idx
                ON coupons (code, file_name)
                WHERE active
            "#,
        )
        .execute(self.pool());

        timeout(INDEX_CREATION_TIMEOUT, create_index)
            .await
            .map_err(|_| {
                CouponError::Storage("timed out creating coupon validation index".to_string())
            })?
            .map_err(|e| CouponError::Storage(format!("failed to create validation index: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl CouponStore for PostgresCouponStore {
    async fn add_coupons(&self, file_name: &str, codes: &[String]) -> Result<()> {
        if codes.is_empty() {
            return Ok(());
        }

        // A multi-row ON CONFLICT DO UPDATE may not touch the same row
        // twice, so repeated codes within one batch are collapsed first.
        let mut seen = HashSet::with_capacity(codes.len());
        let unique: Vec<String> = codes
            .iter()
            .filter(|code| seen.insert(code.as_str()))
            .cloned()
            .collect();
        let ids: Vec<Uuid> = unique.iter().map(|_| Uuid::new_v4()).collect();

        sqlx::query(
            r#"
            INSERT INTO coupons (id, code, file_name, last_seen, active)
            SELECT t.id, t.code, $3, $4, TRUE
            FROM UNNEST($1::uuid[], $2::text[]) AS t(id, code)
            ON CONFLICT (code, file_name)
            DO UPDATE SET last_seen = EXCLUDED.last_seen, active = TRUE
            "#,
        )
        .bind(&ids)
        .bind(&unique)
        .bind(file_name)
        .bind(Utc::now().timestamp())
        .execute(self.pool())
        .await
        .map_err(|e| CouponError::Storage(format!("failed to upsert coupons: {e}")))?;

        Ok(())
    }

    async fn deactivate_coupons(&self, file_name: &str, codes: &[String]) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE coupons
            SET active = FALSE
            WHERE file_name = $1 AND code = ANY($2)
            "#,
        )
        .bind(file_name)
        .bind(codes)
        .execute(self.pool())
        .await
        .map_err(|e| CouponError::Storage(format!("failed to deactivate coupons: {e}")))?;

        Ok(())
    }

    async fn is_file_processed(
        &self,
        is_add: bool,
        file_name: &str,
    ) -> Result<Option<ProcessedFile>> {
        let row = sqlx::query(
            r#"
            SELECT id, md5, file_name, is_add, size, processed_count, status, timestamp
            FROM processed_files
            WHERE is_add = $1 AND file_name = $2
            "#,
        )
        .bind(is_add)
        .bind(file_name)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| CouponError::Storage(format!("failed to check processed files: {e}")))?;

        row.as_ref().map(processed_file_from_row).transpose()
    }

    async fn insert_processed_file(&self, file: &ProcessedFile) -> Result<()> {
        // Resume reuses the prior id; the conflict arm flips the row back to
        // the incoming status without disturbing the stored watermark.
        sqlx::query(
            r#"
            INSERT INTO processed_files
                (id, md5, file_name, is_add, size, processed_count, status, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id)
            DO UPDATE SET
                md5 = EXCLUDED.md5,
                size = EXCLUDED.size,
                status = EXCLUDED.status,
                timestamp = EXCLUDED.timestamp
            "#,
        )
        .bind(file.id)
        .bind(&file.md5)
        .bind(&file.file_name)
        .bind(file.is_add)
        .bind(file.size)
        .bind(file.processed_count)
        .bind(file.status.as_str())
        .bind(file.timestamp)
        .execute(self.pool())
        .await
        .map_err(|e| CouponError::Storage(format!("failed to insert processed file: {e}")))?;

        Ok(())
    }

    async fn update_processing_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        processed_count: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE processed_files
            SET status = $2, processed_count = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(processed_count)
        .execute(self.pool())
        .await
        .map_err(|e| CouponError::Storage(format!("failed to update processing status: {e}")))?;

        Ok(())
    }

    async fn validate_coupon_code(&self, code: &str) -> Result<bool> {
        // LIMIT 2 keeps the probe from materialising every matching file.
        let files = sqlx::query_scalar::<_, String>(
            r#"
            SELECT file_name
            FROM coupons
            WHERE code = $1 AND active
            GROUP BY file_name
            LIMIT 2
            "#,
        )
        .bind(code)
        .fetch_all(self.pool())
        .await
        .map_err(|e| CouponError::Storage(format!("failed to validate coupon code: {e}")))?;

        Ok(files.len() >= 2)
    }
}
