use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single coupon code contributed by one source file. The same code may
/// exist under several files; the (code, file_name) pair is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub file_name: String,
    /// Unix seconds of the last upsert touching this record.
    pub last_seen: i64,
    pub active: bool,
}

/// Ledger row tracking one ingestion attempt of a source file. Logically
/// unique by (is_add, file_name); `id` stays stable across resumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub id: Uuid,
    /// MD5 of the raw compressed bytes, kept for audit only.
    pub md5: String,
    pub file_name: String,
    pub is_add: bool,
    pub size: i64,
    /// Lines durably handed to the store; the resume watermark.
    pub processed_count: i64,
    pub status: ProcessingStatus,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Initiated,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Initiated => "initiated",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "initiated" => Some(ProcessingStatus::Initiated),
            "completed" => Some(ProcessingStatus::Completed),
            "failed" => Some(ProcessingStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
