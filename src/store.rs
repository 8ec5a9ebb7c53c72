use crate::rule::ActionType;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

/// Append-only record of one action attempt against one object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: uuid::Uuid,
    pub rule_id: String,
    pub object_id: String,
    pub action: ActionType,
    pub status: ExecutionStatus,
    pub reason: Option<String>,
    pub executed_at: DateTime<Utc>,
    /// Running count of successful executions for this (rule, object) pair,
    /// this record included when it succeeded.
    pub execution_count: u32,
}

/// Append-only summary of one rule run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: uuid::Uuid,
    pub rule_id: String,
    pub matched_count: usize,
    pub executed_count: usize,
    pub status: String,
    pub dry_run: bool,
    pub finished_at: DateTime<Utc>,
}

/// Persisted execution history. Safeguard checks read through this store,
/// so under concurrent runs of the same rule its answers are best-effort;
/// callers serialize runs per rule id to keep the limits strict.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Number of successful executions for the pair, optionally only those
    /// at or after `since`.
    async fn count_executions(
        &self,
        rule_id: &str,
        object_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<u32>;

    async fn last_successful_execution(
        &self,
        rule_id: &str,
        object_id: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    async fn append(&self, record: ExecutionRecord) -> Result<()>;

    async fn append_summary(&self, record: RunRecord) -> Result<()>;

    /// Most recent records for a rule, newest first.
    async fn recent_records(&self, rule_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>>;
}

/// Sled-backed store. Record keys embed rule, object and timestamp so the
/// per-pair history is one prefix scan:
/// `exec:{rule_id}:{object_id}:{nanos:020}:{uuid}`.
pub struct SledExecutionStore {
    db: sled::Db,
}

impl SledExecutionStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn pair_prefix(rule_id: &str, object_id: &str) -> String {
        format!("exec:{}:{}:", rule_id, object_id)
    }

    fn record_key(record: &ExecutionRecord) -> String {
        format!(
            "exec:{}:{}:{:020}:{}",
            record.rule_id,
            record.object_id,
            record.executed_at.timestamp_nanos_opt().unwrap_or(0),
            record.id
        )
    }

    fn iter_pair(
        &self,
        rule_id: &str,
        object_id: &str,
    ) -> impl Iterator<Item = ExecutionRecord> + '_ {
        self.db
            .scan_prefix(Self::pair_prefix(rule_id, object_id))
            .filter_map(|kv| kv.ok())
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
    }
}

#[async_trait]
impl ExecutionStore for SledExecutionStore {
    async fn count_executions(
        &self,
        rule_id: &str,
        object_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<u32> {
        let count = self
            .iter_pair(rule_id, object_id)
            .filter(|r| r.status == ExecutionStatus::Success)
            .filter(|r| since.map_or(true, |s| r.executed_at >= s))
            .count();
        Ok(count as u32)
    }

    async fn last_successful_execution(
        &self,
        rule_id: &str,
        object_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .iter_pair(rule_id, object_id)
            .filter(|r| r.status == ExecutionStatus::Success)
            .map(|r| r.executed_at)
            .max())
    }

    async fn append(&self, record: ExecutionRecord) -> Result<()> {
        let key = Self::record_key(&record);
        let value = serde_json::to_vec(&record)?;
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    async fn append_summary(&self, record: RunRecord) -> Result<()> {
        let key = format!(
            "run:{}:{:020}:{}",
            record.rule_id,
            record.finished_at.timestamp_nanos_opt().unwrap_or(0),
            record.id
        );
        let value = serde_json::to_vec(&record)?;
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    async fn recent_records(&self, rule_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let mut records: Vec<ExecutionRecord> = self
            .db
            .scan_prefix(format!("exec:{}:", rule_id))
            .filter_map(|kv| kv.ok())
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect();
        records.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        records.truncate(limit);
        Ok(records)
    }
}
