use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::primitives::ByteStream;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use uuid::Uuid;

use crate::auth::RequestMeta;

/// ActivityRecord
///
/// One append-only activity document: who did what, from where, and when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityRecord {
    pub user_id: Option<i32>,
    pub username: Option<String>,
    pub action: String,
    pub path: String,
    pub method: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        action: &str,
        user_id: Option<i32>,
        username: Option<String>,
        meta: &RequestMeta,
    ) -> Self {
        Self {
            user_id,
            username,
            action: action.to_string(),
            path: meta.path.clone(),
            method: meta.method.clone(),
            ip: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(ThisError, Debug)]
#[error("activity log write failed: {0}")]
pub struct ActivityError(pub String);

/// ActivityLog Contract
///
/// The document-oriented activity store. Writes are best-effort from the caller's point
/// of view: see `record_activity`.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Ensures the configured bucket exists. Used in the `Env::Local` setup to provision
    /// the MinIO bucket.
    async fn ensure_bucket_exists(&self);

    async fn append(&self, record: &ActivityRecord) -> Result<(), ActivityError>;
}

/// S3ActivityLog
///
/// Writes each record as its own JSON object under
/// `activity/<yyyy>/<mm>/<dd>/<uuid>.json` in an S3-compatible bucket.
///
/// `force_path_style(true)` is required for MinIO.
#[derive(Clone)]
pub struct S3ActivityLog {
    client: s3::Client,
    bucket_name: String,
}

impl S3ActivityLog {
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
        }
    }
}

/// Object key for a record: date-partitioned, unique per event.
pub fn object_key(record: &ActivityRecord) -> String {
    format!(
        "activity/{}/{}.json",
        record.timestamp.format("%Y/%m/%d"),
        Uuid::new_v4()
    )
}

#[async_trait]
impl ActivityLog for S3ActivityLog {
    async fn ensure_bucket_exists(&self) {
        // CreateBucket on an existing bucket just errors; nothing to do then.
        let _ = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await;
    }

    async fn append(&self, record: &ActivityRecord) -> Result<(), ActivityError> {
        let body = serde_json::to_vec(record).map_err(|e| ActivityError(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(object_key(record))
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| ActivityError(e.to_string()))?;

        Ok(())
    }
}

/// MockActivityLog
///
/// In-memory activity log for tests. Keeps every appended record and can be told to
/// fail every write.
#[derive(Default)]
pub struct MockActivityLog {
    pub should_fail: AtomicBool,
    records: Mutex<Vec<ActivityRecord>>,
}

impl MockActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: AtomicBool::new(true),
            records: Mutex::default(),
        }
    }

    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ActivityLog for MockActivityLog {
    async fn ensure_bucket_exists(&self) {}

    async fn append(&self, record: &ActivityRecord) -> Result<(), ActivityError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(ActivityError("Mock activity log: failure requested".to_string()));
        }
        self.records
            .lock()
            .map_err(|_| ActivityError("mock log poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}

/// ActivityState
///
/// Shared handle to the activity log inside the application state.
pub type ActivityState = Arc<dyn ActivityLog>;

/// record_activity
///
/// Best-effort append. A failure is logged and swallowed so it never fails the
/// operation being recorded.
pub async fn record_activity(log: &dyn ActivityLog, record: ActivityRecord) {
    if let Err(e) = log.append(&record).await {
        tracing::warn!(action = %record.action, "activity log write failed: {e}");
    }
}
