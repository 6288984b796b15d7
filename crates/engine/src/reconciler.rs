//! Escalation of permanently failed snapshots to the reconciler.
//!
//! How the reconciler re-derives authoritative records is not this crate's
//! business; it only hands over each failed snapshot once per run.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use verifier_storage::ExistsSnapshot;

pub const DEFAULT_RECONCILER_CONFIG: &str = "/etc/verifier/reconciler_config.json";

#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    #[error("failed to read reconciler config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid reconciler config {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("reconciler queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode reconcile request: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Hand over a snapshot that failed verification for good.
    async fn failed_validation(&self, exists: &ExistsSnapshot) -> Result<(), ReconcilerError>;
}

/// Reconciler configuration file (JSON).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReconcilerConfig {
    /// File the reconcile requests are appended to.
    pub queue_path: PathBuf,
    /// Recorded on each request so the reconciler knows who asked.
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "default".to_string()
}

impl ReconcilerConfig {
    pub async fn load(path: &Path) -> Result<Self, ReconcilerError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ReconcilerError::ReadConfig {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_str(&text).map_err(|source| ReconcilerError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Serialize)]
struct ReconcileRequest<'a> {
    exists_id: u64,
    instance: &'a str,
    #[serde(with = "time::serde::rfc3339::option")]
    launched_at: Option<OffsetDateTime>,
    fail_reason: Option<&'a str>,
    region: &'a str,
}

/// Appends one JSON reconcile request per failed snapshot to a queue file.
pub struct SpoolReconciler {
    config: ReconcilerConfig,
}

impl SpoolReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Reconciler for SpoolReconciler {
    async fn failed_validation(&self, exists: &ExistsSnapshot) -> Result<(), ReconcilerError> {
        let mut line = serde_json::to_vec(&ReconcileRequest {
            exists_id: exists.id,
            instance: &exists.instance,
            launched_at: exists.launched_at,
            fail_reason: exists.fail_reason.as_deref(),
            region: &self.config.region,
        })?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.queue_path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use verifier_storage::fixtures::exists_snapshot;

    #[tokio::test]
    async fn loads_config_and_appends_requests() {
        let dir = tempfile::tempdir().unwrap();
        let queue = dir.path().join("reconcile.jsonl");
        let config_path = dir.path().join("reconciler_config.json");
        std::fs::write(
            &config_path,
            serde_json::json!({"queue_path": queue, "region": "dfw"}).to_string(),
        )
        .unwrap();

        let config = ReconcilerConfig::load(&config_path).await.unwrap();
        assert_eq!(config.region, "dfw");
        let reconciler = SpoolReconciler::new(config);

        let mut exists = exists_snapshot(5, "inst-5", datetime!(2026-01-05 10:00:00 UTC));
        exists.fail_reason = Some("Expected tenant to be 'a' got 'b'".to_string());
        reconciler.failed_validation(&exists).await.unwrap();
        reconciler.failed_validation(&exists).await.unwrap();

        let written = std::fs::read_to_string(&queue).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["exists_id"], 5);
        assert_eq!(lines[0]["instance"], "inst-5");
        assert_eq!(lines[0]["region"], "dfw");
        assert_eq!(lines[0]["fail_reason"], "Expected tenant to be 'a' got 'b'");
    }

    #[tokio::test]
    async fn missing_config_is_a_read_error() {
        let err = ReconcilerConfig::load(Path::new("/nonexistent/reconciler.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcilerError::ReadConfig { .. }));
    }
}
