//! Download daemon client
//!
//! The client machine hands NZBs to an NZBGet daemon by dropping them in its
//! scan directory, asks it to rescan, then watches its history for finished
//! jobs. [`NzbGetClient`] talks to NZBGet's JSON-RPC endpoint.

use crate::config::{DaemonConfig, RetryConfig};
use crate::error::{CollaboratorError, Error, Result};
use crate::job::JobRecord;
use crate::retry::with_retry;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

pub mod process;

pub use process::{ProcessControl, SystemProcessControl};

/// Operations the control loop needs from the download daemon
#[async_trait]
pub trait DownloadDaemonClient: Send + Sync {
    /// Rescan the NZB directory for new jobs
    async fn scan(&self) -> Result<()>;

    /// Finished (and failed) jobs
    async fn history(&self) -> Result<Vec<JobRecord>>;

    /// Jobs still downloading
    async fn queue(&self) -> Result<Vec<JobRecord>>;

    /// Remove jobs from the history
    async fn delete(&self, ids: &[i32]) -> Result<()>;
}

/// History/queue entry as NZBGet reports it
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct NzbGetEntry {
    #[serde(rename = "NZBID")]
    nzb_id: i32,
    #[serde(rename = "FileSizeMB")]
    file_size_mb: i32,
    #[serde(rename = "RemainingSizeMB")]
    remaining_size_mb: i32,
    active_downloads: i32,
    #[serde(rename = "NZBFilename")]
    nzb_filename: Option<String>,
    name: Option<String>,
    dest_dir: Option<String>,
    final_dir: Option<String>,
    status: Option<String>,
}

impl From<NzbGetEntry> for JobRecord {
    fn from(entry: NzbGetEntry) -> Self {
        JobRecord {
            job_id: entry.nzb_id,
            file_size_mb: entry.file_size_mb,
            remaining_size_mb: entry.remaining_size_mb,
            active_downloads: entry.active_downloads,
            nzb_file_name: entry.nzb_filename,
            display_name: entry.name,
            dest_dir: entry.dest_dir,
            final_dir: entry.final_dir,
            status: entry.status,
            standardized_name: None,
            renamed_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcReply<T> {
    result: Option<T>,
    error: Option<Value>,
}

/// [`DownloadDaemonClient`] over NZBGet JSON-RPC with HTTP basic auth
pub struct NzbGetClient {
    http_client: reqwest::Client,
    config: DaemonConfig,
    retry: RetryConfig,
}

impl NzbGetClient {
    /// Create a client for `config.url`
    pub fn new(config: DaemonConfig, retry: RetryConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Other(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            config,
            retry,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        with_retry(&self.retry, || self.call_once(method, &params)).await
    }

    async fn call_once<T: DeserializeOwned>(&self, method: &str, params: &Value) -> Result<T> {
        debug!(method, "daemon RPC");
        let response = self
            .http_client
            .post(&self.config.url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&json!({ "method": method, "params": params }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Daemon(format!(
                "{method}: HTTP {}",
                status.as_u16()
            ))
            .into());
        }

        let reply: RpcReply<T> = response.json().await?;
        if let Some(error) = reply.error.filter(|e| !e.is_null()) {
            return Err(CollaboratorError::Daemon(format!("{method}: {error}")).into());
        }
        reply
            .result
            .ok_or_else(|| CollaboratorError::Daemon(format!("{method}: empty result")).into())
    }

    async fn call_bool(&self, method: &str, params: Value) -> Result<()> {
        if self.call::<bool>(method, params).await? {
            Ok(())
        } else {
            Err(CollaboratorError::Daemon(format!("{method} returned false")).into())
        }
    }
}

#[async_trait]
impl DownloadDaemonClient for NzbGetClient {
    async fn scan(&self) -> Result<()> {
        self.call_bool("scan", json!([])).await
    }

    async fn history(&self) -> Result<Vec<JobRecord>> {
        let entries: Vec<NzbGetEntry> = self.call("history", json!([false])).await?;
        Ok(entries.into_iter().map(JobRecord::from).collect())
    }

    async fn queue(&self) -> Result<Vec<JobRecord>> {
        let entries: Vec<NzbGetEntry> = self.call("listgroups", json!([0])).await?;
        Ok(entries.into_iter().map(JobRecord::from).collect())
    }

    async fn delete(&self, ids: &[i32]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.call_bool("editqueue", json!(["HistoryDelete", "", ids]))
            .await
    }
}
