//! In-memory collaborators for driving a client without NZBGet, SSH or the network

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use usenet_ctl::daemon::{DownloadDaemonClient, ProcessControl};
use usenet_ctl::search::SearchAndFetch;
use usenet_ctl::transfer::{FileTransfer, ProgressFn};
use usenet_ctl::{JobRecord, Result};

/// Records queries and pretends every fetch succeeds
#[derive(Default)]
pub struct FakeSearch {
    pub queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchAndFetch for FakeSearch {
    async fn search_and_fetch(&self, query: &str) -> Result<PathBuf> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(PathBuf::from(format!("nzb/{query}.nzb")))
    }
}

/// Daemon whose history is whatever the test puts there
#[derive(Default)]
pub struct FakeDaemon {
    pub history: Mutex<Vec<JobRecord>>,
    pub deleted: Mutex<Vec<i32>>,
    pub scans: AtomicUsize,
}

impl FakeDaemon {
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<i32> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl DownloadDaemonClient for FakeDaemon {
    async fn scan(&self) -> Result<()> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn history(&self) -> Result<Vec<JobRecord>> {
        Ok(self.history.lock().unwrap().clone())
    }

    async fn queue(&self) -> Result<Vec<JobRecord>> {
        Ok(Vec::new())
    }

    async fn delete(&self, ids: &[i32]) -> Result<()> {
        self.deleted.lock().unwrap().extend_from_slice(ids);
        self.history
            .lock()
            .unwrap()
            .retain(|job| !ids.contains(&job.job_id));
        Ok(())
    }
}

/// Process table with a fixed daemon pid
pub struct FakeProcess {
    pub pid: Option<u32>,
}

#[async_trait]
impl ProcessControl for FakeProcess {
    async fn find_process(&self, _name: &str) -> Option<u32> {
        self.pid
    }

    async fn launch_daemon(&self) -> Result<()> {
        Ok(())
    }
}

/// Transfer that records what it was asked to copy
#[derive(Default)]
pub struct RecordingTransfer {
    pub copies: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl RecordingTransfer {
    pub fn copies(&self) -> Vec<(PathBuf, PathBuf)> {
        self.copies.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileTransfer for RecordingTransfer {
    async fn copy_file(
        &self,
        source: &Path,
        dest: &Path,
        progress: ProgressFn,
        _cancel: CancellationToken,
    ) -> Result<()> {
        progress(0.0);
        self.copies
            .lock()
            .unwrap()
            .push((source.to_path_buf(), dest.to_path_buf()));
        progress(1.0);
        Ok(())
    }
}

/// Finished job whose payload is `<root>/<dir>/raw.mkv`
pub fn finished_job(root: &Path, id: i32, name: &str, dir: &str) -> JobRecord {
    let job_dir = root.join(dir);
    std::fs::create_dir_all(&job_dir).unwrap();
    std::fs::write(job_dir.join("raw.mkv"), b"video payload").unwrap();
    JobRecord {
        job_id: id,
        display_name: Some(name.to_string()),
        dest_dir: Some(job_dir.to_string_lossy().into_owned()),
        status: Some("SUCCESS/UNPACK".to_string()),
        ..Default::default()
    }
}
