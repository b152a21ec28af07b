//! Copying finished payloads to their destination
//!
//! [`ScpTransfer`] shells out to the system `ssh` and `scp` binaries, so SSH
//! keys and known hosts are whatever the OpenSSH client is configured with.
//! [`LocalTransfer`] copies into a local or mounted destination in chunks and
//! reports progress per chunk.
//!
//! Both honor a [`CancellationToken`]: the subprocess is killed, or the chunk
//! loop stops and the partial file is removed.

use crate::config::TransferConfig;
use crate::error::{CollaboratorError, Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Progress callback, called with the completed fraction in `[0, 1]`
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Chunk size for local copies
const COPY_CHUNK: usize = 1024 * 1024;

/// Copies one file to its destination
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Copy `source` to `dest`, creating the destination directory
    async fn copy_file(
        &self,
        source: &Path,
        dest: &Path,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Build the transfer configured by `config`: scp when a host is set, local copy otherwise
pub fn from_config(config: &TransferConfig) -> Arc<dyn FileTransfer> {
    match &config.host {
        Some(host) => Arc::new(ScpTransfer::new(host.clone(), config)),
        None => Arc::new(LocalTransfer),
    }
}

fn transfer_error(source: &Path, dest: &Path, reason: impl Into<String>) -> Error {
    CollaboratorError::Transfer {
        path: source.to_path_buf(),
        dest: dest.display().to_string(),
        reason: reason.into(),
    }
    .into()
}

/// Copy over SSH using the `scp` binary
#[derive(Clone, Debug)]
pub struct ScpTransfer {
    host: String,
    user: Option<String>,
    port: u16,
    identity_file: Option<PathBuf>,
}

impl ScpTransfer {
    /// Create for `host` with credentials from `config`
    pub fn new(host: String, config: &TransferConfig) -> Self {
        Self {
            host,
            user: config.user.clone(),
            port: config.port,
            identity_file: config.identity_file.clone(),
        }
    }

    fn remote(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    fn common_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            port_flag.to_string(),
            self.port.to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    /// `ssh` arguments that create the destination directory
    pub fn mkdir_args(&self, dest: &Path) -> Vec<String> {
        let mut args = self.common_args("-p");
        args.push(self.remote());
        args.push("mkdir".to_string());
        args.push("-p".to_string());
        args.push(shell_quote(&dest.parent().unwrap_or(Path::new(".")).display().to_string()));
        args
    }

    /// `scp` arguments that copy `source` to `dest`
    pub fn scp_args(&self, source: &Path, dest: &Path) -> Vec<String> {
        let mut args = vec!["-q".to_string()];
        args.extend(self.common_args("-P"));
        args.push(source.display().to_string());
        args.push(format!("{}:{}", self.remote(), shell_quote(&dest.display().to_string())));
        args
    }

    async fn run(
        &self,
        program: &str,
        args: Vec<String>,
        source: &Path,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| transfer_error(source, dest, format!("failed to start {program}: {e}")))?;

        let mut stderr = child.stderr.take();
        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(transfer_error(source, dest, "cancelled"));
            }
            status = child.wait() => status?,
        };

        if status.success() {
            return Ok(());
        }
        let mut message = String::new();
        if let Some(stderr) = stderr.as_mut() {
            let _ = stderr.read_to_string(&mut message).await;
        }
        Err(transfer_error(
            source,
            dest,
            format!("{program} exited with {status}: {}", message.trim()),
        ))
    }
}

#[async_trait]
impl FileTransfer for ScpTransfer {
    async fn copy_file(
        &self,
        source: &Path,
        dest: &Path,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<()> {
        progress(0.0);
        self.run("ssh", self.mkdir_args(dest), source, dest, &cancel)
            .await?;
        tracing::info!(source = %source.display(), dest = %dest.display(), host = %self.host, "starting scp");
        self.run("scp", self.scp_args(source, dest), source, dest, &cancel)
            .await?;
        progress(1.0);
        Ok(())
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Copy into a local or mounted destination
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalTransfer;

#[async_trait]
impl FileTransfer for LocalTransfer {
    async fn copy_file(
        &self,
        source: &Path,
        dest: &Path,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut input = tokio::fs::File::open(source).await?;
        let total = input.metadata().await?.len();
        let mut output = tokio::fs::File::create(dest).await?;
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut copied = 0u64;

        progress(0.0);
        loop {
            if cancel.is_cancelled() {
                drop(output);
                if let Err(e) = tokio::fs::remove_file(dest).await {
                    tracing::warn!(dest = %dest.display(), error = %e, "failed to remove partial copy");
                }
                return Err(transfer_error(source, dest, "cancelled"));
            }
            let n = input.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n]).await?;
            copied += n as u64;
            if total > 0 {
                progress(copied as f64 / total as f64);
            }
        }
        output.flush().await?;
        progress(1.0);
        Ok(())
    }
}
