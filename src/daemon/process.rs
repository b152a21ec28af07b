//! Download daemon process lookup and launch

use crate::config::DaemonConfig;
use crate::error::{CollaboratorError, Result};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::PathBuf;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tokio::process::Command;

/// Process table access needed to probe for and start the daemon
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Pid of a running process called `name`
    async fn find_process(&self, name: &str) -> Option<u32>;

    /// Start the daemon in the background and wait until the launcher returns
    async fn launch_daemon(&self) -> Result<()>;
}

/// [`ProcessControl`] backed by the OS process table
pub struct SystemProcessControl {
    binary: Option<PathBuf>,
    process_name: String,
    launch_args: Vec<String>,
}

impl SystemProcessControl {
    /// Create from daemon settings
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            process_name: config.process_name.clone(),
            launch_args: config.launch_args.clone(),
        }
    }

    /// Configured binary, or `process_name` found on PATH
    pub fn resolve_binary(&self) -> Result<PathBuf> {
        match &self.binary {
            Some(path) => Ok(path.clone()),
            None => which::which(&self.process_name).map_err(|e| {
                CollaboratorError::Process(format!("{} not found in PATH: {e}", self.process_name))
                    .into()
            }),
        }
    }
}

#[async_trait]
impl ProcessControl for SystemProcessControl {
    async fn find_process(&self, name: &str) -> Option<u32> {
        let name = name.to_string();
        match tokio::task::spawn_blocking(move || scan_process_table(&name)).await {
            Ok(pid) => pid,
            Err(e) => {
                tracing::warn!(error = %e, "process table scan did not complete");
                None
            }
        }
    }

    async fn launch_daemon(&self) -> Result<()> {
        let binary = self.resolve_binary()?;
        tracing::info!(binary = %binary.display(), args = ?self.launch_args, "launching download daemon");

        let status = Command::new(&binary)
            .args(&self.launch_args)
            .status()
            .await
            .map_err(|e| {
                CollaboratorError::Process(format!("failed to run {}: {e}", binary.display()))
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(CollaboratorError::Process(format!(
                "{} exited with {status}",
                binary.display()
            ))
            .into())
        }
    }
}

/// Lowest pid whose process name is `name`
///
/// Refreshes the process list only; CPU, memory and disk stats are skipped.
fn scan_process_table(name: &str) -> Option<u32> {
    let system = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new()),
    );
    let target = OsStr::new(name);
    system
        .processes()
        .iter()
        .filter(|(_, process)| {
            let process_name: &OsStr = process.name().as_ref();
            process_name == target
        })
        .map(|(pid, _)| pid.as_u32())
        .min()
}
