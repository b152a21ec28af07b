//! Job requests and the download lifecycle poll

use super::{Client, ClientEvent};
use crate::daemon::DownloadDaemonClient;
use crate::error::Result;
use crate::job::JobRecord;
use crate::protocol::rpc::{self, RpcFunction};
use crate::transport::MessageSink;
use crate::types::Message;
use crate::utils::read_file;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one poll cycle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// History as processed, with derived names filled in
    pub records: Vec<JobRecord>,
    /// Job claimed and renamed this cycle, ready for transfer
    pub claimed: Option<i32>,
    /// Jobs removed from the daemon's history
    pub deleted: Vec<i32>,
    /// The history was empty and `usenet_done` went out
    pub done: bool,
}

impl Client {
    /// Search and fetch each requested show, then make sure the daemon runs
    ///
    /// Runs in its own task; the outcome comes back as
    /// [`ClientEvent::DaemonDetected`].
    pub(super) fn start_job_request(&mut self, body: &str) {
        let queries: Vec<String> = match rpc::parse(body) {
            Ok(envelope) => envelope
                .args
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            Err(e) => {
                warn!(error = %e, "job request body unreadable, no searches run");
                Vec::new()
            }
        };

        let search = self.collab.search.clone();
        let process = self.collab.process.clone();
        let sink = self.sink.clone();
        let events = self.events_tx.clone();
        let job_file = self.settings.job_file.clone();
        let process_name = self.settings.process_name.clone();
        self.daemon_requested = true;

        self.tasks.push(tokio::spawn(async move {
            let queries = if queries.is_empty() {
                match job_file {
                    Some(path) => queries_from_file(&path).await,
                    None => Vec::new(),
                }
            } else {
                queries
            };

            for query in &queries {
                match search.search_and_fetch(query).await {
                    Ok(path) => info!(query, nzb = %path.display(), "NZB fetched"),
                    Err(e) => warn!(query, error = %e, "search failed, skipping"),
                }
            }

            let event = match process.find_process(&process_name).await {
                Some(pid) => ClientEvent::DaemonDetected {
                    pid: Some(pid),
                    launched: false,
                },
                None => {
                    if let Err(e) = process.launch_daemon().await {
                        warn!(error = %e, "could not start download daemon");
                        return;
                    }
                    let pid = process.find_process(&process_name).await;
                    let args: Vec<String> = pid.iter().map(u32::to_string).collect();
                    let complete = rpc::build_call(RpcFunction::Complete, &args);
                    if let Err(e) = sink.send(Message::broadcast(complete)) {
                        debug!(error = %e, "launch announcement not sent");
                    }
                    ClientEvent::DaemonDetected {
                        pid,
                        launched: true,
                    }
                }
            };
            let _ = events.send(event);
        }));
    }

    /// Start a poll cycle on its own task unless one is still running
    ///
    /// The cycle works against a snapshot of `act_nzb_id`; its outcome comes
    /// back as [`ClientEvent::PollFinished`] and is applied on the loop.
    pub fn start_poll(&mut self) {
        if self.poll_task.is_some() {
            debug!("previous poll still in flight, skipping");
            return;
        }
        let ctx = self.poll_context();
        let events = self.events_tx.clone();
        self.poll_task = Some(tokio::spawn(async move {
            let summary = match poll_cycle(ctx).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(error = %e, "job poll failed, retrying next pulse");
                    None
                }
            };
            let _ = events.send(ClientEvent::PollFinished { summary });
        }));
    }

    /// Run one poll cycle in place and apply its outcome
    pub async fn poll(&mut self) -> Result<PollSummary> {
        let summary = poll_cycle(self.poll_context()).await?;
        self.apply_poll(&summary);
        Ok(summary)
    }

    /// Take the claim made by a finished cycle and start its transfer
    pub(super) fn apply_poll(&mut self, summary: &PollSummary) {
        let Some(job_id) = summary.claimed else {
            return;
        };
        if self.session.act_nzb_id != 0 {
            warn!(
                job_id,
                active = self.session.act_nzb_id,
                "claim from a stale poll dropped"
            );
            return;
        }
        match summary.records.iter().find(|r| r.job_id == job_id) {
            Some(record) => {
                self.session.act_nzb_id = job_id;
                self.spawn_transfer(record);
            }
            None => warn!(job_id, "claimed job missing from poll records"),
        }
    }

    fn poll_context(&self) -> PollContext {
        PollContext {
            daemon: self.collab.daemon.clone(),
            sink: self.sink.clone(),
            success_statuses: self.settings.success_statuses.clone(),
            act_nzb_id: self.session.act_nzb_id,
        }
    }
}

struct PollContext {
    daemon: Arc<dyn DownloadDaemonClient>,
    sink: Arc<dyn MessageSink>,
    success_statuses: Vec<String>,
    act_nzb_id: i32,
}

/// One pass over the daemon's history
///
/// Failed jobs are deleted while nothing is in flight. The first successful
/// job claims the in-flight slot and is renamed; everything else waits for a
/// later pass.
async fn poll_cycle(ctx: PollContext) -> Result<PollSummary> {
    let mut history = ctx.daemon.history().await?;
    let mut summary = PollSummary::default();

    if history.is_empty() {
        debug!("history empty");
        let done = rpc::build_call(RpcFunction::Done, &[]);
        if let Err(e) = ctx.sink.send(Message::broadcast(done)) {
            debug!(error = %e, "done not sent");
        }
        summary.done = true;
        return Ok(summary);
    }

    match ctx.daemon.queue().await {
        Ok(queue) => {
            let remaining: i32 = queue.iter().map(|j| j.remaining_size_mb).sum();
            debug!(queued = queue.len(), remaining_mb = remaining, "daemon queue");
        }
        Err(e) => debug!(error = %e, "queue unavailable"),
    }

    let mut active = ctx.act_nzb_id;
    for record in history.iter_mut() {
        if !record.is_actionable() {
            continue;
        }
        record.standardize();

        if !record.is_success(&ctx.success_statuses) {
            if active == 0 {
                info!(job_id = record.job_id, status = ?record.status, "removing failed job");
                summary.deleted.push(record.job_id);
            }
            continue;
        }

        if active != 0 {
            continue;
        }

        active = record.job_id;
        match record.rename_payload().await {
            Ok(_) => summary.claimed = Some(record.job_id),
            Err(e) => {
                warn!(job_id = record.job_id, error = %e, "rename failed, dropping job");
                summary.deleted.push(record.job_id);
                active = 0;
            }
        }
    }

    if !summary.deleted.is_empty()
        && let Err(e) = ctx.daemon.delete(&summary.deleted).await
    {
        warn!(ids = ?summary.deleted, error = %e, "history delete failed");
    }

    summary.records = history;
    Ok(summary)
}

async fn queries_from_file(path: &Path) -> Vec<String> {
    match read_file(path).await {
        Ok(contents) => String::from_utf8_lossy(&contents)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "job file unreadable");
            Vec::new()
        }
    }
}
