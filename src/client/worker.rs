//! Transfer workers: one per claimed job

use super::{Client, ClientEvent, WorkerHandle};
use crate::job::JobRecord;
use crate::protocol::rpc::{self, RpcFunction};
use crate::transfer::ProgressFn;
use crate::types::{Message, WorkerId};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Rate limit for progress broadcasts
///
/// The first report always passes; later ones pass once `interval` has
/// elapsed since the last one that did.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl ProgressThrottle {
    /// Create with the minimum gap between reports
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Whether a report may go out now; records the time when it may
    pub fn ready(&self) -> bool {
        self.ready_at(Instant::now())
    }

    fn ready_at(&self, now: Instant) -> bool {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

impl Client {
    /// Hand a renamed job to a new transfer worker and mark it active
    pub(super) fn spawn_transfer(&mut self, record: &JobRecord) {
        let job_id = record.job_id;
        let (Some(source), Some(dest)) = (
            record.renamed_path.clone(),
            record.remote_destination(&self.settings.destination),
        ) else {
            warn!(job_id, "job has no renamed payload, not transferring");
            self.session.act_nzb_id = 0;
            return;
        };

        let worker = WorkerId(self.next_worker);
        self.next_worker += 1;

        let throttle = ProgressThrottle::new(self.settings.progress_update_interval);
        let progress_sink = self.sink.clone();
        let progress: ProgressFn = Arc::new(move |fraction| {
            if throttle.ready() {
                let body = rpc::build_call(RpcFunction::Progress, &[format!("{fraction:.3}")]);
                let _ = progress_sink.send(Message::broadcast(body));
            }
        });

        let cancel = CancellationToken::new();
        let transfer = self.collab.transfer.clone();
        let daemon = self.collab.daemon.clone();
        let sink = self.sink.clone();
        let events = self.events_tx.clone();
        let token = cancel.clone();

        info!(%worker, job_id, source = %source.display(), dest = %dest.display(), "starting transfer");
        let handle = tokio::spawn(async move {
            let success = match transfer.copy_file(&source, &dest, progress, token).await {
                Ok(()) => {
                    if let Err(e) = daemon.delete(&[job_id]).await {
                        warn!(job_id, error = %e, "transferred job not removed from history");
                    }
                    let body = rpc::build_call(RpcFunction::ScpComplete, &[worker.to_string()]);
                    if let Err(e) = sink.send(Message::broadcast(body)) {
                        debug!(error = %e, "transfer completion not announced");
                    }
                    true
                }
                Err(e) => {
                    warn!(%worker, job_id, error = %e, "transfer failed");
                    false
                }
            };
            let _ = events.send(ClientEvent::TransferFinished {
                worker,
                job_id,
                success,
            });
        });

        self.workers.insert(
            worker,
            WorkerHandle {
                job_id,
                cancel,
                handle,
            },
        );
        self.session.active_worker = Some(worker);
    }
}
