//! Virtual worker pool.
//!
//! Holds one tokio task per virtual user. Scaling up spawns workers; scaling
//! down signals the newest workers to stop after their current iteration and
//! aborts any that outlive the grace period.

use crate::worker::{run_worker, WorkerShared};
use loadgate_core::{builtin, Sample};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

struct LiveWorker {
    id: u64,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct RetiringWorker {
    id: u64,
    handle: JoinHandle<()>,
    deadline: Instant,
}

/// Workers of one run.
pub(crate) struct WorkerPool {
    shared: Arc<WorkerShared>,
    live: Vec<LiveWorker>,
    retiring: Vec<RetiringWorker>,
    next_id: u64,
    forced: u64,
}

impl WorkerPool {
    pub fn new(shared: Arc<WorkerShared>) -> Self {
        Self {
            shared,
            live: Vec::new(),
            retiring: Vec::new(),
            next_id: 0,
            forced: 0,
        }
    }

    /// Workers not asked to stop.
    pub fn live(&self) -> usize {
        self.live.len()
    }

    /// Workers cancelled after their grace period so far.
    pub fn forced_cancellations(&self) -> u64 {
        self.forced
    }

    /// Converges the live count to `target`.
    ///
    /// Removal is last-in first-out so long-lived workers keep running.
    pub fn scale_to(&mut self, target: u32) {
        let target = target as usize;

        while self.live.len() < target {
            self.spawn();
        }

        if self.live.len() > target {
            let deadline = Instant::now() + self.shared.plan.grace_period;
            while self.live.len() > target {
                if let Some(worker) = self.live.pop() {
                    let _ = worker.stop.send(true);
                    self.retiring.push(RetiringWorker {
                        id: worker.id,
                        handle: worker.handle,
                        deadline,
                    });
                }
            }
        }

        self.reap();
        self.shared.telemetry.active_workers.set(self.live.len() as i64);
    }

    /// Drops finished retirees and aborts overdue ones.
    pub fn reap(&mut self) {
        let now = Instant::now();
        let mut overdue = Vec::new();
        self.retiring.retain(|worker| {
            if worker.handle.is_finished() {
                false
            } else if worker.deadline <= now {
                worker.handle.abort();
                overdue.push(worker.id);
                false
            } else {
                true
            }
        });

        for id in overdue {
            tracing::warn!(worker = id, "Worker exceeded grace period, cancelling");
            self.record_forced();
        }
    }

    /// Stops every worker, waiting at most `grace` for in-flight iterations.
    pub async fn shutdown(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;

        for worker in self.live.drain(..) {
            let _ = worker.stop.send(true);
            self.retiring.push(RetiringWorker {
                id: worker.id,
                handle: worker.handle,
                deadline,
            });
        }
        self.shared.telemetry.active_workers.set(0);

        let retiring = std::mem::take(&mut self.retiring);
        let mut cancelled = 0u64;
        for mut worker in retiring {
            let wait_until = worker.deadline.min(deadline);
            match timeout_at(wait_until, &mut worker.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if err.is_panic() {
                        tracing::error!(worker = worker.id, "Worker panicked");
                    }
                }
                Err(_) => {
                    worker.handle.abort();
                    tracing::warn!(worker = worker.id, "Worker exceeded grace period, cancelling");
                    cancelled += 1;
                }
            }
        }

        for _ in 0..cancelled {
            self.record_forced();
        }

        tracing::debug!(
            forced = self.forced,
            "Worker pool stopped"
        );
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(id, Arc::clone(&self.shared), stop_rx));
        self.live.push(LiveWorker { id, stop, handle });
    }

    fn record_forced(&mut self) {
        self.forced += 1;
        self.shared.telemetry.forced_cancellations.inc();
        self.shared.registry.record(
            &Sample::new(builtin::DROPPED_ITERATIONS, 1.0).at(self.shared.run_started.elapsed()),
        );
    }
}
