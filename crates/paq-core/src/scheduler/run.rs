//! The multiplexed event loop driving a download run.
//!
//! Single-threaded and readiness-driven: one bounded wait over every live
//! worker stream per iteration, with the bound equal to the remaining pulse
//! interval so progress callbacks and stall detection fire even when no I/O
//! happens. Decoding and dispatch run to completion inside the iteration, so
//! handlers need no locking.

use futures::future::select_all;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::item::ItemState;
use crate::worker::WorkerEvent;

use super::progress::ProgressStats;
use super::Acquire;

/// How a run terminated overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    /// Every item reached Done (IMS hits included).
    Continue,
    /// At least one item failed terminally or was cancelled.
    Failed,
    /// The progress collaborator or the deadline cancelled the run.
    Cancelled,
}

/// One failed item, reported with its human-readable reason.
#[derive(Debug, Clone)]
pub struct Failure {
    pub uri: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub result: RunResult,
    pub failures: Vec<Failure>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.result == RunResult::Continue
    }
}

impl Acquire {
    /// Drive the loop until every submitted item is terminal, the progress
    /// collaborator cancels, or `deadline` elapses (remaining items are then
    /// cancelled so none is ever left mid-flight).
    pub async fn run(
        &mut self,
        pulse_interval: Duration,
        deadline: Option<Duration>,
    ) -> Result<RunOutcome> {
        let started = Instant::now();
        self.progress.start();
        let mut cancelled = false;
        let mut next_pulse = started + pulse_interval;

        // An item that was added but never enqueued belongs to no queue and
        // could never become terminal; cancel it up front instead of letting
        // the loop wait on it forever.
        for item in &mut self.items {
            if item.state == ItemState::Idle {
                tracing::warn!(uri = %item.uri, "item was never enqueued, cancelling");
                item.error = Some("never enqueued".to_string());
                item.transition(ItemState::Cancelled);
            }
        }

        loop {
            self.cycle().await;
            if self.all_terminal() {
                break;
            }
            if deadline.is_some_and(|d| started.elapsed() >= d) {
                tracing::warn!("deadline elapsed, cancelling remaining items");
                cancelled = true;
                break;
            }

            let now = Instant::now();
            let mut wait = next_pulse.saturating_duration_since(now);
            if let Some(d) = deadline {
                wait = wait.min(d.saturating_sub(started.elapsed()));
            }

            if let Some((key, event)) = self.poll_workers(wait).await {
                self.handle_event(&key, event).await;
            }

            if Instant::now() >= next_pulse {
                let stats = self.progress_stats(started);
                if !self.progress.pulse(&stats) {
                    tracing::info!("cancelled by progress callback");
                    cancelled = true;
                    break;
                }
                self.check_stalls();
                next_pulse = Instant::now() + pulse_interval;
            }
        }

        if cancelled {
            self.shutdown();
        } else {
            // drop any workers kept alive for cleanup
            for queue in self.queues.values_mut() {
                if let Some(mut worker) = queue.worker.take() {
                    worker.kill();
                }
            }
        }
        self.progress.stop();

        let failures: Vec<Failure> = self
            .items
            .iter()
            .filter(|i| matches!(i.state, ItemState::FailedTerminal | ItemState::Cancelled))
            .map(|i| Failure {
                uri: i.uri.clone(),
                reason: i
                    .error
                    .clone()
                    .unwrap_or_else(|| "cancelled".to_string()),
            })
            .collect();
        let result = if cancelled {
            RunResult::Cancelled
        } else if failures.is_empty() {
            RunResult::Continue
        } else {
            RunResult::Failed
        };
        Ok(RunOutcome { result, failures })
    }

    /// One bounded readiness wait across every live worker stream. Returns
    /// the first worker with decoded messages (or a closed stream), or None
    /// on timeout. Pending partial messages stay buffered in each worker.
    async fn poll_workers(&mut self, wait: Duration) -> Option<(String, WorkerEvent)> {
        let mut reads: Vec<Pin<Box<dyn Future<Output = (String, WorkerEvent)> + '_>>> = Vec::new();
        for (name, queue) in self.queues.iter_mut() {
            if let Some(worker) = queue.worker.as_mut() {
                let name = name.clone();
                reads.push(Box::pin(async move { (name, worker.read_event().await) }));
            }
        }
        if reads.is_empty() {
            tokio::time::sleep(wait).await;
            return None;
        }
        match tokio::time::timeout(wait, select_all(reads)).await {
            Ok((event, _index, _rest)) => Some(event),
            Err(_) => None,
        }
    }

    /// Pulse-tick supervision of worker liveness. A worker still handshaking
    /// past the startup timeout, or one with requests in flight and no
    /// output for the stall timeout, is treated as dead; the usual
    /// worker-failure path then fails or migrates its items.
    fn check_stalls(&mut self) {
        let stall = self.stall_timeout();
        let startup = self.startup_timeout();
        let mut dead: Vec<(String, &'static str)> = Vec::new();
        for (name, q) in &self.queues {
            let Some(w) = q.worker.as_ref() else { continue };
            if !w.is_ready() {
                if w.idle_for() >= startup {
                    dead.push((name.clone(), "method startup timed out"));
                }
            } else if w.in_flight_len() > 0 && w.idle_for() >= stall {
                dead.push((name.clone(), "method stalled"));
            }
        }
        for (key, reason) in dead {
            tracing::warn!(queue = %key, reason, "giving up on worker");
            self.worker_failed(&key, reason);
        }
    }

    fn progress_stats(&self, started: Instant) -> ProgressStats {
        let mut bytes_done = 0;
        let mut total_bytes = 0;
        let mut items_done = 0;
        for item in &self.items {
            total_bytes += item.expected_size.unwrap_or(item.total_size);
            if item.state.is_terminal() {
                items_done += 1;
                bytes_done += item.bytes_fetched;
            }
        }
        ProgressStats {
            bytes_done,
            total_bytes,
            elapsed_secs: started.elapsed().as_secs_f64(),
            items_done,
            item_count: self.items.len(),
        }
    }
}
