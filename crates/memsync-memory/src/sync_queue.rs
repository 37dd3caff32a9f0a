//! Bounded background queue for graph synchronization.
//!
//! A fixed pool of workers drains a bounded channel. Each scheduled job gets
//! a [`SyncTicket`] that resolves with its outcome, and every job runs under
//! a timeout. When the queue is full the job is dropped and a warning logged;
//! the caller's save has already succeeded at that point.
//!
//! A timed-out job resolves its ticket with [`SyncOutcome::TimedOut`] and frees
//! its worker, but stays pending (holding its capacity slot) until the
//! handler actually returns. A graph write already running is never cut off,
//! so `wait_idle` still covers it.

use crate::writer::{MemorySnapshot, WriteReport};
use async_trait::async_trait;
use dashmap::DashMap;
use memsync_types::config::SyncConfig;
use memsync_types::error::MemSyncResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// One unit of background work: a memory that needs its graph mirror.
#[derive(Debug, Clone)]
pub struct SyncJob {
    /// The saved memory.
    pub memory: MemorySnapshot,
}

/// Does the slow part of a sync job (extraction plus graph write).
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Process one job.
    async fn handle(&self, job: SyncJob) -> MemSyncResult<WriteReport>;
}

/// How a scheduled job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Graph write finished.
    Completed(WriteReport),
    /// The handler returned an error.
    Failed(String),
    /// The job exceeded the per-task timeout.
    TimedOut,
}

/// Completion handle for one scheduled job.
#[derive(Debug)]
pub struct SyncTicket {
    memory_id: String,
    rx: oneshot::Receiver<SyncOutcome>,
}

impl SyncTicket {
    /// Memory this ticket tracks.
    pub fn memory_id(&self) -> &str {
        &self.memory_id
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> SyncOutcome {
        self.rx
            .await
            .unwrap_or_else(|_| SyncOutcome::Failed("sync worker stopped".to_string()))
    }
}

struct Envelope {
    seq: u64,
    job: SyncJob,
    done: oneshot::Sender<SyncOutcome>,
    permit: OwnedSemaphorePermit,
}

/// State shared between the queue handle and its workers.
struct Shared {
    in_flight: DashMap<u64, String>,
    idle: Notify,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    fn finish(&self, seq: u64) {
        self.in_flight.remove(&seq);
        if self.in_flight.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

/// Bounded worker pool for graph-sync jobs.
#[derive(Clone)]
pub struct SyncQueue {
    tx: mpsc::Sender<Envelope>,
    permits: Arc<Semaphore>,
    capacity: usize,
    next_seq: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    shared: Arc<Shared>,
}

impl SyncQueue {
    /// Spawn workers as configured. Must be called inside a tokio runtime.
    pub fn start(handler: Arc<dyn SyncHandler>, config: &SyncConfig) -> Self {
        Self::with_timeout(
            handler,
            config.workers,
            config.queue_capacity,
            Duration::from_secs(config.task_timeout_secs),
        )
    }

    /// Spawn `workers` workers over a queue holding at most `capacity`
    /// queued or running jobs.
    pub fn with_timeout(
        handler: Arc<dyn SyncHandler>,
        workers: usize,
        capacity: usize,
        timeout: Duration,
    ) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel::<Envelope>(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let shared = Arc::new(Shared {
            in_flight: DashMap::new(),
            idle: Notify::new(),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        for worker in 0..workers {
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&handler);
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(envelope) = next else {
                        debug!(worker, "Sync queue closed, worker exiting");
                        break;
                    };
                    run_job(worker, envelope, Arc::clone(&handler), Arc::clone(&shared), timeout)
                        .await;
                }
            });
        }

        info!(workers, capacity, timeout_secs = timeout.as_secs(), "Graph sync queue started");
        Self {
            tx,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            next_seq: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            shared,
        }
    }

    /// Schedule a job without waiting. Returns `None` when the queue is
    /// saturated and the job was dropped.
    pub fn schedule(&self, job: SyncJob) -> Option<SyncTicket> {
        let memory_id = job.memory.memory_id.clone();
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                memory_id = %memory_id,
                capacity = self.capacity,
                "Graph sync queue saturated, dropping job"
            );
            return None;
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (done, rx) = oneshot::channel();
        self.shared.in_flight.insert(seq, memory_id.clone());
        let envelope = Envelope {
            seq,
            job,
            done,
            permit,
        };
        if let Err(e) = self.tx.try_send(envelope) {
            self.shared.finish(seq);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(memory_id = %memory_id, error = %e, "Graph sync job could not be queued");
            return None;
        }

        debug!(memory_id = %memory_id, seq, "Graph sync job scheduled");
        Some(SyncTicket { memory_id, rx })
    }

    /// Resolve once no job is queued or running, timed-out jobs included.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.in_flight.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.shared.in_flight.len()
    }

    /// Memory ids of jobs queued or running.
    pub fn pending_memory_ids(&self) -> Vec<String> {
        self.shared
            .in_flight
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Jobs dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Jobs that completed successfully.
    pub fn completed(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Jobs that failed or timed out.
    pub fn failed(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }
}

async fn run_job(
    worker: usize,
    envelope: Envelope,
    handler: Arc<dyn SyncHandler>,
    shared: Arc<Shared>,
    timeout: Duration,
) {
    let Envelope {
        seq,
        job,
        done,
        permit,
    } = envelope;
    let memory_id = job.memory.memory_id.clone();

    let mut task = tokio::spawn(async move { handler.handle(job).await });
    let result = tokio::time::timeout(timeout, &mut task).await;
    let outcome = match result {
        Ok(Ok(Ok(report))) => {
            shared.completed.fetch_add(1, Ordering::Relaxed);
            SyncOutcome::Completed(report)
        }
        Ok(Ok(Err(e))) => {
            shared.failed.fetch_add(1, Ordering::Relaxed);
            warn!(worker, memory_id = %memory_id, error = %e, "Graph sync job failed");
            SyncOutcome::Failed(e.to_string())
        }
        Ok(Err(e)) => {
            shared.failed.fetch_add(1, Ordering::Relaxed);
            warn!(worker, memory_id = %memory_id, error = %e, "Graph sync task panicked");
            SyncOutcome::Failed(format!("sync task panicked: {e}"))
        }
        Err(_) => {
            shared.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                worker,
                memory_id = %memory_id,
                timeout_secs = timeout.as_secs_f64(),
                "Graph sync job timed out, still tracked until it returns"
            );
            let _ = done.send(SyncOutcome::TimedOut);
            tokio::spawn(async move {
                let _ = task.await;
                drop(permit);
                shared.finish(seq);
                debug!(memory_id = %memory_id, seq, "Timed-out graph sync job returned");
            });
            return;
        }
    };

    drop(permit);
    shared.finish(seq);
    // The ticket may have been dropped; nobody is waiting then.
    let _ = done.send(outcome);
}
