//! Background extraction scheduling — bounded queue, fixed worker pool,
//! timer-driven retries.
//!
//! A single bounded mpsc channel feeds `worker_pool_size` workers. Enqueue
//! never blocks the webhook path: when the channel is full the job is
//! recorded as *deferred* on disk and the recovery sweep re-enqueues it
//! later. Retries are scheduled on timers that re-send the job with
//! bumped attempt metadata, so no worker ever sleeps through a backoff
//! window. On shutdown, workers finish their in-flight job inside the
//! grace period and refuse new dequeues; queued-but-unstarted jobs
//! survive restart through their persisted `queued` state files.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mr_domain::config::SchedulerConfig;
use mr_domain::conversation::Conversation;
use mr_domain::error::Result;
use mr_domain::trace::TraceEvent;

use super::payloads::{ExtractionState, PayloadStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job & processor seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub conversation: Conversation,
    /// 0 on first run; incremented per retry.
    pub attempt: u32,
}

/// What a worker runs for each dequeued job. The production implementation
/// is the extraction pipeline; tests substitute scripted doubles.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &ExtractionJob) -> Result<()>;
}

/// Where a submitted job landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Queue full — persisted for the recovery sweep instead.
    Deferred,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct JobScheduler {
    tx: mpsc::Sender<ExtractionJob>,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    depth: AtomicUsize,
    capacity: usize,
    active: AtomicUsize,
    retry_delays: Vec<u64>,
    processor: Arc<dyn JobProcessor>,
    payloads: Arc<PayloadStore>,
    shutdown: CancellationToken,
}

impl JobScheduler {
    /// Build the scheduler and spawn its worker pool. Must be called from
    /// within a tokio runtime.
    pub fn new(
        cfg: &SchedulerConfig,
        processor: Arc<dyn JobProcessor>,
        payloads: Arc<PayloadStore>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<ExtractionJob>(cfg.queue_capacity);
        let shared = Arc::new(Shared {
            depth: AtomicUsize::new(0),
            capacity: cfg.queue_capacity,
            active: AtomicUsize::new(0),
            retry_delays: cfg.retry_delays_seconds.clone(),
            processor,
            payloads,
            shutdown: CancellationToken::new(),
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let scheduler = Arc::new(Self {
            tx,
            shared: shared.clone(),
            workers: Mutex::new(Vec::new()),
        });

        let mut workers = Vec::with_capacity(cfg.worker_pool_size);
        for worker_id in 0..cfg.worker_pool_size {
            let rx = rx.clone();
            let shared = shared.clone();
            let tx = scheduler.tx.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, tx, shared).await;
            }));
        }
        *scheduler.workers.lock() = workers;
        scheduler
    }

    /// Submit a conversation for extraction. Never blocks: queue overflow
    /// degrades to a deferred on-disk marker, not an error to the caller.
    pub async fn submit(&self, conversation: Conversation) -> Result<SubmitOutcome> {
        let conversation_id = conversation.conversation_id.clone();
        let job = ExtractionJob {
            conversation,
            attempt: 0,
        };

        match self.tx.try_send(job) {
            Ok(()) => {
                self.shared.depth.fetch_add(1, Ordering::SeqCst);
                self.shared
                    .payloads
                    .update_state(&conversation_id, |s| {
                        s.state = ExtractionState::Queued;
                    })
                    .await?;
                Ok(SubmitOutcome::Queued)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    capacity = self.shared.capacity,
                    "extraction queue full, deferring to recovery sweep"
                );
                self.shared
                    .payloads
                    .update_state(&conversation_id, |s| {
                        s.state = ExtractionState::Deferred;
                    })
                    .await?;
                Ok(SubmitOutcome::Deferred)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Shutting down; the persisted queued state survives restart.
                self.shared
                    .payloads
                    .update_state(&conversation_id, |s| {
                        s.state = ExtractionState::Queued;
                    })
                    .await?;
                Ok(SubmitOutcome::Deferred)
            }
        }
    }

    /// Current queue depth (exported via the health endpoint).
    pub fn queue_depth(&self) -> usize {
        self.shared.depth.load(Ordering::SeqCst)
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Workers currently processing a job.
    pub fn active_workers(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn emit_depth(&self) {
        TraceEvent::QueueDepth {
            depth: self.queue_depth(),
            capacity: self.shared.capacity,
        }
        .emit();
    }

    /// Stop accepting dequeues and wait for in-flight jobs, bounded by the
    /// shutdown grace period.
    pub async fn shutdown(&self, grace: Duration) {
        self.shared.shutdown.cancel();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let drain = async {
            for worker in workers {
                let _ = worker.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!(
                grace_seconds = grace.as_secs(),
                "shutdown grace elapsed with jobs still in flight"
            );
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn worker_loop(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ExtractionJob>>>,
    tx: mpsc::Sender<ExtractionJob>,
    shared: Arc<Shared>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            job = async { rx.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };
        shared.depth.fetch_sub(1, Ordering::SeqCst);
        shared.active.fetch_add(1, Ordering::SeqCst);

        let conversation_id = job.conversation.conversation_id.clone();
        tracing::debug!(
            worker_id,
            conversation_id = %conversation_id,
            attempt = job.attempt,
            "extraction job dequeued"
        );

        let result = shared.processor.process(&job).await;
        shared.active.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(()) => {}
            Err(e) if e.is_transient() && (job.attempt as usize) < shared.retry_delays.len() => {
                let delay = shared.retry_delays[job.attempt as usize];
                schedule_retry(job, delay, e.to_string(), tx.clone(), shared.clone()).await;
            }
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    attempt = job.attempt,
                    error = %e,
                    "extraction job failed permanently"
                );
                let _ = shared
                    .payloads
                    .update_state(&conversation_id, |s| {
                        s.state = ExtractionState::Failed;
                        s.last_error = Some(e.to_string());
                    })
                    .await;
            }
        }
    }
    tracing::debug!(worker_id, "extraction worker stopped");
}

/// Record the retry and arm a timer that re-sends the job, leaving the
/// worker free for other jobs in the meantime.
async fn schedule_retry(
    mut job: ExtractionJob,
    delay_seconds: u64,
    error: String,
    tx: mpsc::Sender<ExtractionJob>,
    shared: Arc<Shared>,
) {
    job.attempt += 1;
    let conversation_id = job.conversation.conversation_id.clone();

    TraceEvent::JobRetryScheduled {
        conversation_id: conversation_id.clone(),
        attempt: job.attempt,
        delay_seconds,
    }
    .emit();

    let _ = shared
        .payloads
        .update_state(&conversation_id, |s| {
            s.state = ExtractionState::Queued;
            s.attempts = job.attempt;
            s.last_error = Some(error);
        })
        .await;

    tokio::spawn(async move {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                // Persisted queued state survives; the sweep re-enqueues.
            }
            _ = tokio::time::sleep(Duration::from_secs(delay_seconds)) => {
                if tx.try_send(job).is_ok() {
                    shared.depth.fetch_add(1, Ordering::SeqCst);
                } else {
                    let _ = shared
                        .payloads
                        .update_state(&conversation_id, |s| {
                            s.state = ExtractionState::Deferred;
                        })
                        .await;
                }
            }
        }
    });
}
