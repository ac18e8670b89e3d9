//! §6.1 Runner facade — the single entry point the HTTP adapter (and
//! integration tests) drive. Owns the Validator, Job Store, Log Sink, and
//! Scheduler, and is the only place that spawns jobs or touches the
//! scheduler's running counter.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, oneshot};
use tracing::info;

use crate::config::Config;
use crate::executor;
use crate::jobstore::JobStore;
use crate::logsink::{LogSink, Stream};
use crate::scheduler::{QueueEntry, SchedulerState};
use crate::schema::{ApiError, ErrorCode, Job, JobStatus, LogPage, RunMode, now_rfc3339};
use crate::validator::Validator;

pub struct RunRequest {
    pub script_id: String,
    pub args: Vec<String>,
    pub mode: Option<RunMode>,
}

pub struct Runner {
    validator: Validator,
    store: JobStore,
    log_sink: LogSink,
    default_mode: RunMode,
    max_log_bytes_per_stream: u64,
    preview_max_bytes: u64,
    sched: Mutex<SchedulerState>,
    /// Per-running-job cancellation signal, consumed by the executor loop.
    cancel_signals: Mutex<HashMap<String, Arc<Notify>>>,
    /// Sync-submit callers waiting on a job to reach a terminal state.
    waiters: Mutex<HashMap<String, Vec<oneshot::Sender<Job>>>>,
}

impl Runner {
    pub fn new(config: &Config, store: JobStore, log_sink: LogSink) -> Arc<Self> {
        let default_mode = if config.runner.default_mode == "sync" {
            RunMode::Sync
        } else {
            RunMode::Async
        };
        Arc::new(Runner {
            validator: Validator::new(config.scripts.clone()),
            store,
            log_sink,
            default_mode,
            max_log_bytes_per_stream: config.runner.max_log_bytes_per_stream,
            preview_max_bytes: config.runner.preview_max_bytes,
            sched: Mutex::new(SchedulerState::new(config.runner.max_concurrent)),
            cancel_signals: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
        })
    }

    /// Submit a run (spec §6.1 `submitRun`). For `sync` mode this resolves
    /// only once the job reaches a terminal status; `async` mode resolves
    /// as soon as the job is queued.
    pub async fn submit_run(
        self: &Arc<Self>,
        req: RunRequest,
    ) -> Result<Job, ApiError> {
        let script = self
            .validator
            .validate(&req.script_id, &req.args)
            .map_err(|e| ApiError::new(e.code, e.message))?
            .clone();

        let mode = req.mode.or(script.mode).unwrap_or(self.default_mode);
        let job_id = ulid::Ulid::new().to_string();
        let job = Job::new_queued(job_id.clone(), req.script_id.clone(), req.args.clone(), mode);
        self.store.insert(job.clone());

        let waiter = if mode == RunMode::Sync {
            let (tx, rx) = oneshot::channel();
            self.waiters
                .lock()
                .await
                .entry(job_id.clone())
                .or_default()
                .push(tx);
            Some(rx)
        } else {
            None
        };

        self.enqueue(job_id.clone(), script).await;

        match waiter {
            Some(rx) => Ok(rx.await.unwrap_or_else(|_| {
                self.store.get(&job_id).expect("job exists")
            })),
            None => Ok(job),
        }
    }

    async fn enqueue(self: &Arc<Self>, job_id: String, script: crate::schema::ScriptEntry) {
        {
            let mut sched = self.sched.lock().await;
            sched.push(QueueEntry { job_id, script });
        }
        self.drain().await;
    }

    /// Pull as many admissible entries off the queue as the concurrency
    /// bound allows and start them.
    ///
    /// Boxed into a trait object: `drain` -> `spawn_job` ->
    /// `run_and_finish` -> `drain` forms a cycle, and an `async fn` in
    /// that cycle would otherwise expand to an infinitely-sized future
    /// type.
    fn drain<'a>(self: &'a Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            loop {
                let entry = {
                    let mut sched = self.sched.lock().await;
                    match sched.try_pop() {
                        Some(entry) => {
                            sched.mark_running();
                            entry
                        }
                        None => break,
                    }
                };
                self.spawn_job(entry).await;
            }
        })
    }

    async fn spawn_job(self: &Arc<Self>, entry: QueueEntry) {
        let job_id = entry.job_id;
        let script = entry.script;

        let cancel_requested = self
            .store
            .get(&job_id)
            .map(|j| j.cancel_requested)
            .unwrap_or(false);

        if cancel_requested {
            // Canceled while still queued. try_pop already called
            // mark_running for this entry, so the slot must be released.
            self.finish_canceled_without_running(&job_id, true).await;
            return;
        }

        let notify = Arc::new(Notify::new());
        self.cancel_signals
            .lock()
            .await
            .insert(job_id.clone(), notify.clone());

        self.store.with_mut(&job_id, |j| {
            j.status = JobStatus::Running;
            j.started_at = Some(now_rfc3339());
        });
        info!(job_id, script_id = %script.id, "job started");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_and_finish(job_id, script, notify).await;
        });
    }

    /// Finish a job as canceled without ever executing it. `consumed_slot`
    /// tells us whether a running slot was already reserved for this entry
    /// (popped via the scheduler's normal admission path) and so must be
    /// released, versus an entry pulled straight out of the queue that
    /// never consumed one.
    async fn finish_canceled_without_running(self: &Arc<Self>, job_id: &str, consumed_slot: bool) {
        let now = now_rfc3339();
        self.store.with_mut(job_id, |j| {
            j.status = JobStatus::Canceled;
            j.code = Some(-1);
            j.ended_at = Some(now);
        });
        self.notify_waiters(job_id).await;
        if consumed_slot {
            let mut sched = self.sched.lock().await;
            sched.on_job_done();
        }
        self.drain().await;
    }

    async fn run_and_finish(
        self: Arc<Self>,
        job_id: String,
        script: crate::schema::ScriptEntry,
        notify: Arc<Notify>,
    ) {
        let args = self
            .store
            .get(&job_id)
            .map(|j| j.args)
            .unwrap_or_default();
        let already_cancel_requested = self
            .store
            .get(&job_id)
            .map(|j| j.cancel_requested)
            .unwrap_or(false);

        let outcome = executor::run_job(
            &job_id,
            &script,
            &args,
            &self.log_sink,
            self.max_log_bytes_per_stream,
            self.preview_max_bytes,
            notify,
            already_cancel_requested,
        )
        .await;

        let ended_at = now_rfc3339();
        self.store.with_mut(&job_id, |j| {
            let duration_ms = j
                .started_at
                .as_deref()
                .and_then(|start| crate::jobstore::duration_between(start, &ended_at));
            j.status = outcome.status;
            j.code = Some(outcome.code);
            j.ended_at = Some(ended_at.clone());
            j.duration_ms = duration_ms;
            j.stdout_size = outcome.stdout_size;
            j.stdout_truncated = outcome.stdout_truncated;
            j.stdout_preview = outcome.stdout_preview;
            j.stderr_size = outcome.stderr_size;
            j.stderr_truncated = outcome.stderr_truncated;
            j.stderr_preview = outcome.stderr_preview;
        });
        info!(job_id, status = outcome.status.as_str(), "job finished");

        self.cancel_signals.lock().await.remove(&job_id);
        self.notify_waiters(&job_id).await;

        {
            let mut sched = self.sched.lock().await;
            sched.on_job_done();
        }
        // Boxed to break the drain -> spawn_job -> run_and_finish -> drain
        // type-level cycle (spawn_job hands the next job to a fresh task,
        // but the compiler still sees this call chain as mutually
        // recursive futures without indirection).
        self.drain().await;
    }

    async fn notify_waiters(self: &Arc<Self>, job_id: &str) {
        let senders = self.waiters.lock().await.remove(job_id);
        if let Some(senders) = senders
            && let Some(job) = self.store.get(job_id)
        {
            for tx in senders {
                let _ = tx.send(job.clone());
            }
        }
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job, ApiError> {
        self.store
            .get(job_id)
            .ok_or_else(|| ApiError::new(ErrorCode::JobNotFound, format!("unknown jobId: {job_id}")))
    }

    pub fn get_job_logs(
        &self,
        job_id: &str,
        stream: Stream,
        offset: u64,
        limit: u64,
    ) -> Result<LogPage, ApiError> {
        if limit == 0 {
            return Err(ApiError::new(ErrorCode::InvalidArgs, "limit must be > 0"));
        }
        self.store
            .get(job_id)
            .ok_or_else(|| ApiError::new(ErrorCode::JobNotFound, format!("unknown jobId: {job_id}")))?;
        self.log_sink
            .read_range(job_id, stream, offset, limit)
            .map_err(|e| ApiError::internal(format!("log read failed: {e}")))
    }

    /// Cancel a job (spec §6.1 `cancelJob`). Idempotent: canceling an
    /// already-terminal job is a no-op that returns its current state.
    pub async fn cancel_job(self: &Arc<Self>, job_id: &str) -> Result<Job, ApiError> {
        let job = self
            .store
            .get(job_id)
            .ok_or_else(|| ApiError::new(ErrorCode::JobNotFound, format!("unknown jobId: {job_id}")))?;

        if job.status.is_terminal() {
            return Ok(job);
        }

        let marked = self
            .store
            .with_mut(job_id, |j| {
                j.cancel_requested = true;
            })
            .is_some();
        if !marked {
            return Err(ApiError::new(ErrorCode::JobNotFound, format!("unknown jobId: {job_id}")));
        }

        if let Some(notify) = self.cancel_signals.lock().await.get(job_id) {
            notify.notify_one();
            return Ok(self.store.get(job_id).expect("job exists"));
        }

        if job.status == JobStatus::Queued {
            // Still sitting in the queue and never admitted: pull it out
            // directly rather than waiting for its turn to be dequeued and
            // short-circuited, so cancellation is immediate.
            let removed = {
                let mut sched = self.sched.lock().await;
                sched.remove_queued(job_id)
            };
            if removed {
                self.finish_canceled_without_running(job_id, false).await;
            } else {
                // Lost the race with the scheduler admitting it; it now has
                // a cancel signal to deliver to.
                if let Some(notify) = self.cancel_signals.lock().await.get(job_id) {
                    notify.notify_one();
                }
            }
        }

        Ok(self.store.get(job_id).expect("job exists"))
    }
}
