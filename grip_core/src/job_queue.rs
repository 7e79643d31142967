//! Priority job queue with bounded concurrency, per-attempt timeouts and
//! exponential-backoff retries.
//!
//! The queue owns no scheduler thread. `enqueue` only stages a job; nothing
//! starts until the owner calls [`JobQueue::poll`], so every job staged in one
//! event-loop turn is ordered by priority before the first of them runs. Each
//! attempt runs on its own worker thread and reports back on
//! [`JobQueue::completions`] with its attempt generation.
//!
//! An attempt that times out is failed (or retried) right away, but its
//! worker keeps its concurrency slot until it reports back, so the number of
//! handlers executing at once never exceeds `concurrency`.

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{self as xch, RecvTimeoutError};

use crate::config::QueueCfg;
use crate::error::{JobError, QueueError};

pub type JobId = u64;

/// Runs one attempt of a job. `Err` fails the attempt.
pub type Handler<P> = Arc<dyn Fn(&P) -> Result<(), JobError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Higher runs earlier.
    pub priority: i32,
    pub max_attempts: u32,
    /// Per-attempt limit; `None` waits for the handler indefinitely.
    pub timeout: Option<Duration>,
    /// Hold the job in `Delayed` before it becomes eligible.
    pub delay: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            max_attempts: 1,
            timeout: None,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Delayed,
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Lifecycle notifications (`job:completed`, `job:retry`, `job:failed`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Completed {
        id: JobId,
        job_type: String,
        attempts: u32,
    },
    Retry {
        id: JobId,
        job_type: String,
        attempt: u32,
        delay: Duration,
        error: JobError,
    },
    Failed {
        id: JobId,
        job_type: String,
        attempts: u32,
        error: JobError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub pending: usize,
    pub processing: usize,
    pub delayed: usize,
    /// Timed-out attempts whose worker has not returned yet.
    pub abandoned: usize,
    pub paused: bool,
}

/// `base * 2^(attempt-1)`, saturating. `attempt` is 1-based.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let shift = attempt.saturating_sub(1).min(30);
    base.saturating_mul(1u32 << shift)
}

/// Result of one attempt, sent by its worker thread.
#[derive(Debug)]
pub struct AttemptDone {
    id: JobId,
    generation: u64,
    result: Result<(), JobError>,
}

struct Job<P> {
    id: JobId,
    job_type: String,
    payload: Arc<P>,
    opts: JobOptions,
    attempts: u32,
    status: JobStatus,
}

struct Waiting<P> {
    ready_at: Instant,
    seq: u64,
    job: Job<P>,
}

struct Running<P> {
    job: Job<P>,
    generation: u64,
    deadline: Option<Instant>,
}

pub struct JobQueue<P> {
    cfg: QueueCfg,
    handlers: HashMap<String, Handler<P>>,
    pending: Vec<Job<P>>,
    waiting: Vec<Waiting<P>>,
    running: HashMap<JobId, Running<P>>,
    /// Generations of timed-out attempts still occupying a slot.
    abandoned: HashSet<u64>,
    paused: bool,
    next_id: JobId,
    seq: u64,
    generation: u64,
    completed: u64,
    failed: u64,
    retried: u64,
    done_tx: xch::Sender<AttemptDone>,
    done_rx: xch::Receiver<AttemptDone>,
    events: Option<xch::Sender<JobEvent>>,
}

impl<P: Send + Sync + 'static> JobQueue<P> {
    pub fn new(cfg: QueueCfg) -> Self {
        Self::build(cfg, None)
    }

    /// Queue that reports lifecycle events on `events`.
    pub fn with_events(cfg: QueueCfg, events: xch::Sender<JobEvent>) -> Self {
        Self::build(cfg, Some(events))
    }

    fn build(cfg: QueueCfg, events: Option<xch::Sender<JobEvent>>) -> Self {
        let (done_tx, done_rx) = xch::unbounded();
        Self {
            cfg: QueueCfg {
                concurrency: cfg.concurrency.max(1),
                ..cfg
            },
            handlers: HashMap::new(),
            pending: Vec::new(),
            waiting: Vec::new(),
            running: HashMap::new(),
            abandoned: HashSet::new(),
            paused: false,
            next_id: 1,
            seq: 0,
            generation: 0,
            completed: 0,
            failed: 0,
            retried: 0,
            done_tx,
            done_rx,
            events,
        }
    }

    /// One handler per job type.
    pub fn register_handler<F>(&mut self, job_type: impl Into<String>, handler: F) -> Result<(), QueueError>
    where
        F: Fn(&P) -> Result<(), JobError> + Send + Sync + 'static,
    {
        let job_type = job_type.into();
        if self.handlers.contains_key(&job_type) {
            return Err(QueueError::HandlerExists(job_type));
        }
        self.handlers.insert(job_type, Arc::new(handler));
        Ok(())
    }

    /// Stage a job and return its id. It becomes eligible on the next
    /// [`poll`](Self::poll). A missing handler is reported when the job runs,
    /// not here.
    pub fn enqueue(
        &mut self,
        job_type: impl Into<String>,
        payload: P,
        opts: JobOptions,
    ) -> Result<JobId, QueueError> {
        let id = self.next_id;
        self.next_id += 1;
        let job = Job {
            id,
            job_type: job_type.into(),
            payload: Arc::new(payload),
            opts: JobOptions {
                max_attempts: opts.max_attempts.max(1),
                ..opts
            },
            attempts: 0,
            status: JobStatus::Pending,
        };
        if job.opts.delay.is_zero() {
            self.admit(job);
        } else {
            let ready_at = Instant::now() + job.opts.delay;
            let mut job = job;
            job.status = JobStatus::Delayed;
            self.hold(job, ready_at);
        }
        Ok(id)
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Worker results. Hand anything received here to
    /// [`on_attempt_done`](Self::on_attempt_done); `poll` also drains it.
    pub fn completions(&self) -> &xch::Receiver<AttemptDone> {
        &self.done_rx
    }

    /// Collect finished attempts, promote delayed jobs, expire late attempts
    /// and start as many jobs as the concurrency limit allows.
    pub fn poll(&mut self, now: Instant) {
        while let Ok(done) = self.done_rx.try_recv() {
            self.settle(done, now);
        }
        self.promote_ready(now);
        self.expire(now);
        self.dispatch(now);
    }

    pub fn on_attempt_done(&mut self, done: AttemptDone, now: Instant) {
        self.settle(done, now);
        self.poll(now);
    }

    /// Earliest retry, delay or attempt timeout, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        let waiting = self.waiting.iter().map(|w| w.ready_at).min();
        let running = self.running.values().filter_map(|r| r.deadline).min();
        match (waiting, running) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// True when no job is staged, waiting, running or still held by an
    /// abandoned worker.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
            && self.waiting.is_empty()
            && self.running.is_empty()
            && self.abandoned.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let delayed = self
            .waiting
            .iter()
            .filter(|w| w.job.status == JobStatus::Delayed)
            .count();
        QueueStats {
            completed: self.completed,
            failed: self.failed,
            retried: self.retried,
            pending: self.pending.len() + (self.waiting.len() - delayed),
            processing: self.running.len(),
            delayed,
            abandoned: self.abandoned.len(),
            paused: self.paused,
        }
    }

    /// Drive the queue on the calling thread until it is idle, up to `timeout`.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let until = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            self.poll(now);
            if self.is_idle() {
                return true;
            }
            if now >= until {
                return false;
            }
            let wake = self.next_deadline().map_or(until, |d| d.min(until));
            match self
                .done_rx
                .recv_timeout(wake.saturating_duration_since(Instant::now()))
            {
                Ok(done) => self.settle(done, Instant::now()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return self.is_idle(),
            }
        }
    }

    /// Insert before the first job of strictly lower priority.
    fn admit(&mut self, mut job: Job<P>) {
        job.status = JobStatus::Pending;
        let at = self
            .pending
            .iter()
            .position(|j| j.opts.priority < job.opts.priority)
            .unwrap_or(self.pending.len());
        tracing::trace!(id = job.id, priority = job.opts.priority, at, "job admitted");
        self.pending.insert(at, job);
    }

    fn hold(&mut self, job: Job<P>, ready_at: Instant) {
        self.seq += 1;
        self.waiting.push(Waiting {
            ready_at,
            seq: self.seq,
            job,
        });
    }

    fn promote_ready(&mut self, now: Instant) {
        // Earliest first so equal priorities keep the order they became ready in.
        while let Some(i) = self
            .waiting
            .iter()
            .enumerate()
            .filter(|(_, w)| w.ready_at <= now)
            .min_by_key(|(_, w)| (w.ready_at, w.seq))
            .map(|(i, _)| i)
        {
            let w = self.waiting.swap_remove(i);
            self.admit(w.job);
        }
    }

    fn expire(&mut self, now: Instant) {
        let late: Vec<JobId> = self
            .running
            .iter()
            .filter(|(_, r)| r.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();
        for id in late {
            if let Some(r) = self.running.remove(&id) {
                let limit = r.job.opts.timeout.unwrap_or_default();
                tracing::warn!(id, job_type = %r.job.job_type, ?limit, "job attempt timed out");
                self.abandoned.insert(r.generation);
                self.finish_attempt(r.job, Err(JobError::Timeout(limit)), now);
            }
        }
    }

    fn settle(&mut self, done: AttemptDone, now: Instant) {
        let AttemptDone {
            id,
            generation,
            result,
        } = done;
        if self.abandoned.remove(&generation) {
            tracing::debug!(id, generation, "late result for abandoned attempt dropped");
            return;
        }
        match self.running.get(&id) {
            Some(r) if r.generation == generation => {
                if let Some(r) = self.running.remove(&id) {
                    self.finish_attempt(r.job, result, now);
                }
            }
            _ => tracing::debug!(id, generation, "result for unknown attempt dropped"),
        }
    }

    fn slots_free(&self) -> bool {
        self.running.len() + self.abandoned.len() < self.cfg.concurrency
    }

    fn dispatch(&mut self, now: Instant) {
        while !self.paused && self.slots_free() && !self.pending.is_empty() {
            let mut job = self.pending.remove(0);
            job.attempts += 1;
            let Some(handler) = self.handlers.get(&job.job_type).cloned() else {
                let err = JobError::NoHandler(job.job_type.clone());
                self.finish_attempt(job, Err(err), now);
                continue;
            };
            job.status = JobStatus::Processing;
            self.generation += 1;
            let generation = self.generation;
            let id = job.id;
            let payload = Arc::clone(&job.payload);
            let tx = self.done_tx.clone();
            tracing::debug!(id, job_type = %job.job_type, attempt = job.attempts, "job attempt started");
            let spawned = std::thread::Builder::new()
                .name(format!("job-{id}"))
                .spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| handler(payload.as_ref())))
                        .unwrap_or_else(|_| Err(JobError::Handler("handler panicked".into())));
                    let _ = tx.send(AttemptDone {
                        id,
                        generation,
                        result,
                    });
                });
            if let Err(e) = spawned {
                self.finish_attempt(job, Err(JobError::Handler(e.to_string())), now);
                continue;
            }
            let deadline = job.opts.timeout.map(|t| now + t);
            self.running.insert(
                id,
                Running {
                    job,
                    generation,
                    deadline,
                },
            );
        }
    }

    fn finish_attempt(&mut self, mut job: Job<P>, result: Result<(), JobError>, now: Instant) {
        match result {
            Ok(()) => {
                job.status = JobStatus::Completed;
                self.completed += 1;
                tracing::debug!(id = job.id, attempts = job.attempts, "job completed");
                self.notify(JobEvent::Completed {
                    id: job.id,
                    job_type: job.job_type,
                    attempts: job.attempts,
                });
            }
            Err(error) if !error.is_permanent() && job.attempts < job.opts.max_attempts => {
                let delay = backoff_delay(self.cfg.retry_delay, job.attempts);
                self.retried += 1;
                tracing::info!(id = job.id, attempt = job.attempts, ?delay, %error, "job retry scheduled");
                self.notify(JobEvent::Retry {
                    id: job.id,
                    job_type: job.job_type.clone(),
                    attempt: job.attempts,
                    delay,
                    error,
                });
                job.status = JobStatus::Pending;
                self.hold(job, now + delay);
            }
            Err(error) => self.fail(job, error),
        }
    }
}

impl<P> JobQueue<P> {
    fn notify(&self, event: JobEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn fail(&mut self, mut job: Job<P>, error: JobError) {
        job.status = JobStatus::Failed;
        self.failed += 1;
        tracing::warn!(id = job.id, attempts = job.attempts, %error, "job failed");
        self.notify(JobEvent::Failed {
            id: job.id,
            job_type: job.job_type,
            attempts: job.attempts,
            error,
        });
    }
}

impl<P> Drop for JobQueue<P> {
    /// Jobs that never finished are failed with [`JobError::Dropped`].
    /// Workers still running are not joined.
    fn drop(&mut self) {
        let mut left: Vec<Job<P>> = self.pending.drain(..).collect();
        left.extend(self.waiting.drain(..).map(|w| w.job));
        left.extend(self.running.drain().map(|(_, r)| r.job));
        if !left.is_empty() {
            tracing::warn!(count = left.len(), "job queue dropped with undelivered jobs");
        }
        for job in left {
            self.fail(job, JobError::Dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::ZERO);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
        assert!(backoff_delay(base, 500) > Duration::ZERO);
    }

    #[test]
    fn duplicate_handler_is_rejected() {
        let mut q: JobQueue<u32> = JobQueue::new(QueueCfg::default());
        q.register_handler("send", |_| Ok(())).expect("first");
        assert_eq!(
            q.register_handler("send", |_| Ok(())),
            Err(QueueError::HandlerExists("send".into()))
        );
    }

    #[test]
    fn nothing_runs_before_poll() {
        let mut q: JobQueue<u32> = JobQueue::new(QueueCfg::default());
        q.register_handler("send", |_| Ok(())).expect("register");
        q.enqueue("send", 1, JobOptions::default()).expect("enqueue");
        assert_eq!(q.stats().pending, 1);
        assert_eq!(q.stats().processing, 0);
        q.poll(Instant::now());
        assert_eq!(q.stats().pending, 0);
        assert!(q.wait_idle(Duration::from_secs(3)));
        assert_eq!(q.stats().completed, 1);
    }

    #[test]
    fn dropping_fails_unfinished_jobs() {
        let (tx, rx) = xch::unbounded();
        let mut q: JobQueue<u32> = JobQueue::with_events(QueueCfg::default(), tx);
        q.pause();
        let id = q.enqueue("send", 1, JobOptions::default()).expect("enqueue");
        drop(q);
        assert_eq!(
            rx.try_recv().ok(),
            Some(JobEvent::Failed {
                id,
                job_type: "send".into(),
                attempts: 0,
                error: JobError::Dropped,
            })
        );
    }
}
