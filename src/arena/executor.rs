//! Actuation with an enforced timeout and a single bounded-retry policy.
//!
//! [`ActionExecutor`] runs an inner [`Executor`] on a dedicated worker
//! thread and waits for each reply with a deadline. A call that misses the
//! deadline is reported as [`ExecutionReport::TimedOut`]; its late reply is
//! recognised by sequence number and discarded, so it can never be mistaken
//! for the answer to a later request.
//!
//! Failed calls are retried on the worker with exponential backoff, up to
//! the configured number of attempts. Timeouts are never retried: the
//! request may still land, and replaying it could place a card twice.
//! Rejections are never retried.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::rl::environment::{ExecutionReport, Executor};
use crate::rl::types::Action;

/// How failed actuation calls are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Request {
    Start,
    Execute(Action),
}

#[derive(Debug)]
struct Reply {
    seq: u64,
    report: ExecutionReport,
    attempts: u32,
}

/// Timeout-bounded executor running its backend on a worker thread.
pub struct ActionExecutor {
    requests: Option<Sender<(u64, Request)>>,
    replies: Receiver<Reply>,
    worker: Option<JoinHandle<()>>,
    timeout: Duration,
    next_seq: u64,
    timeouts: u64,
    retries: u64,
}

impl ActionExecutor {
    /// Start the worker thread.
    ///
    /// # Arguments
    /// * `inner` - Backend that performs the actuation
    /// * `timeout` - Upper bound on one call, retries included
    /// * `retry` - Retry policy for failed calls
    pub fn spawn<E>(inner: E, timeout: Duration, retry: RetryPolicy) -> Self
    where
        E: Executor + Send + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel::<(u64, Request)>();
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>();
        let worker = thread::spawn(move || run_worker(inner, retry, request_rx, reply_tx));
        Self {
            requests: Some(request_tx),
            replies: reply_rx,
            worker: Some(worker),
            timeout,
            next_seq: 0,
            timeouts: 0,
            retries: 0,
        }
    }

    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Calls that timed out so far.
    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    /// Retries performed so far (attempts beyond the first).
    pub fn retries(&self) -> u64 {
        self.retries
    }

    fn call(&mut self, request: Request) -> ExecutionReport {
        let seq = self.next_seq;
        self.next_seq += 1;
        let sent = self
            .requests
            .as_ref()
            .map(|tx| tx.send((seq, request)).is_ok())
            .unwrap_or(false);
        if !sent {
            return ExecutionReport::Failed("actuation worker stopped".to_string());
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.seq == seq => {
                    self.retries += u64::from(reply.attempts.saturating_sub(1));
                    return reply.report;
                }
                Ok(stale) => {
                    debug!("discarding late reply to request {}", stale.seq);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.timeouts += 1;
                    warn!("{:?} timed out after {:?}", request, self.timeout);
                    return ExecutionReport::TimedOut;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return ExecutionReport::Failed("actuation worker stopped".to_string());
                }
            }
        }
    }

    /// Stop the worker and wait for it to finish its current request.
    pub fn shutdown(mut self) {
        self.requests = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("actuation worker panicked");
            }
        }
    }
}

impl Executor for ActionExecutor {
    fn start_match(&mut self) -> ExecutionReport {
        self.call(Request::Start)
    }

    fn execute(&mut self, action: &Action) -> ExecutionReport {
        self.call(Request::Execute(*action))
    }
}

impl Drop for ActionExecutor {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop; a worker stuck in a slow
        // backend call is detached rather than joined.
        self.requests = None;
    }
}

fn run_worker<E: Executor>(mut inner: E, retry: RetryPolicy, requests: Receiver<(u64, Request)>, replies: Sender<Reply>) {
    let max_attempts = retry.max_attempts.max(1);
    for (seq, request) in requests {
        let mut attempts = 0;
        let report = loop {
            attempts += 1;
            let report = match request {
                Request::Start => inner.start_match(),
                Request::Execute(action) => inner.execute(&action),
            };
            match report {
                ExecutionReport::Failed(ref reason) if attempts < max_attempts => {
                    let delay = retry.backoff.saturating_mul(1 << (attempts - 1).min(10));
                    debug!("attempt {} of {:?} failed: {}; retrying in {:?}", attempts, request, reason, delay);
                    thread::sleep(delay);
                }
                report => break report,
            }
        };
        if replies.send(Reply { seq, report, attempts }).is_err() {
            break;
        }
    }
}
