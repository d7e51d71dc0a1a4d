//! Background worker for long jobs (cache refresh, directory scans).
//!
//! One worker thread drains a job channel. Every job gets a cancellation
//! token it is expected to poll at convenient points; cancelling a kind
//! flips the tokens of all queued and running jobs of that kind, so a
//! superseded scan stops at its next checkpoint instead of finishing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

/// What a job is doing; cancellation is per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    CacheRefresh,
    Scan,
    PlaylistLoad,
}

/// Polled by long jobs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

type Job = Box<dyn FnOnce(&CancelToken) + Send>;

pub struct Worker {
    tx: Option<Sender<(JobKind, CancelToken, Job)>>,
    thread: Option<JoinHandle<()>>,
    /// Tokens of queued/running jobs, for cancel-by-kind.
    tokens: Arc<Mutex<Vec<(JobKind, CancelToken)>>>,
}

impl Worker {
    pub fn start() -> Self {
        let (tx, rx): (Sender<(JobKind, CancelToken, Job)>, Receiver<_>) = unbounded();
        let thread = std::thread::Builder::new()
            .name("worker".to_string())
            .spawn(move || {
                for (kind, token, job) in rx {
                    if token.is_cancelled() {
                        tracing::debug!(?kind, "skipping cancelled job");
                        continue;
                    }
                    job(&token);
                }
            })
            .expect("spawning the worker thread");
        Self {
            tx: Some(tx),
            thread: Some(thread),
            tokens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a job; the returned token cancels just this job.
    pub fn submit(
        &self,
        kind: JobKind,
        job: impl FnOnce(&CancelToken) + Send + 'static,
    ) -> CancelToken {
        let token = CancelToken::new();
        {
            let mut tokens = self.tokens.lock();
            tokens.retain(|(_, t)| !t.is_cancelled());
            tokens.push((kind, token.clone()));
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send((kind, token.clone(), Box::new(job)));
        }
        token
    }

    /// Cancel every queued and running job of `kind`.
    pub fn cancel_kind(&self, kind: JobKind) {
        for (k, token) in self.tokens.lock().iter() {
            if *k == kind {
                token.cancel();
            }
        }
    }

    /// Cancel everything and join the thread.
    pub fn shutdown(&mut self) {
        for (_, token) in self.tokens.lock().iter() {
            token.cancel();
        }
        self.tx = None;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
