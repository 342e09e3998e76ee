//! Bounded-concurrency primitives shared by ingestion, factorization and
//! sorting.
//!
//! ```text
//! Semaphore   N tokens in a bounded channel; acquire = take, drop = return
//! CancelToken shared flag, checked by workers between units of work
//! Deadline    optional per-job time limit, checked the same way
//! run_bounded scoped pool: one Result per item, stops on first failure
//! ```

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::StoreError;

/// Poll interval for waits that must also observe cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// A counting semaphore.
#[derive(Debug, Clone)]
pub struct Semaphore {
    tx: Sender<()>,
    rx: Receiver<()>,
}

/// A held token; returned to its semaphore on drop.
#[derive(Debug)]
pub struct Permit {
    tx: Sender<()>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.tx.try_send(());
    }
}

impl Semaphore {
    /// Creates a semaphore with `permits` tokens (at least one).
    #[must_use]
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        let (tx, rx) = channel::bounded(permits);
        for _ in 0..permits {
            let _ = tx.try_send(());
        }
        Self { tx, rx }
    }

    /// Blocks until a token is available.
    pub fn acquire(&self) -> Permit {
        // the semaphore holds a sender, so the channel never disconnects
        let _ = self.rx.recv();
        Permit {
            tx: self.tx.clone(),
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up once `cancel` fires.
    pub fn acquire_or_cancel(&self, cancel: &CancelToken) -> Option<Permit> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            match self.rx.recv_timeout(CANCEL_POLL) {
                Ok(()) => {
                    return Some(Permit {
                        tx: self.tx.clone(),
                    })
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Tokens currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.rx.len()
    }
}

/// A cloneable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }
}

/// An optional time limit for one job, started at construction.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    #[must_use]
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    #[must_use]
    pub fn none() -> Self {
        Self::new(None)
    }

    #[must_use]
    pub fn expired(&self) -> bool {
        self.limit.is_some_and(|l| self.start.elapsed() > l)
    }

    /// `Err(TimedOut)` naming `what` once the limit has passed.
    pub fn check(&self, what: &str) -> Result<(), StoreError> {
        match self.limit {
            Some(limit) if self.start.elapsed() > limit => Err(StoreError::TimedOut {
                what: what.to_string(),
                secs: limit.as_secs(),
            }),
            _ => Ok(()),
        }
    }
}

/// Runs `f` over `items` on at most `limit` scoped worker threads.
///
/// Returns one result per item, in input order. The first failure cancels
/// `cancel`; items not yet started at that point (or when `cancel` was
/// already fired by the caller) report [`StoreError::Cancelled`].
pub fn run_bounded<T, R, E, F>(items: Vec<T>, limit: usize, cancel: &CancelToken, f: F) -> Vec<Result<R, E>>
where
    T: Send,
    R: Send,
    E: Send + From<StoreError>,
    F: Fn(T) -> Result<R, E> + Sync,
{
    let n = items.len();
    let (job_tx, job_rx) = channel::unbounded();
    for job in items.into_iter().enumerate() {
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let (res_tx, res_rx) = channel::unbounded();
    let f = &f;
    thread::scope(|s| {
        for _ in 0..limit.max(1).min(n) {
            let job_rx = job_rx.clone();
            let res_tx = res_tx.clone();
            s.spawn(move || {
                for (i, item) in job_rx.iter() {
                    let res = if cancel.is_cancelled() {
                        Err(E::from(StoreError::Cancelled))
                    } else {
                        let res = f(item);
                        if res.is_err() {
                            cancel.cancel();
                        }
                        res
                    };
                    let _ = res_tx.send((i, res));
                }
            });
        }
    });
    drop(res_tx);

    let mut out: Vec<Option<Result<R, E>>> = (0..n).map(|_| None).collect();
    for (i, res) in res_rx.try_iter() {
        out[i] = Some(res);
    }
    out.into_iter()
        .map(|r| r.unwrap_or_else(|| Err(E::from(StoreError::Cancelled))))
        .collect()
}
