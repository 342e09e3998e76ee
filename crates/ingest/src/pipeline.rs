use anyhow::{anyhow, Context, Result};
use config::{Config, Schema};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::thread::{self, Scope};
use store::pool::{CancelToken, Deadline, Semaphore};
use store::{Record, Store, StoreError};
use tracing::{debug, error, info, warn};

use crate::convert::{ChunkStats, FieldPlan};
use crate::report::{FileReport, FileStatus, IngestReport};
use crate::source::SourceOpener;

/// Capacity of the record channel between dispatch tasks and the harvester.
pub const RECORD_CHANNEL_CAP: usize = 1024;

/// One ingestion run over every configured source file.
///
/// # Threads
///
/// ```text
/// file thread (one per file)
///   Opening -> Streaming(chunk 0, 1, ...) -> Done | Failed
///        |  each chunk: acquire permit, spawn dispatch task
///        v
/// dispatch task (<= Concurrency at once)
///   convert rows -> Record ──bounded channel──> harvester
///                                                  |
///                                   bucket_of(key) -> Bucket::append
/// ```
///
/// Shutdown: wait for every dispatch task (wait group), close the channel,
/// join the harvester, then flush every bucket exactly once.
pub struct Pipeline<'a> {
    conf: &'a Config,
    schema: Schema,
    store: &'a Store,
    opener: &'a dyn SourceOpener,
    cancel: CancelToken,
}

impl<'a> Pipeline<'a> {
    /// # Errors
    ///
    /// Fails if the schema is invalid or `store` was not created for
    /// ingestion with the configured bucket count.
    pub fn new(conf: &'a Config, store: &'a Store, opener: &'a dyn SourceOpener) -> Result<Self> {
        let schema = conf.schema()?;
        anyhow::ensure!(
            store.buckets().len() == conf.num_buckets as usize,
            "store has {} bucket buffers, config expects {}",
            store.buckets().len(),
            conf.num_buckets
        );
        Ok(Self {
            conf,
            schema,
            store,
            opener,
            cancel: CancelToken::new(),
        })
    }

    /// Token that stops the run when fired.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ingests every file in `SourceFiles`.
    pub fn run(&self) -> Result<IngestReport> {
        self.run_paths(&self.conf.source_paths())
    }

    /// Ingests `paths`, then flushes every bucket.
    ///
    /// A file that fails (unreadable, missing a required field, timed out)
    /// is reported as failed while the other files continue. A store
    /// failure in the harvester cancels everything and is returned as an
    /// error.
    pub fn run_paths(&self, paths: &[PathBuf]) -> Result<IngestReport> {
        let reports: Vec<Mutex<FileReport>> = paths
            .iter()
            .map(|p| Mutex::new(FileReport::new(p.clone())))
            .collect();
        let (tx, rx) = channel::bounded::<Record>(RECORD_CHANNEL_CAP);
        let sem = Semaphore::new(self.conf.concurrency);
        let wg = WaitGroup::new();

        info!(
            files = paths.len(),
            buckets = self.conf.num_buckets,
            concurrency = self.conf.concurrency,
            "ingestion started"
        );

        let harvested = thread::scope(|s| {
            let harvester = s.spawn(|| self.harvest(rx));

            let files: Vec<_> = paths
                .iter()
                .zip(&reports)
                .map(|(path, report)| {
                    let tx = tx.clone();
                    let wg = wg.clone();
                    let sem = &sem;
                    s.spawn(move || self.ingest_file(s, path, report, sem, tx, wg))
                })
                .collect();

            for h in files {
                if h.join().is_err() {
                    error!("file thread panicked");
                    self.cancel.cancel();
                }
            }
            wg.wait();
            drop(tx);

            harvester
                .join()
                .unwrap_or_else(|_| Err(anyhow!("harvester thread panicked")))
        });

        let records = match harvested {
            Ok(n) => n,
            Err(e) => {
                self.cancel.cancel();
                return Err(e);
            }
        };

        self.store.flush_all().context("final flush failed")?;
        let flushed = self.store.buckets().iter().map(|b| b.flushed_rows()).sum();
        let report = IngestReport::from_files(
            reports.into_iter().map(Mutex::into_inner).collect(),
            &self.schema,
            records,
            flushed,
        );
        info!(
            records = report.records_written,
            dropped = report.dropped_missing_key,
            failed = report.failed().count(),
            "ingestion finished"
        );
        Ok(report)
    }

    /// The single writer: picks each record's bucket and appends it.
    fn harvest(&self, rx: Receiver<Record>) -> Result<u64> {
        let n = self.store.num_buckets();
        let mut records = 0u64;
        for rec in rx.iter() {
            let b = partition::bucket_of(rec.key, n);
            let res = match self.store.bucket(b) {
                Some(bucket) => bucket.append(rec).map(|_| ()),
                None => Err(StoreError::BucketOutOfRange {
                    bucket: b,
                    num_buckets: n,
                }),
            };
            if let Err(e) = res {
                self.cancel.cancel();
                return Err(e).with_context(|| format!("failed to append to bucket {b}"));
            }
            records += 1;
        }
        Ok(records)
    }

    fn ingest_file<'scope>(
        &'scope self,
        s: &'scope Scope<'scope, '_>,
        path: &'scope Path,
        report: &'scope Mutex<FileReport>,
        sem: &'scope Semaphore,
        tx: Sender<Record>,
        wg: WaitGroup,
    ) {
        info!(file = %path.display(), "starting file");
        let status = match self.stream_file(s, path, report, sem, &tx, &wg) {
            Ok(FileStatus::Done) => {
                info!(file = %path.display(), "file done");
                FileStatus::Done
            }
            Ok(other) => other,
            Err(e) => {
                error!(file = %path.display(), error = %format!("{e:#}"), "file failed");
                FileStatus::Failed(format!("{e:#}"))
            }
        };
        report.lock().set_status(status);
    }

    fn stream_file<'scope>(
        &'scope self,
        s: &'scope Scope<'scope, '_>,
        path: &'scope Path,
        report: &'scope Mutex<FileReport>,
        sem: &'scope Semaphore,
        tx: &Sender<Record>,
        wg: &WaitGroup,
    ) -> Result<FileStatus> {
        let deadline = Deadline::new(self.conf.io_timeout());
        let mut source = self
            .opener
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        for chunk_id in 0.. {
            if self.cancel.is_cancelled() {
                return Ok(FileStatus::Cancelled);
            }
            if self.conf.chunk_limit().is_some_and(|max| chunk_id >= max) {
                info!(file = %path.display(), chunks = chunk_id, "chunk limit reached");
                break;
            }
            deadline.check(&path.display().to_string())?;

            let chunk = match source
                .next_chunk(self.conf.chunk_size)
                .with_context(|| format!("{}: failed to read chunk {chunk_id}", path.display()))?
            {
                Some(c) => c,
                None => break,
            };
            let plan = FieldPlan::resolve(&self.schema, &chunk)
                .with_context(|| format!("{}: chunk {chunk_id}", path.display()))?;
            if chunk_id == 0 {
                for name in plan.absent_fields() {
                    warn!(file = %path.display(), field = name, "optional field absent, writing zeros");
                }
            }
            debug!(file = %path.display(), chunk = chunk_id, rows = chunk.rows(), "dispatching chunk");

            let permit = match sem.acquire_or_cancel(&self.cancel) {
                Some(p) => p,
                None => return Ok(FileStatus::Cancelled),
            };
            report.lock().chunks += 1;

            let tx = tx.clone();
            let wg = wg.clone();
            let cancel = &self.cancel;
            s.spawn(move || {
                let _permit = permit;
                let stats = plan.convert(&chunk, |rec| {
                    !cancel.is_cancelled() && tx.send(rec).is_ok()
                });
                record_chunk(report, &stats);
                drop(wg);
            });
        }
        Ok(FileStatus::Done)
    }
}

fn record_chunk(report: &Mutex<FileReport>, stats: &ChunkStats) {
    report.lock().add_chunk(stats);
}
