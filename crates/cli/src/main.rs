//! # bucketize - Claims Store Tools
//!
//! Builds and maintains a bucketed columnar store.
//!
//! ## Commands
//!
//! ```text
//! bucketize ingest    <config>                      source files -> Buckets/
//! bucketize factorize <config> <prefix> [--pad N]   string columns -> codes
//!                     [--seed-empty] [--revert]
//! bucketize sort      <config> [--id F] [--time F]  reorder rows in every bucket
//!                     [--revert]
//! ```
//!
//! Every command reads the same JSON configuration (see the `config`
//! crate). `factorize` and `sort` only use its `TargetDir` and tuning
//! knobs; the rest comes from the store's own `conf.json`.
//!
//! ## Logging
//!
//! Log lines go to stderr, or to `--log-file PATH`. The level defaults to
//! `info` and follows `RUST_LOG`:
//!
//! ```text
//! $ RUST_LOG=debug bucketize ingest enrollment.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use factorize::{zero_pad, Factorizer};
use ingest::{DelimitedOpener, Pipeline};
use sorter::{SortKeys, Sorter};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use store::Store;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "bucketize", version, about = "Bucketed columnar claims store")]
struct Args {
    /// Write log lines to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the configured source files into a fresh store.
    Ingest {
        config: PathBuf,
    },
    /// Replace string columns with integer codes.
    Factorize {
        config: PathBuf,
        /// Field prefix; `Dx*` covers Dx1, Dx2, ... with one dictionary.
        prefix: String,
        /// Left-pad values with zeros to this width before coding.
        #[arg(long)]
        pad: Option<usize>,
        /// Reserve code 0 for the empty string.
        #[arg(long)]
        seed_empty: bool,
        /// Undo every factorization in the store.
        #[arg(long)]
        revert: bool,
    },
    /// Sort every bucket by id and/or time.
    Sort {
        config: PathBuf,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        time: Option<String>,
        /// Restore the files saved by the last sort.
        #[arg(long)]
        revert: bool,
    },
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(filter);
    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref())?;

    match args.command {
        Command::Ingest { config } => run_ingest(&config),
        Command::Factorize {
            config,
            prefix,
            pad,
            seed_empty,
            revert,
        } => run_factorize(&config, &prefix, pad, seed_empty, revert),
        Command::Sort {
            config,
            id,
            time,
            revert,
        } => run_sort(&config, id.as_deref(), time.as_deref(), revert),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let conf = Config::load(path)
        .with_context(|| format!("failed to load configuration {}", path.display()))?;
    info!(config = %path.display(), target = %conf.target_dir.display(), "configuration loaded");
    Ok(conf)
}

fn run_ingest(config: &Path) -> Result<()> {
    let conf = load_config(config)?;
    let store = Store::create(&conf)?;
    let opener = DelimitedOpener::new(conf.schema()?);
    let report = Pipeline::new(&conf, &store, &opener)?.run()?;

    println!(
        "ingested {} records into {} buckets ({} rows dropped for a missing key)",
        report.records_written,
        store.num_buckets(),
        report.dropped_missing_key
    );
    for (field, n) in &report.fallbacks {
        println!("{field}: {n} unparseable values stored as 0");
    }
    let failed: Vec<_> = report.failed().collect();
    if !failed.is_empty() {
        for f in &failed {
            eprintln!("{}: {:?}", f.path.display(), f.status);
        }
        bail!("{} of {} source files failed", failed.len(), report.files.len());
    }
    Ok(())
}

fn run_factorize(
    config: &Path,
    prefix: &str,
    pad: Option<usize>,
    seed_empty: bool,
    revert: bool,
) -> Result<()> {
    let conf = load_config(config)?;
    let store = Store::open(&conf.target_dir)?;
    let mut factorizer = Factorizer::new(&store, prefix)?
        .concurrency(conf.factorize_concurrency)
        .io_timeout(conf.io_timeout())
        .seed_empty(seed_empty);
    if let Some(width) = pad {
        factorizer = factorizer.normalize(zero_pad(width));
    }

    if revert {
        let r = factorizer.revert()?;
        println!("restored {} columns and {} sidecars", r.files, r.sidecars);
        return Ok(());
    }

    let report = factorizer.run()?;
    match &report.codes_file {
        Some(path) => println!(
            "factorized {} files ({}) with {} codes -> {}",
            report.files,
            report.fields.join(","),
            report.codes,
            path.display()
        ),
        None => println!("no string columns match {prefix}"),
    }
    Ok(())
}

fn run_sort(config: &Path, id: Option<&str>, time: Option<&str>, revert: bool) -> Result<()> {
    let conf = load_config(config)?;
    let store = Store::open(&conf.target_dir)?;

    if revert {
        let n = sorter::revert(&store)?;
        println!("restored {n} files");
        return Ok(());
    }

    let report = Sorter::new(&store, SortKeys::new(id, time)?)
        .concurrency(conf.sort_concurrency)
        .io_timeout(conf.io_timeout())
        .run();
    println!("sorted {} buckets ({} rows)", report.sorted.len(), report.rows());
    if !report.is_success() {
        for (bucket, reason) in &report.failed {
            eprintln!("bucket {bucket}: {reason}");
        }
        bail!("{} buckets failed to sort", report.failed.len());
    }
    Ok(())
}
