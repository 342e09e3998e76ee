//! # Ingest - Source Files to Buckets
//!
//! Streams rows out of source files, converts them to the schema's types
//! and routes every row to the bucket its key hashes to.
//!
//! ```text
//! SourceOpener ──> ChunkSource ──chunks──> FieldPlan::convert ──Records──> harvester
//!                                                                            |
//!                                                  partition::bucket_of ─────┤
//!                                                                            v
//!                                                              store::Bucket::append
//! ```
//!
//! | Module       | Purpose                                                  |
//! |--------------|----------------------------------------------------------|
//! | [`source`]   | chunk source traits, in-memory and delimited-text sources |
//! | [`convert`]  | per-field conversion rules, missing-key handling          |
//! | `pipeline`   | threads, backpressure, shutdown ordering                  |
//! | `report`     | per-file and per-run outcome                              |

pub mod convert;
mod pipeline;
mod report;
pub mod source;

pub use convert::{ChunkStats, FieldPlan};
pub use pipeline::{Pipeline, RECORD_CHANNEL_CAP};
pub use report::{FileReport, FileStatus, IngestReport};
pub use source::{
    Chunk, ChunkSource, DelimitedOpener, DelimitedSource, MemoryOpener, MemorySource,
    SourceColumn, SourceData, SourceField, SourceOpener,
};

#[cfg(test)]
mod tests;
