//! locktrace analyzer - post-mortem batch analysis of trace event files.
//!
//! Library surface of the `locktrace` binary: the loader, the analysis
//! passes, symbol resolution, and the report emitters. Everything operates
//! on `&[TraceRecord]` slices in insertion order, so the passes are plain
//! deterministic functions that integration tests drive directly.

pub mod analysis;
pub mod report;
pub mod symbols;
pub mod trace;
