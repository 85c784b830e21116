//! Common types shared between the locktrace interposer and analyzer.
//!
//! The interposer writes fixed-layout [`record::TraceRecord`]s into a
//! memory-mapped file and a JSON [`sidecar::Sidecar`] at exit; the analyzer
//! maps the record file read-only and casts it back. Both sides must agree on
//! the exact byte layout, so the `#[repr(C)]` definitions live here and
//! nowhere else.

pub mod hash;
pub mod record;
pub mod sidecar;

pub use hash::{call_stack_hash, murmur64a};
pub use record::*;
pub use sidecar::*;
