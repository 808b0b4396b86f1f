#![deny(missing_docs)]
//! Examine and produce sstables of a wide-column store.
//!
//! Everything is organised around a uniform fragment stream (partition
//! start, static row, clustering rows and range-tombstone changes, partition
//! end). Operations are consumers over that stream:
//! - The reader driver feeds one sstable's fragments into a consumer with
//!   cooperative pause/skip semantics; the combiner merges several inputs
//!   into one ordered stream.
//! - The dumping consumer renders the stream as text or as a structured
//!   document which the streaming parser turns back into fragments — the
//!   write path's input.
//! - The validator checks stream-ordering invariants at a configurable
//!   strictness, standalone and as the write path's gate.
//!
//! The physical codec sits behind the [`codec`] traits; a JSON-file-backed
//! reference implementation ships in `codec::json_store`.

pub mod codec;
pub mod consumer;
pub mod decompress;
pub mod dump;
pub mod error;
pub mod fragment;
pub mod histogram;
pub mod key;
mod logging;
pub mod merge;
pub mod ops;
pub mod parse;
pub mod reader;
pub mod schema;
pub mod test_support;
mod timefmt;
pub mod validate;
pub mod write;

pub use error::{Error, Result};
