//! Dump output: the streaming JSON emitter, the data-component dumping
//! consumer, and the metadata-component projections.

mod data;
mod json;
mod metadata;

pub use data::{DumpingConsumer, OutputFormat, PartitionStreamWriter};
pub use json::JsonWriter;
pub use metadata::{
    dump_compression_info, dump_index, dump_scylla_metadata, dump_statistics, dump_summary,
};

use crate::error::Error;

/// Attach the output sink to a raw I/O error.
pub(crate) fn output_error(e: std::io::Error) -> Error {
    Error::Io {
        path: "<output>".into(),
        source: e,
    }
}
