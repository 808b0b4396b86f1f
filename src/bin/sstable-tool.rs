//! A multifunctional command-line tool to examine the content of sstables.
//!
//! Operations write their payload to stdout (or files); logs go to stderr.
//! The sstables to examine are positional arguments; to interpret them a
//! schema is required, either from a schema file or from the built-in
//! system-table registry.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use sstable_tool::codec::JsonStoreCodec;
use sstable_tool::dump::OutputFormat;
use sstable_tool::histogram::Bucket;
use sstable_tool::ops;
use sstable_tool::schema::{load_schema_file, load_system_schema, Schema};
use sstable_tool::validate::ValidationLevel;
use sstable_tool::write::WriteOptions;
use sstable_tool::Error;

#[derive(Parser, Debug)]
#[command(
    name = "sstable-tool",
    version,
    about = "Examine or produce sstables of a wide-column store",
    long_about = "Contains various operations to examine or produce sstables.\n\
                  Operations write their output to stdout or to files; logs are\n\
                  written to stderr. Always pass the path to the data component\n\
                  of the sstables, even when examining another component."
)]
struct Cli {
    #[command(flatten)]
    schema: SchemaArgs,
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// File containing the schema description.
    #[arg(long, global = true, default_value = "schema.json")]
    schema_file: PathBuf,
    /// Use a built-in system-table schema, in `keyspace.table` notation.
    #[arg(long, global = true)]
    system_schema: Option<String>,
}

#[derive(Args, Debug, Default)]
struct StreamArgs {
    /// Merge all sstables into a single fragment stream.
    #[arg(long)]
    merge: bool,
    /// Don't use native skips when a partition is rejected; slower but works
    /// with a corrupt index.
    #[arg(long)]
    no_skips: bool,
    /// Partition(s) to filter for, in hex format. Repeatable.
    #[arg(long = "partition")]
    partitions: Vec<String>,
    /// File of whitespace-separated hex partition keys to filter for.
    #[arg(long)]
    partitions_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Operation {
    /// Dump the content of the data component.
    DumpData {
        #[command(flatten)]
        stream: StreamArgs,
        /// The output format, one of (text, json).
        #[arg(long, default_value = "json")]
        output_format: String,
        /// Sstable data components to process.
        sstables: Vec<PathBuf>,
    },
    /// Dump the partition index.
    DumpIndex {
        /// Sstable data components to process.
        sstables: Vec<PathBuf>,
    },
    /// Dump the compression-info component.
    DumpCompressionInfo {
        /// Sstable data components to process.
        sstables: Vec<PathBuf>,
    },
    /// Dump the summary component.
    DumpSummary {
        /// Sstable data components to process.
        sstables: Vec<PathBuf>,
    },
    /// Dump the statistics component.
    DumpStatistics {
        /// Sstable data components to process.
        sstables: Vec<PathBuf>,
    },
    /// Dump the scylla-metadata component.
    DumpScyllaMetadata {
        /// Sstable data components to process.
        sstables: Vec<PathBuf>,
    },
    /// Build a histogram of all write timestamps.
    WritetimeHistogram {
        /// The unit of time to use as bucket, one of (years, months, weeks,
        /// days, hours).
        #[arg(long, default_value = "months")]
        bucket: String,
        /// Sstable data components to process.
        sstables: Vec<PathBuf>,
    },
    /// Validate the fragment-stream ordering invariants.
    Validate {
        /// Merge all sstables into a single fragment stream.
        #[arg(long)]
        merge: bool,
        /// Sstable data components to process.
        sstables: Vec<PathBuf>,
    },
    /// Validate the checksums of the data component.
    ValidateChecksums {
        /// Sstable data components to process.
        sstables: Vec<PathBuf>,
    },
    /// Decompress the data component next to each input.
    Decompress {
        /// Sstable data components to process.
        sstables: Vec<PathBuf>,
    },
    /// Write an sstable from a structured dump.
    Write {
        /// The file containing the input.
        #[arg(long)]
        input_file: PathBuf,
        /// Directory to place the output files in.
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
        /// Generation of the generated sstable.
        #[arg(long)]
        generation: i64,
        /// Degree of validation on the output, one of (partition_region,
        /// token, partition_key, clustering_key).
        #[arg(long, default_value = "clustering_key")]
        validation_level: String,
    },
}

async fn load_schema(args: &SchemaArgs) -> Result<Arc<Schema>, Error> {
    let schema = match &args.system_schema {
        Some(name) => load_system_schema(name)?,
        None => load_schema_file(&args.schema_file).await?,
    };
    Ok(Arc::new(schema))
}

async fn run(cli: Cli) -> Result<(), Error> {
    let schema = load_schema(&cli.schema).await?;
    let codec = JsonStoreCodec;
    let stdout = std::io::stdout();
    match cli.operation {
        Operation::DumpData {
            stream,
            output_format,
            sstables,
        } => {
            let format: OutputFormat = output_format.parse().map_err(Error::Usage)?;
            let options = ops::ReadOptions {
                merge: stream.merge,
                no_skips: stream.no_skips,
                partitions: stream.partitions,
                partitions_file: stream.partitions_file,
            };
            let sstables = ops::load_sstables(&codec, &sstables).await?;
            ops::dump_data(schema, &codec, &sstables, &options, format, stdout).await
        }
        Operation::DumpIndex { sstables } => {
            let sstables = ops::load_sstables(&codec, &sstables).await?;
            ops::dump_index(schema, &sstables, stdout).await
        }
        Operation::DumpCompressionInfo { sstables } => {
            let sstables = ops::load_sstables(&codec, &sstables).await?;
            ops::dump_compression_info(&sstables, stdout).await
        }
        Operation::DumpSummary { sstables } => {
            let sstables = ops::load_sstables(&codec, &sstables).await?;
            ops::dump_summary(schema, &sstables, stdout).await
        }
        Operation::DumpStatistics { sstables } => {
            let sstables = ops::load_sstables(&codec, &sstables).await?;
            ops::dump_statistics(&sstables, stdout).await
        }
        Operation::DumpScyllaMetadata { sstables } => {
            let sstables = ops::load_sstables(&codec, &sstables).await?;
            ops::dump_scylla_metadata(&sstables, stdout).await
        }
        Operation::WritetimeHistogram { bucket, sstables } => {
            let bucket: Bucket = bucket.parse().map_err(Error::Usage)?;
            let sstables = ops::load_sstables(&codec, &sstables).await?;
            ops::writetime_histogram(schema, &codec, &sstables, bucket, ".".as_ref()).await
        }
        Operation::Validate { merge, sstables } => {
            let sstables = ops::load_sstables(&codec, &sstables).await?;
            ops::validate(schema, &codec, &sstables, merge).await.map(|_| ())
        }
        Operation::ValidateChecksums { sstables } => {
            let sstables = ops::load_sstables(&codec, &sstables).await?;
            ops::validate_checksums(&sstables, stdout).await
        }
        Operation::Decompress { sstables } => {
            let sstables = ops::load_sstables(&codec, &sstables).await?;
            ops::decompress(&sstables).await
        }
        Operation::Write {
            input_file,
            output_dir,
            generation,
            validation_level,
        } => {
            let validation_level: ValidationLevel =
                validation_level.parse().map_err(Error::Usage)?;
            let options = WriteOptions {
                input_file,
                output_dir,
                generation,
                validation_level,
            };
            ops::write(schema, &codec, &[], &options).await
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
