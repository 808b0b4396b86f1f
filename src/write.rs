//! The write pipeline: structured input through the parser, gated by the
//! validator, into the codec writer.

use std::path::PathBuf;
use std::sync::Arc;

use log::Level;
use tokio::io::BufReader;

use crate::codec::SstableCodec;
use crate::error::{Error, Result};
use crate::logging::sst_log;
use crate::parse::MutationStreamParser;
use crate::schema::Schema;
use crate::validate::{StreamValidator, ValidationLevel, Verdict};

/// Options of the write operation.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// The structured dump to consume.
    pub input_file: PathBuf,
    /// Where the component set is placed.
    pub output_dir: PathBuf,
    /// Generation of the produced sstable.
    pub generation: i64,
    /// Strictness of the validation gate.
    pub validation_level: ValidationLevel,
}

fn report(verdict: &Verdict, errors: &mut u64) {
    for error in &verdict.errors {
        sst_log!(Level::Error, "invalid input stream: {error}");
        *errors += 1;
    }
}

/// Parse `input_file`, validate the fragment stream at the configured level
/// and feed it into a freshly created sstable. Any parse or validation
/// failure cancels the writer, which removes everything it materialised.
pub async fn write_sstable(
    schema: Arc<Schema>,
    codec: &dyn SstableCodec,
    options: &WriteOptions,
) -> Result<()> {
    let input = tokio::fs::File::open(&options.input_file)
        .await
        .map_err(|e| Error::io(&options.input_file, e))?;
    let mut parser = MutationStreamParser::spawn(schema.clone(), BufReader::new(input));
    let mut validator = StreamValidator::new(schema.clone(), options.validation_level);
    let mut sink = codec
        .create_sink(schema, &options.output_dir, options.generation)
        .await?;
    let mut errors = 0u64;
    loop {
        let fragment = match parser.next().await {
            Ok(Some(fragment)) => fragment,
            Ok(None) => break,
            Err(e) => {
                sink.cancel().await?;
                return Err(e);
            }
        };
        let verdict = validator.check(&fragment);
        report(&verdict, &mut errors);
        if errors > 0 {
            sink.cancel().await?;
            return Err(Error::Semantic(errors));
        }
        if let Err(e) = sink.put(fragment).await {
            sink.cancel().await?;
            return Err(e);
        }
    }
    let verdict = validator.finish();
    report(&verdict, &mut errors);
    if errors > 0 {
        sink.cancel().await?;
        return Err(Error::Semantic(errors));
    }
    sink.finish().await
}
