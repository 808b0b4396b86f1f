//! The decompression driver: streams the data component through the codec's
//! decompressor into a sibling file.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use log::Level;
use tokio::io::AsyncWriteExt;

use crate::codec::Sstable;
use crate::error::{Error, Result};
use crate::logging::sst_log;

/// Decompress each compressed input into `<original>.decompressed`.
/// Uncompressed inputs are skipped. The output must not already exist; any
/// error unlinks it.
pub async fn decompress_sstables(sstables: &[Arc<dyn Sstable>]) -> Result<()> {
    for sst in sstables {
        if !sst.is_compressed() {
            sst_log!(
                Level::Info,
                "sstable {} is not compressed, nothing to do",
                sst.path().display()
            );
            continue;
        }
        let output: PathBuf = {
            let mut name = sst.path().as_os_str().to_os_string();
            name.push(".decompressed");
            name.into()
        };
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&output)
            .await
            .map_err(|e| Error::io(&output, e))?;
        let result = copy_stream(sst.as_ref(), &mut file, &output).await;
        if let Err(e) = result {
            drop(file);
            let _ = tokio::fs::remove_file(&output).await;
            return Err(e);
        }
        sst_log!(
            Level::Info,
            "sstable {} decompressed into {}",
            sst.path().display(),
            output.display()
        );
    }
    Ok(())
}

async fn copy_stream(
    sst: &dyn Sstable,
    file: &mut tokio::fs::File,
    output: &PathBuf,
) -> Result<()> {
    let mut chunks = sst.data_stream().await?;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| Error::io(sst.path(), e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::io(output, e))?;
    }
    file.flush().await.map_err(|e| Error::io(output, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use async_trait::async_trait;
    use futures_util::stream;

    use crate::codec::{
        CompressionInfo, DataStream, IndexEntry, ScyllaMetadata, SstableVersion, Statistics,
        Summary,
    };
    use crate::reader::FragmentReader;
    use crate::schema::Schema;

    /// A codec handle yielding fixed chunks through its "decompressor".
    struct ChunkedSstable {
        path: PathBuf,
        compression: Option<CompressionInfo>,
        chunks: Vec<Vec<u8>>,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl Sstable for ChunkedSstable {
        fn path(&self) -> &Path {
            &self.path
        }

        fn version(&self) -> SstableVersion {
            SstableVersion::Me
        }

        async fn fragment_reader(&self, _schema: Arc<Schema>) -> Result<Box<dyn FragmentReader>> {
            unimplemented!("not used by the decompression driver")
        }

        async fn read_index(&self) -> Result<Vec<IndexEntry>> {
            unimplemented!("not used by the decompression driver")
        }

        fn summary(&self) -> Option<&Summary> {
            None
        }

        fn statistics(&self) -> Option<&Statistics> {
            None
        }

        fn compression_info(&self) -> Option<&CompressionInfo> {
            self.compression.as_ref()
        }

        fn scylla_metadata(&self) -> Option<&ScyllaMetadata> {
            None
        }

        async fn data_stream(&self) -> Result<DataStream> {
            let fail_after = self.fail_after;
            let chunks: Vec<std::io::Result<Vec<u8>>> = self
                .chunks
                .iter()
                .cloned()
                .map(Ok)
                .enumerate()
                .map(|(i, chunk)| {
                    if fail_after == Some(i) {
                        Err(std::io::Error::other("decompressor failed"))
                    } else {
                        chunk
                    }
                })
                .collect();
            Ok(Box::pin(stream::iter(chunks)))
        }

        async fn validate_checksums(&self) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn compressed_inputs_stream_into_a_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("me-1-big-Data.json");
        let sst: Arc<dyn Sstable> = Arc::new(ChunkedSstable {
            path: path.clone(),
            compression: Some(CompressionInfo::default()),
            chunks: vec![b"hello ".to_vec(), b"world".to_vec()],
            fail_after: None,
        });
        decompress_sstables(&[sst]).await.unwrap();
        let out = std::fs::read(dir.path().join("me-1-big-Data.json.decompressed")).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn uncompressed_inputs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("me-1-big-Data.json");
        let sst: Arc<dyn Sstable> = Arc::new(ChunkedSstable {
            path: path.clone(),
            compression: None,
            chunks: vec![b"x".to_vec()],
            fail_after: None,
        });
        decompress_sstables(&[sst]).await.unwrap();
        assert!(!dir.path().join("me-1-big-Data.json.decompressed").exists());
    }

    #[tokio::test]
    async fn existing_output_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("me-1-big-Data.json");
        std::fs::write(dir.path().join("me-1-big-Data.json.decompressed"), b"old").unwrap();
        let sst: Arc<dyn Sstable> = Arc::new(ChunkedSstable {
            path,
            compression: Some(CompressionInfo::default()),
            chunks: vec![],
            fail_after: None,
        });
        assert!(decompress_sstables(&[sst]).await.is_err());
        // The pre-existing file is left untouched.
        let out = std::fs::read(dir.path().join("me-1-big-Data.json.decompressed")).unwrap();
        assert_eq!(out, b"old");
    }

    #[tokio::test]
    async fn stream_errors_unlink_the_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("me-1-big-Data.json");
        let sst: Arc<dyn Sstable> = Arc::new(ChunkedSstable {
            path,
            compression: Some(CompressionInfo::default()),
            chunks: vec![b"partial".to_vec(), b"never".to_vec()],
            fail_after: Some(1),
        });
        assert!(decompress_sstables(&[sst]).await.is_err());
        assert!(!dir.path().join("me-1-big-Data.json.decompressed").exists());
    }
}
