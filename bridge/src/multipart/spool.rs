use super::BinaryPart;
use crate::errors::BridgeFault;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Content of unknown length buffered in an anonymous temp file.
///
/// The file has no name on disk and disappears when the value is dropped.
#[derive(Debug)]
pub struct SpooledContent {
    file: File,
    length: u64,
}

impl SpooledContent {
    /// Copies the stream to a temp file and rewinds it.
    pub async fn spool<S>(stream: S) -> Result<Self, BridgeFault>
    where
        S: Stream<Item = Result<Bytes, BridgeFault>>,
    {
        let file = tokio::task::spawn_blocking(tempfile::tempfile)
            .await
            .map_err(|e| spool_fault(e.to_string()))?
            .map_err(io_fault)?;
        let mut file = File::from_std(file);
        let mut length = 0u64;

        futures::pin_mut!(stream);
        while let Some(chunk) = stream.try_next().await? {
            file.write_all(&chunk).await.map_err(io_fault)?;
            length += chunk.len() as u64;
        }
        file.flush().await.map_err(io_fault)?;
        file.seek(SeekFrom::Start(0)).await.map_err(io_fault)?;

        tracing::debug!(length, "Spooled content to temp file");
        Ok(Self { file, length })
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Turns the buffered content into an upload part of exactly its length.
    pub fn into_binary_part(self, name: impl Into<String>, content_type: impl Into<String>) -> BinaryPart {
        BinaryPart::new(name, content_type, self.length, reqwest::Body::from(self.file))
    }
}

fn io_fault(err: std::io::Error) -> BridgeFault {
    spool_fault(err.to_string())
}

fn spool_fault(message: String) -> BridgeFault {
    BridgeFault::Network {
        target: "spool".to_string(),
        message,
    }
}
