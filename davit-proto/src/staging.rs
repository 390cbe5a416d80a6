use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::stream::{StreamExt, TryStreamExt};
use http_body_util::BodyStream;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::codec::HttpBody;
use crate::error::DavError;
use crate::node::Content;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// A request body spooled to the staging directory.
///
/// The spool file is removed when the value is dropped, whatever the exit
/// path of the handler was: success, error, or connection loss.
pub struct StagedBody {
    path: PathBuf,
    len: u64,
}

impl StagedBody {
    pub async fn spool(dir: &Path, body: HttpBody) -> Result<Self, DavError> {
        tokio::fs::create_dir_all(dir).await?;
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("davit-put-{}-{}.tmp", std::process::id(), seq));

        // the guard exists before the first write so that a failed or
        // cancelled spool still removes the partial file
        let mut staged = Self { path, len: 0 };

        let stream = BodyStream::new(body)
            .map_ok(|frame| frame.into_data().unwrap_or_default())
            .boxed();
        let mut reader = StreamReader::new(stream);
        let mut file = tokio::fs::File::create(&staged.path).await?;
        staged.len = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        Ok(staged)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the spooled bytes as a content stream.
    pub async fn stream(&self) -> Result<Content, DavError> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(ReaderStream::new(file).boxed())
    }
}

impl Drop for StagedBody {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(err=?e, path=?self.path, "unable to remove staging file");
            }
        }
    }
}
