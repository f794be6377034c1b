use std::{io::IoSliceMut, time::Duration};

use futures::StreamExt;
use getset::Getters;
use reqwest::{header, Response};
use tokio::sync::OnceCell;

use crate::{
    Deadline, Metadata, RegistryFileSystem, RegistryFsError, RegistryFsResult, FETCH_ATTEMPTS,
    FETCH_RETRY_BACKOFF,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A read-only, random-access handle to one registry blob.
///
/// The handle borrows its filesystem; the filesystem outlives every file
/// opened from it. The blob's total size is discovered lazily by the first
/// [`RegistryFile::size`] or read and cached on the handle.
#[derive(Getters)]
pub struct RegistryFile<'fs> {
    // Deliberately excludes `fs` (no `Debug` impl) and `size` (interior state)
    // from the manual `Debug` impl below; see that impl for what is printed.
    /// The blob URL this handle reads from.
    #[getset(get = "pub with_prefix")]
    url: String,

    fs: &'fs RegistryFileSystem,

    timeout: Option<Duration>,

    size: OnceCell<u64>,
}

impl std::fmt::Debug for RegistryFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryFile")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("size", &self.size.get())
            .finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<'fs> RegistryFile<'fs> {
    pub(crate) fn new(url: String, fs: &'fs RegistryFileSystem, timeout: Option<Duration>) -> Self {
        Self {
            url,
            fs,
            timeout,
            size: OnceCell::new(),
        }
    }

    /// Returns the filesystem this file was opened from.
    pub fn filesystem(&self) -> &RegistryFileSystem {
        self.fs
    }

    /// Returns the blob's total size, discovering it on first use.
    pub async fn size(&self) -> RegistryFsResult<u64> {
        self.size.get_or_try_init(|| self.fetch_size()).await.copied()
    }

    /// Returns the blob's metadata.
    pub async fn metadata(&self) -> RegistryFsResult<Metadata> {
        Ok(Metadata::regular_readonly(self.size().await?))
    }

    /// Reads into `buf` starting at `offset`.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> RegistryFsResult<usize> {
        self.read_vectored_at(&mut [IoSliceMut::new(buf)], offset)
            .await
    }

    /// Reads into a scatter list starting at `offset`.
    ///
    /// The requested byte count is clipped to `[0, size - offset]`; reads at
    /// or past the end of the blob return 0 without touching the network.
    /// Short reads are returned as-is, the caller re-issues for the
    /// remainder.
    pub async fn read_vectored_at(
        &self,
        bufs: &mut [IoSliceMut<'_>],
        offset: u64,
    ) -> RegistryFsResult<usize> {
        let size = self.size().await?;
        let wanted: u64 = bufs.iter().map(|buf| buf.len() as u64).sum();
        let count = wanted.min(size.saturating_sub(offset));
        if count == 0 {
            return Ok(0);
        }

        let deadline = Deadline::new(self.timeout);
        let mut attempts = FETCH_ATTEMPTS;
        let response = loop {
            attempts -= 1;
            tracing::debug!(url = %self.url, offset, count, "pulling blob range from registry");
            match self.fs.get_data(&self.url, offset, count, deadline).await {
                Ok(response) => break response,
                Err(error) => {
                    if deadline.is_expired() {
                        return Err(RegistryFsError::Timeout(self.url.clone()));
                    }
                    if attempts == 0 {
                        return Err(exhausted(&self.url, error));
                    }
                    tracing::warn!(url = %self.url, offset, %error, "blob fetch failed, retrying");
                    tokio::time::sleep(FETCH_RETRY_BACKOFF).await;
                }
            }
        };

        read_into_bufs(response, bufs, count).await
    }

    /// Discovers the blob's total size with a one-byte probe read.
    async fn fetch_size(&self) -> RegistryFsResult<u64> {
        let deadline = Deadline::new(self.timeout);
        let mut attempts = FETCH_ATTEMPTS;
        loop {
            attempts -= 1;
            match self.fs.get_data(&self.url, 0, 1, deadline).await {
                Ok(response) => {
                    return resource_size(&response).ok_or_else(|| {
                        RegistryFsError::NotFound(format!(
                            "server did not report a size for {}",
                            self.url
                        ))
                    });
                }
                Err(error) => {
                    if deadline.is_expired() {
                        return Err(RegistryFsError::Timeout(self.url.clone()));
                    }
                    if attempts == 0 {
                        return Err(exhausted(&self.url, error));
                    }
                    tracing::warn!(url = %self.url, %error, "size probe failed, retrying");
                    tokio::time::sleep(FETCH_RETRY_BACKOFF).await;
                }
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Maps the last error of an exhausted retry loop to its surface kind.
///
/// Denied auth and spent deadlines keep their kind; everything else surfaces
/// as a missing blob.
fn exhausted(url: &str, error: RegistryFsError) -> RegistryFsError {
    match error {
        error @ (RegistryFsError::AuthDenied(_) | RegistryFsError::Timeout(_)) => error,
        other => RegistryFsError::NotFound(format!("{url}: {other}")),
    }
}

/// The total resource size declared by a ranged response.
///
/// The `Content-Range` total (`bytes 0-0/<total>`) wins; servers that ignore
/// `Range` answer 200 with the whole body, where `Content-Length` is the
/// size.
fn resource_size(response: &Response) -> Option<u64> {
    if let Some(value) = response.headers().get(header::CONTENT_RANGE) {
        return content_range_total(value.to_str().ok()?);
    }
    response.content_length()
}

/// Parses the total component of a `Content-Range` value.
fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Streams the response body into the scatter list, stopping after `count`
/// bytes or when the list is full, whichever comes first.
async fn read_into_bufs(
    response: Response,
    bufs: &mut [IoSliceMut<'_>],
    count: u64,
) -> RegistryFsResult<usize> {
    let mut filled = 0u64;
    let mut buf_index = 0usize;
    let mut buf_offset = 0usize;
    let mut stream = response.bytes_stream();

    'body: while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let mut chunk = &chunk[..];
        while !chunk.is_empty() {
            if filled == count || buf_index == bufs.len() {
                break 'body;
            }
            let buf = &mut bufs[buf_index][buf_offset..];
            if buf.is_empty() {
                buf_index += 1;
                buf_offset = 0;
                continue;
            }
            let n = buf.len().min(chunk.len()).min((count - filled) as usize);
            buf[..n].copy_from_slice(&chunk[..n]);
            chunk = &chunk[n..];
            buf_offset += n;
            filled += n as u64;
        }
    }

    Ok(filled as usize)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range_total() {
        assert_eq!(content_range_total("bytes 0-0/10"), Some(10));
        assert_eq!(content_range_total("bytes 5-9/4096"), Some(4096));
        assert_eq!(content_range_total("bytes */1234"), Some(1234));
        assert_eq!(content_range_total("bytes 0-0/*"), None);
        assert_eq!(content_range_total("10"), None);
    }
}
