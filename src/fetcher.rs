use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::try_join_all;

use crate::error::{FsError, Result};

/// Performs range-request fetches against a single origin.
pub struct ChunkFetcher;

impl ChunkFetcher {
    /// Issues `GET` with `Range: bytes=<offset>-<offset+chunk_size-1>`.
    /// Accepts status 200 or 206; anything else, a transport error, or a
    /// timeout is a `FsError::Fetch`. A short body is not an error here —
    /// the caller decides whether it is a legitimate end-of-file.
    pub async fn fetch(
        client: &reqwest::Client,
        url: &str,
        offset: u64,
        chunk_size: u64,
        timeout: Duration,
    ) -> Result<Bytes> {
        let range = format!("bytes={}-{}", offset, offset + chunk_size.saturating_sub(1));
        let request = client.get(url).header(reqwest::header::RANGE, range).send();

        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| FsError::fetch(&Arc::from(url), offset, "request timed out"))?
            .map_err(|e| FsError::fetch(&Arc::from(url), offset, e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::PARTIAL_CONTENT {
            return Err(FsError::fetch(
                &Arc::from(url),
                offset,
                format!("unexpected status {status}"),
            ));
        }

        let body = tokio::time::timeout(timeout, response.bytes())
            .await
            .map_err(|_| FsError::fetch(&Arc::from(url), offset, "body read timed out"))?
            .map_err(|e| FsError::fetch(&Arc::from(url), offset, e.to_string()))?;

        Ok(body)
    }

    /// Fetches `offsets` concurrently, preserving their order in the result.
    /// Fails the whole batch on the first error, carrying its offset.
    pub async fn fetch_many(
        client: &reqwest::Client,
        url: &str,
        offsets: &[u64],
        chunk_size: u64,
        timeout: Duration,
    ) -> Result<Vec<Bytes>> {
        let futures = offsets.iter().map(|&offset| {
            let client = client.clone();
            async move { Self::fetch(&client, url, offset, chunk_size, timeout).await }
        });
        try_join_all(futures).await
    }
}
