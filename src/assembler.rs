use std::sync::Arc;

use futures::future::try_join_all;

use crate::cache::ChunkKey;
use crate::context::CoreContext;
use crate::error::Result;
use crate::fetcher::ChunkFetcher;
use crate::prefetch::Prefetcher;

/// Turns a byte-range read request into chunk-aligned fetches and stitches
/// the result back together.
pub struct Assembler;

impl Assembler {
    pub async fn read(ctx: &Arc<CoreContext>, filename: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }

        let record = ctx.registry.get(filename)?;
        let resolved = ctx.registry.resolved_url(&record).await?;

        let content_length = ctx.registry.content_length(&record).await;
        if content_length > 0 && offset >= content_length {
            return Ok(Vec::new());
        }

        let chunk_size = ctx.config.chunk_size;
        let aligned_start = offset - offset % chunk_size;
        let end = if content_length > 0 {
            (offset + length).min(content_length)
        } else {
            offset + length
        };
        let client = ctx.client_pool.get_session(&resolved);
        let timeout = ctx.config.fetch_timeout;

        let mut chunk_offset = aligned_start;
        let mut fetches = Vec::new();
        while chunk_offset < end {
            let key = ChunkKey {
                url: resolved.clone(),
                offset: chunk_offset,
            };
            let client = client.clone();
            let resolved = resolved.clone();
            fetches.push(async move {
                ctx.inflight
                    .get_or_fetch(&ctx.cache, key, async move {
                        ChunkFetcher::fetch(&client, &resolved, chunk_offset, chunk_size, timeout)
                            .await
                            .map(|bytes| Arc::from(bytes.as_ref()))
                    })
                    .await
            });
            chunk_offset += chunk_size;
        }

        let chunks = try_join_all(fetches).await?;

        let mut out = Vec::with_capacity(length as usize);
        let head_trim = (offset - aligned_start) as usize;
        for (i, chunk) in chunks.iter().enumerate() {
            let slice: &[u8] = if i == 0 { chunk.get(head_trim..).unwrap_or(&[]) } else { chunk };
            out.extend_from_slice(slice);
            if out.len() as u64 >= length {
                break;
            }
        }
        out.truncate(length as usize);

        let returned_end = offset + out.len() as u64;
        Prefetcher::advise(ctx, resolved, returned_end);

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfigBuilder;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    fn ctx_with(server: &Server, chunk_size: u64, content_length: u64) -> Arc<CoreContext> {
        server.expect(
            Expectation::matching(request::method_path("HEAD", "/f"))
                .times(..)
                .respond_with(status_code(200).insert_header("Content-Length", content_length.to_string())),
        );
        let config = CoreConfigBuilder::new()
            .chunk_size(chunk_size)
            .cache_cap_bytes(chunk_size * 16)
            .build();
        let ctx = CoreContext::new(config);
        ctx.registry
            .register("f".into(), server.url("/f").to_string())
            .unwrap();
        ctx
    }

    #[tokio::test]
    async fn reads_within_a_single_chunk() {
        let server = Server::run();
        let ctx = ctx_with(&server, 16, 16);
        server.expect(
            Expectation::matching(request::headers(contains(("range", "bytes=0-15"))))
                .respond_with(status_code(206).body(vec![9u8; 16])),
        );

        let data = Assembler::read(&ctx, "f", 0, 8).await.unwrap();
        assert_eq!(data, vec![9u8; 8]);
    }

    #[tokio::test]
    async fn reads_spanning_multiple_chunks_are_trimmed_and_concatenated() {
        let server = Server::run();
        let ctx = ctx_with(&server, 8, 16);
        server.expect(
            Expectation::matching(request::headers(contains(("range", "bytes=0-7"))))
                .respond_with(status_code(206).body(vec![1u8; 8])),
        );
        server.expect(
            Expectation::matching(request::headers(contains(("range", "bytes=8-15"))))
                .respond_with(status_code(206).body(vec![2u8; 8])),
        );

        // Read bytes [4, 12): tail of chunk 0, head of chunk 1.
        let data = Assembler::read(&ctx, "f", 4, 8).await.unwrap();
        assert_eq!(data, vec![1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[tokio::test]
    async fn unregistered_filename_surfaces_not_found() {
        let server = Server::run();
        let ctx = CoreContext::new(CoreConfigBuilder::new().build());
        let _ = &server;
        let err = Assembler::read(&ctx, "missing", 0, 4).await.unwrap_err();
        assert!(matches!(err, crate::error::FsError::NotFound(_)));
    }

    #[tokio::test]
    async fn zero_length_read_never_touches_the_network() {
        let server = Server::run();
        let config = CoreConfigBuilder::new().build();
        let ctx = CoreContext::new(config);
        ctx.registry
            .register("f".into(), server.url("/f").to_string())
            .unwrap();
        let data = Assembler::read(&ctx, "f", 0, 0).await.unwrap();
        assert!(data.is_empty());
    }
}
