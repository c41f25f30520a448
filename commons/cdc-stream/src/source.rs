use tracing::debug;

use crate::{
    error::StreamError,
    types::{IteratorPosition, RecordPage, Shard, ShardPage},
};

/// The change stream service consumed by the listener.
#[async_trait::async_trait]
pub trait StreamSource: Send + Sync + 'static {
    /// Latest stream attached to `table`, `None` if streaming is disabled.
    async fn latest_stream(
        &self,
        table: &str,
    ) -> Result<Option<String>, StreamError>;

    async fn describe_stream(
        &self,
        stream_id: &str,
        exclusive_start_shard_id: Option<&str>,
        limit: usize,
    ) -> Result<ShardPage, StreamError>;

    async fn shard_iterator(
        &self,
        stream_id: &str,
        shard_id: &str,
        position: &IteratorPosition,
    ) -> Result<String, StreamError>;

    async fn get_records(
        &self,
        iterator: &str,
        limit: usize,
    ) -> Result<RecordPage, StreamError>;
}

/// Lists every shard of `stream_id`, following pagination to the end.
pub async fn list_shards<S>(
    source: &S,
    stream_id: &str,
    page_limit: usize,
) -> Result<Vec<Shard>, StreamError>
where
    S: StreamSource + ?Sized,
{
    let mut shards = Vec::new();
    let mut start: Option<String> = None;
    loop {
        let page = source
            .describe_stream(stream_id, start.as_deref(), page_limit)
            .await?;
        debug!(stream = stream_id, count = page.shards.len(), "found shards");
        shards.extend(page.shards);
        match page.last_evaluated_shard_id {
            Some(last) => start = Some(last),
            None => break,
        }
    }
    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStream;

    #[tokio::test]
    async fn list_shards_follows_every_page() {
        let stream = MemoryStream::new("orders", "stream-1");
        for i in 0..7 {
            stream.add_shard(Shard::new(format!("shard-{i}")));
        }
        let shards = list_shards(&stream, "stream-1", 3).await.unwrap();
        assert_eq!(shards.len(), 7);
        assert_eq!(stream.describe_calls(), 3);
    }

    #[tokio::test]
    async fn list_shards_propagates_failure() {
        let stream = MemoryStream::new("orders", "stream-1");
        stream.add_shard(Shard::new("A"));
        stream.fail_describe("service unavailable");
        let err = list_shards(&stream, "stream-1", 100).await.unwrap_err();
        assert!(!err.is_throttling());
    }
}
