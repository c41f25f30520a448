use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    error::StreamError,
    source::StreamSource,
    types::{ChangeRecord, IteratorPosition, RecordPage, Shard, ShardPage},
};

#[derive(thiserror::Error, Debug)]
#[error("{0}")]
struct InjectedFailure(String);

#[derive(Debug)]
struct MemoryShard {
    shard: Shard,
    records: Vec<ChangeRecord>,
    closed: bool,
}

#[derive(Debug, Default)]
struct State {
    shards: Vec<MemoryShard>,
    failed_shards: HashMap<String, String>,
    describe_failure: Option<String>,
}

impl State {
    fn shard(&self, id: &str) -> Option<&MemoryShard> {
        self.shards.iter().find(|s| s.shard.shard_id == id)
    }

    fn shard_mut(&mut self, id: &str) -> Option<&mut MemoryShard> {
        self.shards.iter_mut().find(|s| s.shard.shard_id == id)
    }
}

/// In-process change stream for a single table.
///
/// Shards keep their records in memory. A closed shard reports the end of
/// data once its last record was read; an open shard keeps handing out
/// iterators. Throttling and failures can be injected for testing.
#[derive(Debug)]
pub struct MemoryStream {
    table: String,
    stream_id: Option<String>,
    state: Mutex<State>,
    throttle: AtomicUsize,
    expire: AtomicUsize,
    describe_calls: AtomicUsize,
    records_calls: AtomicUsize,
}

impl MemoryStream {
    pub fn new(table: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self::build(table.into(), Some(stream_id.into()))
    }

    /// A table without a stream specification.
    pub fn without_stream(table: impl Into<String>) -> Self {
        Self::build(table.into(), None)
    }

    fn build(table: String, stream_id: Option<String>) -> Self {
        Self {
            table,
            stream_id,
            state: Mutex::new(State::default()),
            throttle: AtomicUsize::new(0),
            expire: AtomicUsize::new(0),
            describe_calls: AtomicUsize::new(0),
            records_calls: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn add_shard(&self, shard: Shard) {
        let mut state = self.lock();
        if state.shard(&shard.shard_id).is_none() {
            state.shards.push(MemoryShard {
                shard,
                records: Vec::new(),
                closed: false,
            });
        }
    }

    /// Appends records to an open shard. Returns `false` when the shard is
    /// unknown or already closed.
    pub fn put_records<I>(&self, shard_id: &str, records: I) -> bool
    where
        I: IntoIterator<Item = ChangeRecord>,
    {
        let mut state = self.lock();
        match state.shard_mut(shard_id) {
            Some(shard) if !shard.closed => {
                shard.records.extend(records);
                true
            }
            _ => false,
        }
    }

    pub fn close_shard(&self, shard_id: &str) {
        if let Some(shard) = self.lock().shard_mut(shard_id) {
            shard.closed = true;
        }
    }

    /// Drops a shard from the stream, as retention does for old shards.
    pub fn trim_shard(&self, shard_id: &str) {
        self.lock().shards.retain(|s| s.shard.shard_id != shard_id);
    }

    /// Makes the next `count` calls to `get_records` fail with throttling.
    pub fn throttle_next(&self, count: usize) {
        self.throttle.fetch_add(count, Ordering::SeqCst);
    }

    /// Makes the next `count` calls to `get_records` report an expired
    /// iterator.
    pub fn expire_next(&self, count: usize) {
        self.expire.fetch_add(count, Ordering::SeqCst);
    }

    /// Every read from `shard_id` fails with a non-retryable error.
    pub fn fail_shard(&self, shard_id: &str, message: impl Into<String>) {
        self.lock()
            .failed_shards
            .insert(shard_id.to_string(), message.into());
    }

    pub fn fail_describe(&self, message: impl Into<String>) {
        self.lock().describe_failure = Some(message.into());
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn records_calls(&self) -> usize {
        self.records_calls.load(Ordering::SeqCst)
    }

    fn check_stream(&self, stream_id: &str) -> Result<(), StreamError> {
        match &self.stream_id {
            Some(id) if id == stream_id => Ok(()),
            _ => Err(StreamError::ResourceNotFound(stream_id.to_string())),
        }
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok()
    }
}

fn encode_iterator(shard_id: &str, offset: usize) -> String {
    format!("{shard_id}|{offset}")
}

fn decode_iterator(iterator: &str) -> Option<(&str, usize)> {
    let (shard_id, offset) = iterator.rsplit_once('|')?;
    Some((shard_id, offset.parse().ok()?))
}

#[async_trait::async_trait]
impl StreamSource for MemoryStream {
    async fn latest_stream(
        &self,
        table: &str,
    ) -> Result<Option<String>, StreamError> {
        if table != self.table {
            return Err(StreamError::ResourceNotFound(table.to_string()));
        }
        Ok(self.stream_id.clone())
    }

    async fn describe_stream(
        &self,
        stream_id: &str,
        exclusive_start_shard_id: Option<&str>,
        limit: usize,
    ) -> Result<ShardPage, StreamError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        self.check_stream(stream_id)?;
        let state = self.lock();
        if let Some(message) = &state.describe_failure {
            return Err(StreamError::unknown(InjectedFailure(
                message.clone(),
            )));
        }
        let start = match exclusive_start_shard_id {
            Some(id) => state
                .shards
                .iter()
                .position(|s| s.shard.shard_id == id)
                .map(|i| i + 1)
                .unwrap_or(state.shards.len()),
            None => 0,
        };
        let end = (start + limit.max(1)).min(state.shards.len());
        let shards: Vec<Shard> = state.shards[start..end]
            .iter()
            .map(|s| s.shard.clone())
            .collect();
        let last_evaluated_shard_id = if end < state.shards.len() {
            shards.last().map(|s| s.shard_id.clone())
        } else {
            None
        };
        Ok(ShardPage {
            shards,
            last_evaluated_shard_id,
        })
    }

    async fn shard_iterator(
        &self,
        stream_id: &str,
        shard_id: &str,
        position: &IteratorPosition,
    ) -> Result<String, StreamError> {
        self.check_stream(stream_id)?;
        let state = self.lock();
        if let Some(message) = state.failed_shards.get(shard_id) {
            return Err(StreamError::unknown(InjectedFailure(
                message.clone(),
            )));
        }
        let shard = state
            .shard(shard_id)
            .ok_or_else(|| {
                StreamError::ResourceNotFound(shard_id.to_string())
            })?;
        let find = |seq: &str| {
            shard
                .records
                .iter()
                .position(|r| r.sequence_number == seq)
                .ok_or_else(|| StreamError::ResourceNotFound(seq.to_string()))
        };
        let offset = match position {
            IteratorPosition::TrimHorizon => 0,
            IteratorPosition::Latest => shard.records.len(),
            IteratorPosition::AtSequence(seq) => find(seq)?,
            IteratorPosition::AfterSequence(seq) => find(seq)? + 1,
        };
        Ok(encode_iterator(shard_id, offset))
    }

    async fn get_records(
        &self,
        iterator: &str,
        limit: usize,
    ) -> Result<RecordPage, StreamError> {
        self.records_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_one(&self.throttle) {
            return Err(StreamError::Throttled(iterator.to_string()));
        }
        if Self::take_one(&self.expire) {
            return Err(StreamError::ExpiredIterator(iterator.to_string()));
        }
        let (shard_id, offset) = decode_iterator(iterator)
            .ok_or_else(|| {
                StreamError::ResourceNotFound(iterator.to_string())
            })?;
        let state = self.lock();
        if let Some(message) = state.failed_shards.get(shard_id) {
            return Err(StreamError::unknown(InjectedFailure(
                message.clone(),
            )));
        }
        let shard = state
            .shard(shard_id)
            .ok_or_else(|| {
                StreamError::ResourceNotFound(shard_id.to_string())
            })?;
        let start = offset.min(shard.records.len());
        let end = (start + limit.max(1)).min(shard.records.len());
        let records = shard.records[start..end].to_vec();
        let next_iterator = if shard.closed && end >= shard.records.len() {
            None
        } else {
            Some(encode_iterator(shard_id, end))
        };
        Ok(RecordPage {
            records,
            next_iterator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperationType;

    fn record(seq: &str) -> ChangeRecord {
        ChangeRecord::new(OperationType::Insert, seq).with_key("PK", "orders#1")
    }

    #[tokio::test]
    async fn closed_shard_reports_end_after_last_record() {
        let stream = MemoryStream::new("orders", "s");
        stream.add_shard(Shard::new("A"));
        stream.put_records("A", [record("1"), record("2"), record("3")]);
        stream.close_shard("A");
        assert!(!stream.put_records("A", [record("4")]));

        let it = stream
            .shard_iterator("s", "A", &IteratorPosition::TrimHorizon)
            .await
            .unwrap();
        let page = stream.get_records(&it, 2).await.unwrap();
        assert_eq!(page.records.len(), 2);
        let page = stream
            .get_records(page.next_iterator.as_deref().unwrap(), 2)
            .await
            .unwrap();
        assert_eq!(page.records[0].sequence_number, "3");
        assert!(page.next_iterator.is_none());
    }

    #[tokio::test]
    async fn open_shard_keeps_iterating() {
        let stream = MemoryStream::new("orders", "s");
        stream.add_shard(Shard::new("A"));
        let it = stream
            .shard_iterator("s", "A", &IteratorPosition::Latest)
            .await
            .unwrap();
        let page = stream.get_records(&it, 10).await.unwrap();
        assert!(page.records.is_empty());
        assert!(page.next_iterator.is_some());
    }

    #[tokio::test]
    async fn after_sequence_skips_delivered_record() {
        let stream = MemoryStream::new("orders", "s");
        stream.add_shard(Shard::new("A"));
        stream.put_records("A", [record("1"), record("2")]);
        let it = stream
            .shard_iterator(
                "s",
                "A",
                &IteratorPosition::AfterSequence("1".to_string()),
            )
            .await
            .unwrap();
        let page = stream.get_records(&it, 10).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].sequence_number, "2");
    }

    #[tokio::test]
    async fn injected_throttling_is_consumed() {
        let stream = MemoryStream::new("orders", "s");
        stream.add_shard(Shard::new("A"));
        stream.throttle_next(1);
        let it = encode_iterator("A", 0);
        assert!(stream.get_records(&it, 1).await.unwrap_err().is_throttling());
        assert!(stream.get_records(&it, 1).await.is_ok());
    }
}
