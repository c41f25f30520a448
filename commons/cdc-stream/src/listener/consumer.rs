use std::{sync::Arc, time::Duration};

use futures_util::{
    FutureExt,
    future::{BoxFuture, try_join_all},
};
use tracing::debug;

use super::{SubscriptionContext, discovery::Claim};
use crate::{
    backoff::Backoff,
    error::{StreamError, SubscriptionError},
    graph::ShardGraph,
    source::StreamSource,
    types::IteratorPosition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShardOutcome {
    Drained,
    Cancelled,
}

impl<S> SubscriptionContext<S>
where
    S: StreamSource,
{
    /// Drains the claimed shard, then claims and drains its children from
    /// `graph` concurrently, recursing down the lineage.
    pub(super) fn consume_lineage(
        self: Arc<Self>,
        graph: Arc<ShardGraph>,
        claim: Claim,
    ) -> BoxFuture<'static, Result<(), SubscriptionError>> {
        async move {
            let shard_id = claim.shard_id().to_string();
            debug!(shard = %shard_id, "shard started");
            match self.drain_shard(&shard_id).await? {
                ShardOutcome::Cancelled => return Ok(()),
                ShardOutcome::Drained => {
                    self.completed.add_all([shard_id.as_str()]);
                    drop(claim);
                    self.work.notify_one();
                    debug!(shard = %shard_id, "shard completed");
                }
            }

            let children: Vec<Claim> = graph
                .children(&shard_id)
                .into_iter()
                .filter(|child| !self.completed.contains(&child.shard_id))
                .filter_map(|child| {
                    Claim::acquire(&self.in_progress, &child.shard_id)
                })
                .collect();
            try_join_all(
                children
                    .into_iter()
                    .map(|child| {
                        self.clone().consume_lineage(graph.clone(), child)
                    }),
            )
            .await?;
            Ok(())
        }
        .boxed()
    }

    async fn drain_shard(
        &self,
        shard_id: &str,
    ) -> Result<ShardOutcome, SubscriptionError> {
        let initial = self.config.iterator_type.position();
        let mut backoff = Backoff::new(
            self.config.backoff_base(),
            self.config.backoff_max_multiplier,
        );
        let mut last_sequence: Option<String> = None;
        let opened =
            self.open_iterator(shard_id, &initial, &mut backoff).await?;
        let Some(mut iterator) = opened else {
            return Ok(ShardOutcome::Cancelled);
        };
        let limit = self.config.records_limit;

        loop {
            let fetched = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    return Ok(ShardOutcome::Cancelled);
                }
                fetched = self.source.get_records(&iterator, limit) => fetched,
            };
            let page = match fetched {
                Ok(page) => {
                    backoff.reset();
                    page
                }
                Err(err) if err.is_throttling() => {
                    let delay = backoff.next_delay();
                    debug!(
                        shard = shard_id,
                        ?delay,
                        "rate limit exceeded, pausing"
                    );
                    if !self.pause(delay).await {
                        return Ok(ShardOutcome::Cancelled);
                    }
                    continue;
                }
                Err(StreamError::ExpiredIterator(_)) => {
                    let position = match &last_sequence {
                        Some(seq) => {
                            IteratorPosition::AfterSequence(seq.clone())
                        }
                        None => initial.clone(),
                    };
                    debug!(
                        shard = shard_id,
                        ?position,
                        "iterator expired, reopening"
                    );
                    let reopened = self
                        .open_iterator(shard_id, &position, &mut backoff)
                        .await?;
                    match reopened {
                        Some(reopened) => iterator = reopened,
                        None => return Ok(ShardOutcome::Cancelled),
                    }
                    continue;
                }
                Err(source) => {
                    return Err(SubscriptionError::Records {
                        shard: shard_id.to_string(),
                        source,
                    });
                }
            };

            let idle = page.records.is_empty();
            for record in page.records {
                let sequence = record.sequence_number.clone();
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => {
                        return Ok(ShardOutcome::Cancelled);
                    }
                    sent = self.tx.send_async(record) => {
                        sent.map_err(|_| SubscriptionError::ChannelClosed)?;
                    }
                }
                last_sequence = Some(sequence);
            }

            match page.next_iterator {
                Some(next) => iterator = next,
                None => return Ok(ShardOutcome::Drained),
            }
            if idle && !self.pause(self.config.idle_delay()).await {
                return Ok(ShardOutcome::Cancelled);
            }
        }
    }

    /// Opens an iterator, waiting out throttling. `None` means cancelled.
    async fn open_iterator(
        &self,
        shard_id: &str,
        position: &IteratorPosition,
        backoff: &mut Backoff,
    ) -> Result<Option<String>, SubscriptionError> {
        loop {
            let opened = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(None),
                opened = self.source.shard_iterator(
                    &self.stream_id,
                    shard_id,
                    position,
                ) => opened,
            };
            match opened {
                Ok(iterator) => {
                    backoff.reset();
                    return Ok(Some(iterator));
                }
                Err(err) if err.is_throttling() => {
                    let delay = backoff.next_delay();
                    debug!(
                        shard = shard_id,
                        ?delay,
                        "rate limit exceeded, pausing"
                    );
                    if !self.pause(delay).await {
                        return Ok(None);
                    }
                }
                Err(source) => {
                    return Err(SubscriptionError::Iterator {
                        shard: shard_id.to_string(),
                        source,
                    });
                }
            }
        }
    }

    /// Sleeps for `delay`; `false` if the subscription was cancelled first.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
