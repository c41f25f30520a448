use std::sync::Arc;

use tokio::{
    task::{JoinError, JoinSet},
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::debug;

use super::SubscriptionContext;
use crate::{
    error::SubscriptionError,
    graph::ShardGraph,
    source::{StreamSource, list_shards},
    tracker::ShardTracker,
    types::Shard,
};

type ShardTasks = JoinSet<Result<(), SubscriptionError>>;

/// Graph of the shards that still need consuming. Completed shards are left
/// out, so their children surface as roots.
pub(crate) fn build_graph(
    shards: Vec<Shard>,
    completed: &ShardTracker,
) -> ShardGraph {
    ShardGraph::from_shards(
        shards
            .into_iter()
            .filter(|shard| !completed.contains(&shard.shard_id)),
    )
}

fn flatten(
    joined: Result<Result<(), SubscriptionError>, JoinError>,
) -> Result<(), SubscriptionError> {
    joined.unwrap_or_else(|err| {
        Err(SubscriptionError::TaskFailed(err.to_string()))
    })
}

impl<S> SubscriptionContext<S>
where
    S: StreamSource,
{
    pub(super) async fn run_discovery(
        self: Arc<Self>,
    ) -> Result<(), SubscriptionError> {
        let mut tasks = ShardTasks::new();
        let result = self.clone().discover(&mut tasks).await;
        if result.is_err() {
            self.token.cancel();
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = flatten(joined) {
                debug!(error = %err, "shard task stopped during shutdown");
            }
        }
        result
    }

    async fn discover(
        self: Arc<Self>,
        tasks: &mut ShardTasks,
    ) -> Result<(), SubscriptionError> {
        let scan_interval = self.config.scan_interval();
        let mut scan =
            interval_at(Instant::now() + scan_interval, scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let expire_interval = self.config.expire_interval();
        let mut expire =
            interval_at(Instant::now() + expire_interval, expire_interval);
        expire.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            debug!(stream = %self.stream_id, "scanning for shards");
            let listed = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(()),
                listed = list_shards(
                    self.source.as_ref(),
                    &self.stream_id,
                    self.config.shard_page_limit,
                ) => listed,
            };
            let shards = listed.map_err(|source| SubscriptionError::Discovery {
                stream: self.stream_id.clone(),
                source,
            })?;

            let graph = Arc::new(build_graph(shards, &self.completed));
            let roots: Vec<String> =
                graph.roots().into_iter().map(|s| s.shard_id.clone()).collect();
            for shard_id in roots {
                let Some(claim) = Claim::acquire(&self.in_progress, &shard_id)
                else {
                    continue;
                };
                tasks.spawn(self.clone().consume_lineage(graph.clone(), claim));
                self.work.notify_one();
            }

            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(()),
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    flatten(joined)?;
                }
                _ = self.work.notified() => {}
                _ = expire.tick() => {
                    let retention = self.config.completed_retention();
                    let n = self.completed.expire(retention);
                    debug!(count = n, "expired completed shards");
                }
                _ = scan.tick() => {}
            }
        }
    }
}

/// Exclusive ownership of a shard, released when dropped.
pub(super) struct Claim {
    tracker: Arc<ShardTracker>,
    shard_id: String,
}

impl Claim {
    pub(super) fn acquire(
        tracker: &Arc<ShardTracker>,
        shard_id: &str,
    ) -> Option<Claim> {
        tracker.try_claim(shard_id).then(|| Claim {
            tracker: tracker.clone(),
            shard_id: shard_id.to_string(),
        })
    }

    pub(super) fn shard_id(&self) -> &str {
        &self.shard_id
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.tracker.remove(&self.shard_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lineage() -> Vec<Shard> {
        vec![
            Shard::new("A"),
            Shard::with_parent("A1", "A"),
            Shard::with_parent("A1A", "A1"),
            Shard::new("B"),
        ]
    }

    fn root_ids(graph: &ShardGraph) -> Vec<&str> {
        graph.roots().into_iter().map(|s| s.shard_id.as_str()).collect()
    }

    #[test]
    fn completed_parent_exposes_child_as_root() {
        let completed = ShardTracker::new();
        let graph = build_graph(lineage(), &completed);
        assert_eq!(root_ids(&graph), vec!["A", "B"]);

        let in_progress = Arc::new(ShardTracker::new());
        let claim = Claim::acquire(&in_progress, "A").unwrap();
        assert!(Claim::acquire(&in_progress, "A").is_none());
        completed.add_all([claim.shard_id()]);
        drop(claim);
        assert!(!in_progress.contains("A"));

        let graph = build_graph(lineage(), &completed);
        assert!(!graph.contains("A"));
        assert_eq!(root_ids(&graph), vec!["A1", "B"]);
    }

    #[test]
    fn completed_shards_are_never_root_candidates() {
        let completed = ShardTracker::new();
        completed.add_all(["A", "A1", "B"]);
        let graph = build_graph(lineage(), &completed);
        assert_eq!(root_ids(&graph), vec!["A1A"]);
    }
}
