use std::collections::{HashMap, HashSet};

use crate::types::Shard;

/// Predicate over a shard in the context of the whole graph.
pub trait Condition {
    fn test(&self, graph: &ShardGraph, shard: &Shard) -> bool;
}

impl<F> Condition for F
where
    F: Fn(&ShardGraph, &Shard) -> bool,
{
    fn test(&self, graph: &ShardGraph, shard: &Shard) -> bool {
        self(graph, shard)
    }
}

/// Shard lineage built from a flat shard listing.
///
/// Shards are stored in an arena keyed by id; parent/child relations are
/// derived from `parent_shard_id` on lookup. The graph is rebuilt from
/// scratch on every discovery pass and is never patched in place.
#[derive(Debug, Clone, Default)]
pub struct ShardGraph {
    shards: HashMap<String, Shard>,
}

impl ShardGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_shards<I>(shards: I) -> Self
    where
        I: IntoIterator<Item = Shard>,
    {
        let mut graph = Self::new();
        graph.add_shards(shards);
        graph
    }

    /// Merges shards into the graph, last write wins by id.
    pub fn add_shards<I>(&mut self, shards: I)
    where
        I: IntoIterator<Item = Shard>,
    {
        for shard in shards {
            self.shards.insert(shard.shard_id.clone(), shard);
        }
    }

    #[inline]
    pub fn get(&self, id: &str) -> Option<&Shard> {
        self.shards.get(id)
    }

    #[inline]
    pub fn contains(&self, id: &str) -> bool {
        self.shards.contains_key(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn children(&self, id: &str) -> Vec<&Shard> {
        let mut children: Vec<&Shard> = self
            .shards
            .values()
            .filter(|shard| shard.parent_id() == Some(id))
            .collect();
        children.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        children
    }

    pub fn roots(&self) -> Vec<&Shard> {
        self.find_all(&[&is_root])
    }

    /// Shards satisfying every condition, ordered by id.
    pub fn find_all(&self, conditions: &[&dyn Condition]) -> Vec<&Shard> {
        let mut found: Vec<&Shard> = self
            .shards
            .values()
            .filter(|shard| conditions.iter().all(|c| c.test(self, shard)))
            .collect();
        found.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        found
    }

    /// Depth-first walk, parent before child.
    ///
    /// With an empty `from` the walk starts at [`roots`](Self::roots);
    /// otherwise at the shards accepted by [`starting_from`]. Each shard is
    /// visited at most once, even when a start shard descends from another.
    /// The first error returned by `visit` stops the walk.
    pub fn walk<E, F>(&self, mut visit: F, from: &[&str]) -> Result<(), E>
    where
        F: FnMut(&Shard) -> Result<(), E>,
    {
        let start = if from.is_empty() {
            self.roots()
        } else {
            let condition = starting_from(self, from);
            self.find_all(&[&condition])
        };
        let mut seen = HashSet::new();
        for shard in start {
            self.walk_from(shard, &mut visit, &mut seen)?;
        }
        Ok(())
    }

    fn walk_from<'a, E, F>(
        &'a self,
        shard: &'a Shard,
        visit: &mut F,
        seen: &mut HashSet<&'a str>,
    ) -> Result<(), E>
    where
        F: FnMut(&Shard) -> Result<(), E>,
    {
        if !seen.insert(shard.shard_id.as_str()) {
            return Ok(());
        }
        visit(shard)?;
        for child in self.children(&shard.shard_id) {
            self.walk_from(child, visit, seen)?;
        }
        Ok(())
    }
}

/// A shard is a root when it has no parent or its parent is not in the graph.
pub fn is_root(graph: &ShardGraph, shard: &Shard) -> bool {
    match shard.parent_id() {
        None => true,
        Some(parent) => !graph.contains(parent),
    }
}

/// Condition used to resume a walk part way down a lineage.
///
/// Accepts every shard named in `ids` and rejects the strict ancestors of
/// those shards. Any other shard is accepted when its parent is unknown or
/// is itself one of the rejected ancestors.
pub fn starting_from(
    graph: &ShardGraph,
    ids: &[&str],
) -> impl Condition + use<> {
    let mut ancestors = HashSet::new();
    for id in ids {
        if let Some(parent) = graph.get(id).and_then(Shard::parent_id) {
            collect_ancestors(graph, parent, &mut ancestors);
        }
    }
    let ids: HashSet<String> = ids.iter().map(|id| id.to_string()).collect();

    move |graph: &ShardGraph, shard: &Shard| {
        if ids.contains(&shard.shard_id) {
            return true;
        }
        if ancestors.contains(&shard.shard_id) {
            return false;
        }
        match shard.parent_id() {
            None => true,
            Some(parent) => {
                !graph.contains(parent) || ancestors.contains(parent)
            }
        }
    }
}

fn collect_ancestors(
    graph: &ShardGraph,
    id: &str,
    ancestors: &mut HashSet<String>,
) {
    let mut next = Some(id);
    while let Some(id) = next {
        if !ancestors.insert(id.to_string()) {
            break;
        }
        next = graph.get(id).and_then(Shard::parent_id);
    }
}
