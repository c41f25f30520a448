//! Subscription engine for partitioned change streams.
//!
//! A [`StreamListener`] periodically lists the shards of a stream, follows
//! their parent/child lineage, drains every shard once and forwards the
//! change records in batches to an [`Invoker`]. Delivery is at-least-once;
//! ordering holds only within one shard lineage.

pub mod backoff;
pub mod config;
pub mod error;
pub mod graph;
pub mod invoker;
mod listener;
pub mod memory;
pub mod source;
pub mod tracker;
pub mod types;

pub use backoff::Backoff;
pub use config::ListenerConfig;
pub use envconfig::Envconfig;
pub use error::{BoxError, StreamError, SubscriptionError};
pub use graph::ShardGraph;
pub use invoker::{Invoker, invoke_fn};
pub use listener::{StreamListener, Subscriber};
pub use memory::MemoryStream;
pub use source::{StreamSource, list_shards};
pub use tracker::ShardTracker;
pub use types::*;
