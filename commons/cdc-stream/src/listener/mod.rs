mod consumer;
mod discovery;
mod dispatch;

use std::{
    future::Future,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use tokio::{
    sync::{Notify, OnceCell},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    config::ListenerConfig,
    error::{StreamError, SubscriptionError},
    invoker::Invoker,
    source::StreamSource,
    tracker::ShardTracker,
    types::ChangeRecord,
};

/// Entry point for subscribing to the change stream of a table.
pub struct StreamListener<S> {
    source: Arc<S>,
    config: ListenerConfig,
}

impl<S> StreamListener<S>
where
    S: StreamSource,
{
    pub fn new(source: Arc<S>, config: ListenerConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Resolves the latest stream of `table` and subscribes to it.
    pub async fn subscribe_table<I>(
        &self,
        table: &str,
        invoker: I,
    ) -> Result<Subscriber, SubscriptionError>
    where
        I: Invoker,
    {
        let stream_id = match self.source.latest_stream(table).await {
            Ok(Some(stream_id)) => stream_id,
            Ok(None) | Err(StreamError::StreamNotEnabled(_)) => {
                return Err(SubscriptionError::StreamNotEnabled(
                    table.to_string(),
                ));
            }
            Err(source) => {
                return Err(SubscriptionError::Describe {
                    table: table.to_string(),
                    source,
                });
            }
        };
        info!(table, stream = %stream_id, "subscribing to table stream");
        Ok(self.subscribe(stream_id, invoker))
    }

    /// Starts the discovery and dispatch loops for `stream_id`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<I>(
        &self,
        stream_id: impl Into<String>,
        invoker: I,
    ) -> Subscriber
    where
        I: Invoker,
    {
        let stream_id = stream_id.into();
        let token = CancellationToken::new();
        let (tx, rx) = flume::bounded(self.config.channel_capacity);
        let ctx = Arc::new(SubscriptionContext {
            source: self.source.clone(),
            config: self.config.clone(),
            stream_id: stream_id.clone(),
            token: token.clone(),
            in_progress: Arc::new(ShardTracker::new()),
            completed: Arc::new(ShardTracker::new()),
            work: Notify::new(),
            tx,
        });
        let subscriber = Subscriber {
            stream_id,
            token,
            in_progress: ctx.in_progress.clone(),
            completed: ctx.completed.clone(),
            handle: Mutex::new(None),
            result: OnceCell::new(),
        };
        let handle = tokio::spawn(run(ctx, rx, Arc::new(invoker)));
        subscriber
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        subscriber
    }
}

/// State shared by the discovery loop and every shard task.
pub(crate) struct SubscriptionContext<S> {
    pub(crate) source: Arc<S>,
    pub(crate) config: ListenerConfig,
    pub(crate) stream_id: String,
    pub(crate) token: CancellationToken,
    pub(crate) in_progress: Arc<ShardTracker>,
    pub(crate) completed: Arc<ShardTracker>,
    pub(crate) work: Notify,
    pub(crate) tx: flume::Sender<ChangeRecord>,
}

async fn run<S>(
    ctx: Arc<SubscriptionContext<S>>,
    rx: flume::Receiver<ChangeRecord>,
    invoker: Arc<dyn Invoker>,
) -> Result<(), SubscriptionError>
where
    S: StreamSource,
{
    let first_error = OnceLock::new();
    let discovery =
        fail_fast(&ctx.token, &first_error, ctx.clone().run_discovery());
    let dispatch = fail_fast(
        &ctx.token,
        &first_error,
        dispatch::run_dispatch(
            ctx.token.clone(),
            rx,
            invoker,
            ctx.config.clone(),
        ),
    );
    tokio::join!(discovery, dispatch);
    debug!(stream = %ctx.stream_id, "subscription stopped");
    match first_error.into_inner() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Records the first error of any member and cancels the rest of the group.
async fn fail_fast<F>(
    token: &CancellationToken,
    first_error: &OnceLock<SubscriptionError>,
    fut: F,
) where
    F: Future<Output = Result<(), SubscriptionError>>,
{
    if let Err(err) = fut.await {
        tracing::error!(error = %err, "subscription failed");
        let _ = first_error.set(err);
        token.cancel();
    }
}

/// Handle to a running subscription.
pub struct Subscriber {
    stream_id: String,
    token: CancellationToken,
    in_progress: Arc<ShardTracker>,
    completed: Arc<ShardTracker>,
    handle: Mutex<Option<JoinHandle<Result<(), SubscriptionError>>>>,
    result: OnceCell<Result<(), SubscriptionError>>,
}

impl Subscriber {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Shards currently owned by a consumption task.
    pub fn in_progress_shards(&self) -> Vec<String> {
        self.in_progress.snapshot()
    }

    /// Shards drained within the retention window.
    pub fn completed_shards(&self) -> Vec<String> {
        self.completed.snapshot()
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the subscription was closed or failed.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }

    /// Cancels the subscription and waits for every loop and shard task to
    /// finish. Returns the first fatal error; repeated calls return the
    /// same result.
    pub async fn close(&self) -> Result<(), SubscriptionError> {
        self.token.cancel();
        self.result
            .get_or_init(|| async {
                let handle = self
                    .handle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                match handle {
                    Some(handle) => handle.await.unwrap_or_else(|err| {
                        Err(SubscriptionError::TaskFailed(err.to_string()))
                    }),
                    None => Ok(()),
                }
            })
            .await
            .clone()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
