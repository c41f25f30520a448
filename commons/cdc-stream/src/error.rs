use std::{error::Error, sync::Arc};

pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Errors reported by a [`StreamSource`](crate::StreamSource).
#[derive(thiserror::Error, Debug, Clone)]
pub enum StreamError {
    #[error("Rate limit exceeded: {0}")]
    Throttled(String),
    #[error("Shard iterator expired: {0}")]
    ExpiredIterator(String),
    #[error("Resource `{0}` not found")]
    ResourceNotFound(String),
    #[error("No stream specification found for table `{0}`")]
    StreamNotEnabled(String),
    #[error("UnknownError: {0}")]
    Unknown(Arc<dyn Error + Send + Sync + 'static>),
}

impl StreamError {
    pub fn unknown<E>(error: E) -> StreamError
    where
        E: Error + Send + Sync + 'static,
    {
        StreamError::Unknown(Arc::new(error))
    }

    #[inline]
    pub fn is_throttling(&self) -> bool {
        matches!(self, StreamError::Throttled(_))
    }
}

impl From<BoxError> for StreamError {
    fn from(value: BoxError) -> Self {
        StreamError::Unknown(Arc::from(value))
    }
}

/// Terminal error of a subscription.
#[derive(thiserror::Error, Debug, Clone)]
pub enum SubscriptionError {
    #[error(
        "unable to subscribe to table `{0}`: no stream specification found"
    )]
    StreamNotEnabled(String),
    #[error("unable to subscribe to table `{table}`: {source}")]
    Describe { table: String, source: StreamError },
    #[error("unable to describe stream `{stream}`: {source}")]
    Discovery { stream: String, source: StreamError },
    #[error("failed to retrieve iterator for shard `{shard}`: {source}")]
    Iterator { shard: String, source: StreamError },
    #[error("failed to get records from shard `{shard}`: {source}")]
    Records { shard: String, source: StreamError },
    #[error("record channel closed")]
    ChannelClosed,
    #[error("task failed: {0}")]
    TaskFailed(String),
}
