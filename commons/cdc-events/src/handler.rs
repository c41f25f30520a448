use std::{collections::HashMap, future::Future, marker::PhantomData, sync::Arc};

use cdc_stream::BoxError;

use crate::event::{DomainEvent, EventType};

#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: &DomainEvent) -> Result<(), BoxError>;
}

pub struct HandlerFn<F, Fut> {
    func: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Adapts an async closure into an [`EventHandler`].
pub fn handler_fn<F, Fut>(func: F) -> HandlerFn<F, Fut>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    HandlerFn {
        func,
        _fut: PhantomData,
    }
}

#[async_trait::async_trait]
impl<F, Fut> EventHandler for HandlerFn<F, Fut>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn handle(&self, event: &DomainEvent) -> Result<(), BoxError> {
        (self.func)(event.clone()).await
    }
}

type HandlerKey = (String, EventType);

/// Ordered handler lists keyed by `(source, type)`. Append only.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        source: impl Into<String>,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) {
        self.handlers
            .entry((source.into(), event_type))
            .or_default()
            .push(handler);
    }

    /// Handlers for the pair in registration order, empty if none.
    pub fn handlers(
        &self,
        source: &str,
        event_type: EventType,
    ) -> &[Arc<dyn EventHandler>] {
        self.handlers
            .get(&(source.to_string(), event_type))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
