use std::{future::Future, marker::PhantomData, sync::Arc};

use crate::{error::BoxError, types::ChangeRecord};

/// Receives every flushed batch. A batch can be delivered more than once,
/// so implementations must tolerate redelivery.
#[async_trait::async_trait]
pub trait Invoker: Send + Sync + 'static {
    async fn invoke(&self, records: &[ChangeRecord]) -> Result<(), BoxError>;
}

#[async_trait::async_trait]
impl<T> Invoker for Arc<T>
where
    T: Invoker + ?Sized,
{
    async fn invoke(&self, records: &[ChangeRecord]) -> Result<(), BoxError> {
        (**self).invoke(records).await
    }
}

pub struct InvokeFn<F, Fut> {
    func: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Adapts an async closure taking an owned batch into an [`Invoker`].
pub fn invoke_fn<F, Fut>(func: F) -> InvokeFn<F, Fut>
where
    F: Fn(Vec<ChangeRecord>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    InvokeFn {
        func,
        _fut: PhantomData,
    }
}

#[async_trait::async_trait]
impl<F, Fut> Invoker for InvokeFn<F, Fut>
where
    F: Fn(Vec<ChangeRecord>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn invoke(&self, records: &[ChangeRecord]) -> Result<(), BoxError> {
        (self.func)(records.to_vec()).await
    }
}
