use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::ListenerConfig, error::SubscriptionError, invoker::Invoker,
    types::ChangeRecord,
};

/// Collects records from the shard tasks and hands them to the invoker,
/// either once `batch_size` records are buffered or on every poll tick.
pub(super) async fn run_dispatch(
    token: CancellationToken,
    rx: flume::Receiver<ChangeRecord>,
    invoker: Arc<dyn Invoker>,
    config: ListenerConfig,
) -> Result<(), SubscriptionError> {
    let poll_interval = config.poll_interval();
    let mut ticker =
        interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let batch_size = config.batch_size.max(1);
    let retry = config.invoke_retry();
    let mut records: Vec<ChangeRecord> = Vec::with_capacity(batch_size);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            received = rx.recv_async() => {
                let record =
                    received.map_err(|_| SubscriptionError::ChannelClosed)?;
                records.push(record);
                if records.len() >= batch_size
                    && !flush(&token, invoker.as_ref(), &mut records, retry)
                        .await
                {
                    return Ok(());
                }
            }
            _ = ticker.tick() => {
                if !flush(&token, invoker.as_ref(), &mut records, retry).await {
                    return Ok(());
                }
            }
        }
    }
}

/// Delivers the pending batch, retrying the same batch until it succeeds.
/// Returns `false` if the subscription was cancelled first.
async fn flush(
    token: &CancellationToken,
    invoker: &dyn Invoker,
    records: &mut Vec<ChangeRecord>,
    retry: Duration,
) -> bool {
    if records.is_empty() {
        return true;
    }
    loop {
        let invoked = tokio::select! {
            biased;
            _ = token.cancelled() => return false,
            invoked = invoker.invoke(records) => invoked,
        };
        match invoked {
            Ok(()) => {
                debug!(count = records.len(), "batch delivered");
                records.clear();
                return true;
            }
            Err(err) => {
                warn!(
                    error = %err,
                    delay = ?retry,
                    "callback failed, will retry"
                );
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return false,
                    _ = tokio::time::sleep(retry) => {}
                }
            }
        }
    }
}
