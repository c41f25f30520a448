use std::sync::Arc;

use cdc_dev::{DevConfig, seed_stream};
use cdc_events::{
    DomainEvent, EventProcessor, EventType, ProcessorConfig, handler_fn,
};
use cdc_stream::{BoxError, Envconfig, ListenerConfig, StreamListener};
use tokio::signal;
use tracing::info;

fn main() -> anyhow::Result<()> {
    let cpus = num_cpus::get();
    let worker_threads = std::cmp::max(1, cpus);
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?
        .block_on(start())
}

async fn start() -> anyhow::Result<()> {
    init_log();
    let conf = DevConfig::init_from_env()?;
    let listener_conf = ListenerConfig::init_from_env()?;
    let processor_conf = ProcessorConfig::init_from_env()?;
    info!("use {:?}", listener_conf);

    let mut processor = EventProcessor::new(processor_conf);
    for source in conf.source_list() {
        for event_type in EventType::ALL {
            processor.register_handler(
                source.clone(),
                event_type,
                handler_fn(|event: DomainEvent| async move {
                    info!(%event, "handled");
                    Ok::<(), BoxError>(())
                }),
            );
        }
    }

    let stream = Arc::new(seed_stream(&conf));
    let listener = StreamListener::new(stream, listener_conf);
    let subscriber = listener.subscribe_table(&conf.table, processor).await?;
    info!(stream = subscriber.stream_id(), "subscribed");

    tokio::select! {
        _ = shutdown_signal() => {},
        _ = subscriber.stopped() => {},
    }
    info!("starting a clean up for shutdown");
    subscriber.close().await?;
    info!("done clean up");
    Ok(())
}

fn init_log() {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::{
        EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("CDC_LOG")
                .from_env_lossy(),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Unable to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install signal handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("signal received, starting graceful shutdown");
}
