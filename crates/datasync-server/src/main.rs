//! Datasync relay - catalog change queue to dimension cache.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use datasync_core::{
    new_shared_registry, CacheStore, ChangeRouter, MemoryCache, NotificationPublisher, RedisCache,
    SledCache,
};
use datasync_server::{
    create_listener, create_router, start_processor, AmqpListener, AmqpPublisher, Args, Broker,
    CacheBackend, DeadLetter, HttpResolver, IngestHandle, InboundListener, NngPublisher, OpsState,
    RelayConfig,
};

/// Inbound side of the configured broker.
enum Listener {
    Amqp(AmqpListener),
    Nng(InboundListener),
}

impl Listener {
    async fn open(config: &RelayConfig, handle: IngestHandle) -> anyhow::Result<Self> {
        let listener = match config.broker {
            Broker::Amqp => Listener::Amqp(
                AmqpListener::connect(
                    &config.amqp_url,
                    &config.inbound_queue,
                    config.concurrency,
                    handle,
                )
                .await?,
            ),
            Broker::Nng => Listener::Nng(create_listener(config, handle)?),
        };
        Ok(listener)
    }

    async fn run_until_shutdown(
        self,
        shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<(), datasync_server::Error> {
        match self {
            Listener::Amqp(listener) => listener.run_until_shutdown(shutdown).await,
            Listener::Nng(listener) => listener.run_until_shutdown(shutdown).await,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "datasync_server=info,datasync_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting datasync relay");

    // Parse command-line arguments
    let args = Args::parse();
    let config = args.into_config();
    config.validate()?;

    tracing::info!(
        broker = ?config.broker,
        inbound_queue = %config.inbound_queue,
        tcp_address = ?config.tcp_address,
        ipc_address = ?config.ipc_address,
        resolver_url = %config.resolver_url,
        cache = ?config.cache_backend,
        publish_address = %config.publish_address,
        topic = %config.notification_topic,
        dead_letter_topic = ?config.dead_letter_topic,
        concurrency = config.concurrency,
        max_redeliveries = config.max_redeliveries,
        "configuration loaded"
    );

    // Open the cache
    let mut sled_cache = None;
    let cache: Arc<dyn CacheStore> = match config.cache_backend {
        CacheBackend::Redis => {
            let store = RedisCache::connect(
                &config.redis_url,
                config.redis_pool_size,
                config.cache_timeout,
            )
            .await
            .with_context(|| format!("failed to connect to redis at {}", config.redis_url))?;
            tracing::info!(url = %store.url(), "redis cache connected");
            Arc::new(store)
        }
        CacheBackend::Sled => {
            let store = Arc::new(SledCache::open(&config.data_path).with_context(|| {
                format!("failed to open cache at {}", config.data_path.display())
            })?);
            tracing::info!(path = %config.data_path.display(), "sled cache opened");
            sled_cache = Some(store.clone());
            store
        }
        CacheBackend::Memory => {
            tracing::warn!("using in-memory cache, contents are lost on restart");
            Arc::new(MemoryCache::new())
        }
    };

    let resolver = Arc::new(HttpResolver::new(&config.resolver_url, config.resolve_timeout)?);
    let publisher: Arc<dyn NotificationPublisher> = match config.broker {
        Broker::Amqp => {
            let mut topics = vec![config.notification_topic.as_str()];
            topics.extend(config.dead_letter_topic.as_deref());
            Arc::new(AmqpPublisher::connect(&config.amqp_url, &topics).await?)
        }
        Broker::Nng => Arc::new(NngPublisher::listen(&config.publish_address)?),
    };

    let metrics = new_shared_registry();
    let router = Arc::new(ChangeRouter::with_metrics(
        resolver,
        cache,
        publisher.clone(),
        config.router_config(),
        metrics.clone(),
    ));

    let dead_letter = config
        .dead_letter_topic
        .as_ref()
        .map(|topic| DeadLetter::new(publisher.clone(), topic.clone()));
    let (handle, processor) = start_processor(router, config.ingest_config(), dead_letter);

    let listener = Listener::open(&config, handle).await?;

    // Set up graceful shutdown. Every receiver exists before the signal
    // task can fire.
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let mut ops_shutdown = shutdown_tx.subscribe();

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(());
    });

    // Health and metrics endpoint
    let ops = match &config.ops_address {
        Some(address) => {
            let tcp = tokio::net::TcpListener::bind(address)
                .await
                .with_context(|| format!("failed to bind ops endpoint on {}", address))?;
            tracing::info!(address = %address, "ops endpoint listening");

            let app = create_router(OpsState::new(metrics.clone()));
            Some(tokio::spawn(async move {
                let served = axum::serve(tcp, app)
                    .with_graceful_shutdown(async move {
                        let _ = ops_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "ops endpoint error");
                }
            }))
        }
        None => None,
    };

    // Run the listener; returning drops the last ingest handle.
    tracing::info!("relay ready");
    if let Err(e) = listener.run_until_shutdown(shutdown_rx).await {
        tracing::error!(error = %e, "transport error");
        return Err(e.into());
    }

    processor.await.context("ingest processor panicked")?;
    if let Some(ops) = ops {
        let _ = ops.await;
    }
    if let Some(store) = sled_cache {
        store.flush().await?;
    }

    tracing::info!(
        received = metrics.received(),
        applied = metrics.applied(),
        ignored = metrics.ignored_kinds(),
        failed = metrics.failed(),
        publish_failures = metrics.publish_failures(),
        redeliveries = metrics.redeliveries(),
        dead_lettered = metrics.dead_lettered(),
        "relay shutdown complete"
    );

    Ok(())
}
