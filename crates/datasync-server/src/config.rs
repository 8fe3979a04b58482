//! Relay configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use datasync_core::RouterConfig;
use datasync_proto::{AGGREGATE_CHANGE_QUEUE, DATA_CHANGE_QUEUE};

use crate::error::Error;
use crate::ingest::IngestConfig;

/// Default AMQP broker URL.
pub const DEFAULT_AMQP_URL: &str = "amqp://127.0.0.1:5672/%2f";

/// Default Redis URL for the shared dimension cache.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default NNG address inbound change events are pushed to.
pub const DEFAULT_LISTEN_ADDRESS: &str = "tcp://0.0.0.0:9100";

/// Default NNG address dimension notifications are published on.
pub const DEFAULT_PUBLISH_ADDRESS: &str = "tcp://0.0.0.0:9101";

/// Default base URL of the catalog service.
pub const DEFAULT_RESOLVER_URL: &str = "http://127.0.0.1:8080";

/// Default address of the health and metrics endpoint.
pub const DEFAULT_OPS_ADDRESS: &str = "0.0.0.0:9180";

/// Default resolver timeout in milliseconds.
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 5_000;

/// Default cache call timeout in milliseconds.
pub const DEFAULT_CACHE_TIMEOUT_MS: u64 = 2_000;

/// Default publish attempt timeout in milliseconds.
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 1_000;

/// Default number of publish attempts.
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;

/// Default ingest channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default maximum inbound message size (1 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default redeliveries of an event whose failure is retryable.
pub const DEFAULT_MAX_REDELIVERIES: u32 = 3;

/// Default base delay between redeliveries in milliseconds.
pub const DEFAULT_REDELIVERY_BACKOFF_MS: u64 = 200;

/// Upper bound on events routed concurrently.
pub const MAX_CONCURRENCY: usize = crate::ingest::MAX_CONCURRENCY;

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get() * 4)
        .unwrap_or(16)
        .max(1)
}

/// Where cached snapshots live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackend {
    /// Shared Redis instance read by the aggregation service.
    Redis,
    /// Embedded sled database under the data path.
    Sled,
    /// Process memory; lost on restart.
    Memory,
}

/// Messaging transport for change events and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Broker {
    /// RabbitMQ queues, consumed with manual acknowledgement.
    Amqp,
    /// NNG PULL for inbound events, NNG PUB for notifications.
    Nng,
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Messaging transport.
    pub broker: Broker,

    /// AMQP broker URL.
    pub amqp_url: String,

    /// AMQP queue change events are consumed from.
    pub inbound_queue: String,

    /// TCP address to receive change events on.
    pub tcp_address: Option<String>,

    /// IPC address to receive change events on.
    pub ipc_address: Option<String>,

    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,

    /// Base URL of the catalog service.
    pub resolver_url: String,

    /// Bound on each resolver lookup.
    pub resolve_timeout: Duration,

    /// Cache backend.
    pub cache_backend: CacheBackend,

    /// Path to the sled cache directory.
    pub data_path: PathBuf,

    /// Redis URL for the shared cache.
    pub redis_url: String,

    /// Pooled Redis connections.
    pub redis_pool_size: u32,

    /// Bound on each cache call.
    pub cache_timeout: Duration,

    /// NNG address the notification PUB socket listens on.
    pub publish_address: String,

    /// Topic dimension notifications are published to.
    pub notification_topic: String,

    /// Topic failed payloads are forwarded to. None disables dead-lettering.
    pub dead_letter_topic: Option<String>,

    /// Bound on each publish attempt.
    pub publish_timeout: Duration,

    /// Publish attempts per notification.
    pub publish_attempts: u32,

    /// Maximum events routed concurrently.
    pub concurrency: usize,

    /// Redeliveries of an event that failed with a retryable error.
    pub max_redeliveries: u32,

    /// Base delay between redeliveries, multiplied by the attempt number.
    pub redelivery_backoff: Duration,

    /// Capacity of the channel between the listener and the router.
    pub channel_capacity: usize,

    /// Address of the health and metrics endpoint. None disables it.
    pub ops_address: Option<String>,
}

impl RelayConfig {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            broker: Broker::Amqp,
            amqp_url: DEFAULT_AMQP_URL.to_string(),
            inbound_queue: DATA_CHANGE_QUEUE.to_string(),
            tcp_address: Some(DEFAULT_LISTEN_ADDRESS.to_string()),
            ipc_address: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            resolver_url: DEFAULT_RESOLVER_URL.to_string(),
            resolve_timeout: Duration::from_millis(DEFAULT_RESOLVE_TIMEOUT_MS),
            cache_backend: CacheBackend::Redis,
            data_path: data_path.into(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            redis_pool_size: datasync_core::cache::DEFAULT_POOL_SIZE,
            cache_timeout: Duration::from_millis(DEFAULT_CACHE_TIMEOUT_MS),
            publish_address: DEFAULT_PUBLISH_ADDRESS.to_string(),
            notification_topic: AGGREGATE_CHANGE_QUEUE.to_string(),
            dead_letter_topic: None,
            publish_timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
            publish_attempts: DEFAULT_PUBLISH_ATTEMPTS,
            concurrency: default_concurrency(),
            max_redeliveries: DEFAULT_MAX_REDELIVERIES,
            redelivery_backoff: Duration::from_millis(DEFAULT_REDELIVERY_BACKOFF_MS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            ops_address: Some(DEFAULT_OPS_ADDRESS.to_string()),
        }
    }

    pub fn with_broker(mut self, broker: Broker) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_amqp_url(mut self, url: impl Into<String>) -> Self {
        self.amqp_url = url.into();
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    pub fn with_tcp_address(mut self, address: impl Into<String>) -> Self {
        self.tcp_address = Some(address.into());
        self
    }

    pub fn without_tcp(mut self) -> Self {
        self.tcp_address = None;
        self
    }

    pub fn with_ipc_address(mut self, address: impl Into<String>) -> Self {
        self.ipc_address = Some(address.into());
        self
    }

    pub fn with_resolver_url(mut self, url: impl Into<String>) -> Self {
        self.resolver_url = url.into();
        self
    }

    pub fn with_cache_backend(mut self, backend: CacheBackend) -> Self {
        self.cache_backend = backend;
        self
    }

    pub fn with_publish_address(mut self, address: impl Into<String>) -> Self {
        self.publish_address = address.into();
        self
    }

    pub fn with_dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_redeliveries(mut self, redeliveries: u32) -> Self {
        self.max_redeliveries = redeliveries;
        self
    }

    pub fn without_ops(mut self) -> Self {
        self.ops_address = None;
        self
    }

    /// Check if at least one inbound transport is configured.
    pub fn has_transport(&self) -> bool {
        self.tcp_address.is_some() || self.ipc_address.is_some()
    }

    /// Router settings derived from this configuration.
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig::new()
            .with_notification_topic(self.notification_topic.clone())
            .with_resolve_timeout(self.resolve_timeout)
            .with_cache_timeout(self.cache_timeout)
            .with_publish_timeout(self.publish_timeout)
            .with_publish_attempts(self.publish_attempts)
    }

    /// Ingest settings derived from this configuration.
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig::new()
            .with_channel_capacity(self.channel_capacity)
            .with_concurrency(self.concurrency)
            .with_max_redeliveries(self.max_redeliveries)
            .with_redelivery_backoff(self.redelivery_backoff)
    }

    /// Reject configurations the relay cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        match self.broker {
            Broker::Nng if !self.has_transport() => {
                return Err(Error::Config(
                    "no inbound transport configured (need TCP or IPC address)".to_string(),
                ));
            }
            Broker::Nng => {}
            Broker::Amqp => {
                if !(self.amqp_url.starts_with("amqp://") || self.amqp_url.starts_with("amqps://"))
                {
                    return Err(Error::Config(format!(
                        "amqp url must be amqp(s): {}",
                        self.amqp_url
                    )));
                }
                if self.inbound_queue.is_empty() {
                    return Err(Error::Config("inbound queue cannot be empty".to_string()));
                }
                if self.inbound_queue == self.notification_topic {
                    return Err(Error::Config(
                        "inbound queue must differ from the notification topic".to_string(),
                    ));
                }
            }
        }
        if self.cache_backend == CacheBackend::Redis
            && !(self.redis_url.starts_with("redis://") || self.redis_url.starts_with("rediss://"))
        {
            return Err(Error::Config(format!(
                "redis url must be redis(s): {}",
                self.redis_url
            )));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(Error::Config(format!(
                "concurrency must be between 1 and {}",
                MAX_CONCURRENCY
            )));
        }
        if !(self.resolver_url.starts_with("http://") || self.resolver_url.starts_with("https://"))
        {
            return Err(Error::Config(format!(
                "resolver url must be http(s): {}",
                self.resolver_url
            )));
        }
        if self.notification_topic.is_empty() {
            return Err(Error::Config(
                "notification topic cannot be empty".to_string(),
            ));
        }
        if self.dead_letter_topic.as_deref() == Some(self.notification_topic.as_str()) {
            return Err(Error::Config(
                "dead-letter topic must differ from the notification topic".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config(
                "channel capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new("./data")
    }
}

/// Command-line arguments for the relay.
#[derive(Parser, Debug)]
#[command(name = "datasync-server")]
#[command(version, about = "Catalog change relay into the dimension cache", long_about = None)]
pub struct Args {
    /// Messaging transport for change events and notifications.
    #[arg(long, value_enum, default_value_t = Broker::Amqp)]
    pub broker: Broker,

    /// AMQP broker URL.
    #[arg(long, default_value = DEFAULT_AMQP_URL)]
    pub amqp_url: String,

    /// AMQP queue to consume change events from.
    #[arg(long, default_value = DATA_CHANGE_QUEUE)]
    pub inbound_queue: String,

    /// NNG TCP address to receive change events on.
    #[arg(long, default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen: String,

    /// IPC address to receive change events on (optional).
    #[arg(long)]
    pub ipc: Option<String>,

    /// Disable the TCP listener (requires --ipc to be set).
    #[arg(long)]
    pub no_tcp: bool,

    /// Maximum inbound message size in kilobytes.
    #[arg(long, default_value_t = 1024)]
    pub max_message_kb: usize,

    /// Base URL of the catalog service.
    #[arg(long, default_value = DEFAULT_RESOLVER_URL)]
    pub resolver_url: String,

    /// Resolver timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RESOLVE_TIMEOUT_MS)]
    pub resolve_timeout_ms: u64,

    /// Cache backend.
    #[arg(long, value_enum, default_value_t = CacheBackend::Redis)]
    pub cache: CacheBackend,

    /// Redis URL for the shared cache.
    #[arg(long, default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    /// Pooled Redis connections.
    #[arg(long, default_value_t = datasync_core::cache::DEFAULT_POOL_SIZE)]
    pub redis_pool_size: u32,

    /// Path to the sled cache directory.
    #[arg(short, long, default_value = "./data")]
    pub data_path: PathBuf,

    /// Cache call timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_TIMEOUT_MS)]
    pub cache_timeout_ms: u64,

    /// NNG address to publish dimension notifications on.
    #[arg(long, default_value = DEFAULT_PUBLISH_ADDRESS)]
    pub publish: String,

    /// Topic for dimension notifications.
    #[arg(long, default_value = AGGREGATE_CHANGE_QUEUE)]
    pub topic: String,

    /// Topic for payloads that failed to route (optional).
    #[arg(long)]
    pub dead_letter_topic: Option<String>,

    /// Publish attempt timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_PUBLISH_TIMEOUT_MS)]
    pub publish_timeout_ms: u64,

    /// Publish attempts per notification.
    #[arg(long, default_value_t = DEFAULT_PUBLISH_ATTEMPTS)]
    pub publish_attempts: u32,

    /// Maximum events routed concurrently (0 = auto).
    #[arg(long, default_value_t = 0)]
    pub concurrency: usize,

    /// Redeliveries of an event that failed with a retryable error.
    #[arg(long, default_value_t = DEFAULT_MAX_REDELIVERIES)]
    pub max_redeliveries: u32,

    /// Base delay between redeliveries in milliseconds.
    #[arg(long, default_value_t = DEFAULT_REDELIVERY_BACKOFF_MS)]
    pub redelivery_backoff_ms: u64,

    /// Capacity of the ingest channel.
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// Address for the /health and /metrics endpoint.
    #[arg(long, default_value = DEFAULT_OPS_ADDRESS)]
    pub ops_listen: String,

    /// Disable the /health and /metrics endpoint.
    #[arg(long)]
    pub no_ops: bool,
}

impl Args {
    /// Convert command-line arguments to relay configuration.
    pub fn into_config(self) -> RelayConfig {
        let tcp_address = if self.no_tcp { None } else { Some(self.listen) };
        let ops_address = if self.no_ops { None } else { Some(self.ops_listen) };
        let concurrency = if self.concurrency == 0 {
            default_concurrency()
        } else {
            self.concurrency
        };

        RelayConfig {
            broker: self.broker,
            amqp_url: self.amqp_url,
            inbound_queue: self.inbound_queue,
            tcp_address,
            ipc_address: self.ipc,
            max_message_size: self.max_message_kb * 1024,
            resolver_url: self.resolver_url,
            resolve_timeout: Duration::from_millis(self.resolve_timeout_ms),
            cache_backend: self.cache,
            data_path: self.data_path,
            redis_url: self.redis_url,
            redis_pool_size: self.redis_pool_size,
            cache_timeout: Duration::from_millis(self.cache_timeout_ms),
            publish_address: self.publish,
            notification_topic: self.topic,
            dead_letter_topic: self.dead_letter_topic,
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
            publish_attempts: self.publish_attempts.max(1),
            concurrency,
            max_redeliveries: self.max_redeliveries,
            redelivery_backoff: Duration::from_millis(self.redelivery_backoff_ms),
            channel_capacity: self.channel_capacity,
            ops_address,
        }
    }
}
