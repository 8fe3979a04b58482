//! Inbound transport.
//!
//! Change events arrive on an NNG PULL socket over TCP and/or IPC. A
//! dedicated receiver thread hands each message to the ingest channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nng::options::{Options, RecvMaxSize, RecvTimeout};
use nng::{Protocol, Socket};

use crate::config::RelayConfig;
use crate::error::Error;
use crate::ingest::IngestHandle;

/// How often the receiver thread wakes up to check for shutdown.
const RECV_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Counters for the inbound socket.
#[derive(Debug)]
pub struct ListenerStats {
    messages: AtomicU64,
    bytes: AtomicU64,
    receive_errors: AtomicU64,
    started_at: Instant,
}

impl ListenerStats {
    fn new() -> Self {
        Self {
            messages: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    fn record_message(&self, bytes: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn receive_errors(&self) -> u64 {
        self.receive_errors.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Listener feeding inbound change events to the ingest processor.
pub struct InboundListener {
    socket: Socket,
    handle: IngestHandle,
    stats: Arc<ListenerStats>,
}

impl InboundListener {
    pub fn new(config: &RelayConfig, handle: IngestHandle) -> Result<Self, Error> {
        let socket = Socket::new(Protocol::Pull0)
            .map_err(|e| Error::Transport(format!("failed to create socket: {}", e)))?;

        socket
            .set_opt::<RecvMaxSize>(config.max_message_size)
            .map_err(|e| Error::Transport(format!("failed to set max message size: {}", e)))?;
        socket
            .set_opt::<RecvTimeout>(Some(RECV_POLL_INTERVAL))
            .map_err(|e| Error::Transport(format!("failed to set receive timeout: {}", e)))?;

        for address in config.tcp_address.iter().chain(config.ipc_address.iter()) {
            socket
                .listen(address)
                .map_err(|e| Error::Transport(format!("failed to listen on {}: {}", address, e)))?;

            tracing::info!(address = %address, "listening for change events");
        }

        Ok(Self {
            socket,
            handle,
            stats: Arc::new(ListenerStats::new()),
        })
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        self.stats.clone()
    }

    /// Receive until `shutdown` fires, then stop the receiver thread.
    ///
    /// Consumes the listener so its ingest handle is released on return.
    pub async fn run_until_shutdown(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let receiver = self.spawn_receiver(stop_flag.clone())?;

        tracing::info!("transport ready, accepting change events");

        let _ = shutdown.recv().await;
        tracing::info!(
            messages = self.stats.messages(),
            bytes = self.stats.bytes(),
            receive_errors = self.stats.receive_errors(),
            uptime_secs = self.stats.uptime().as_secs(),
            "shutdown signal received, stopping transport"
        );

        stop_flag.store(true, Ordering::SeqCst);
        let _ = tokio::task::spawn_blocking(move || receiver.join()).await;
        self.socket.close();

        Ok(())
    }

    fn spawn_receiver(&self, stop_flag: Arc<AtomicBool>) -> Result<thread::JoinHandle<()>, Error> {
        let socket = self.socket.clone();
        let handle = self.handle.clone();
        let stats = self.stats.clone();

        thread::Builder::new()
            .name("datasync-receiver".to_string())
            .spawn(move || loop {
                if stop_flag.load(Ordering::SeqCst) {
                    tracing::info!("receiver stopping");
                    return;
                }

                match socket.recv() {
                    Ok(message) => {
                        stats.record_message(message.len());
                        if handle.blocking_send(message.as_slice().to_vec()).is_err() {
                            tracing::warn!("ingest channel closed, receiver stopping");
                            return;
                        }
                    }
                    Err(nng::Error::TimedOut) => continue,
                    Err(nng::Error::Closed) => return,
                    Err(e) => {
                        stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(error = %e, "receive error");
                    }
                }
            })
            .map_err(|e| Error::Transport(format!("failed to spawn receiver: {}", e)))
    }
}

/// Create a listener on the configured inbound addresses.
pub fn create_listener(
    config: &RelayConfig,
    handle: IngestHandle,
) -> Result<InboundListener, Error> {
    if !config.has_transport() {
        return Err(Error::Config(
            "no inbound transport configured (need TCP or IPC address)".to_string(),
        ));
    }

    InboundListener::new(config, handle)
}
