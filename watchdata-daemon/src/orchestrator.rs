//! Daemon assembly and lifecycle management.
//!
//! The [`Orchestrator`] wires the storage backend, the log stream and the
//! HTTP/WebSocket server together, then runs them until a shutdown signal.
//!
//! # Startup Order
//!
//! 1. PID file
//! 2. Log stream (schema, fan-out worker, change poller)
//! 3. HTTP server (accepts producers and subscribers)
//!
//! # Shutdown Order
//!
//! 1. HTTP server (stop accepting, close WebSocket connections)
//! 2. Log stream (cancel poller and fan-out worker)
//! 3. PID file removal

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use watchdata_core::config::WatchdataConfig;
use watchdata_core::pipeline::Pipeline;
use watchdata_log_stream::{
    ClickHouseStore, FanOutHub, LogStore, LogStream, LogStreamBuilder, MemoryStore, StreamConfig,
};

use crate::health::DaemonHealth;
use crate::metrics_server;
use crate::server::{self, AppState};

/// The main daemon orchestrator, generic over the storage backend.
pub struct Orchestrator<S: LogStore> {
    /// Loaded and validated configuration.
    config: WatchdataConfig,
    /// Log stream shared with the health endpoint.
    stream: Arc<Mutex<LogStream<S>>>,
    /// Handler state for the HTTP server.
    state: AppState<S>,
    /// Cancelled once on shutdown; observed by the server and background tasks.
    shutdown: CancellationToken,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl<S: LogStore> Orchestrator<S> {
    /// Build from an already-loaded configuration and storage backend.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration validation fails
    /// - The metrics recorder cannot be installed
    /// - The log stream rejects its configuration
    pub fn build_from_config(config: WatchdataConfig, store: Arc<S>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let stream_config = StreamConfig::from_core(&config);
        let subscriber_buffer = stream_config.subscriber_buffer;
        let hub = Arc::new(FanOutHub::new());
        let stream = LogStreamBuilder::new()
            .config(stream_config)
            .store(store)
            .hub(Arc::clone(&hub))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build log stream: {}", e))?;

        tracing::info!(
            backend = %config.storage.backend,
            delivery_mode = ?stream.delivery_mode(),
            "orchestrator initialized"
        );

        let start_time = Instant::now();
        let shutdown = CancellationToken::new();
        let state = AppState {
            intake: stream.intake(),
            writer: stream.writer(),
            hub,
            stream: Arc::new(Mutex::new(stream)),
            subscriber_buffer,
            start_time,
            shutdown: shutdown.clone(),
        };

        if config.metrics.enabled {
            record_daemon_metrics();
        }

        Ok(Self {
            config,
            stream: Arc::clone(&state.stream),
            state,
            shutdown,
            start_time,
        })
    }

    /// Bind the configured address and run until SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<()> {
        let addr = format!(
            "{}:{}",
            self.config.server.listen_addr, self.config.server.port
        );
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;

        self.run_with_listener(listener, async {
            match wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(signal = signal, "shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
            }
        })
        .await
    }

    /// Run on an already-bound listener until `shutdown_trigger` completes.
    ///
    /// Also returns early, after cleanup, if the HTTP server exits on its own.
    pub async fn run_with_listener(
        &mut self,
        listener: TcpListener,
        shutdown_trigger: impl Future<Output = ()> + Send,
    ) -> Result<()> {
        let pid_path = (!self.config.general.pid_file.is_empty())
            .then(|| self.config.general.pid_file.clone());
        if let Some(path) = &pid_path {
            write_pid_file(Path::new(path))?;
        }

        tracing::info!("starting log stream");
        if let Err(e) = self.stream.lock().await.start().await {
            tracing::error!(error = %e, "log stream failed to start");
            if let Some(path) = &pid_path {
                remove_pid_file(Path::new(path));
            }
            return Err(e.into());
        }

        let mut server_task = tokio::spawn(server::serve(
            listener,
            self.state.clone(),
            self.config.server.max_body_bytes,
        ));

        let uptime_task = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.shutdown.clone()));

        tracing::info!("entering main event loop");
        let server_result = tokio::select! {
            _ = shutdown_trigger => None,
            res = &mut server_task => Some(res),
        };

        tracing::info!("shutting down");
        self.shutdown.cancel();

        let server_result = match server_result {
            Some(res) => res,
            None => server_task.await,
        };
        let server_result = match server_result {
            Ok(res) => res,
            Err(e) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
        };

        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        let stop_result = self.stream.lock().await.stop().await;

        if let Some(path) = &pid_path {
            remove_pid_file(Path::new(path));
        }

        server_result?;
        stop_result.map_err(Into::into)
    }

    /// Get the current aggregated health status.
    pub async fn health(&self) -> DaemonHealth {
        server::health_report(&self.state).await
    }

    /// Token that stops the daemon when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &WatchdataConfig {
        &self.config
    }
}

/// Pick the storage backend named in the configuration and run the daemon.
pub async fn run_daemon(config: WatchdataConfig) -> Result<()> {
    match config.storage.backend.as_str() {
        "memory" => {
            tracing::warn!(
                retention_days = config.storage.retention_days,
                "using in-memory storage; records are lost on restart"
            );
            let store = Arc::new(MemoryStore::with_retention_days(
                config.storage.retention_days,
            ));
            Orchestrator::build_from_config(config, store)?.run().await
        }
        "clickhouse" => {
            let store = Arc::new(
                ClickHouseStore::new(&config.storage)
                    .map_err(|e| anyhow::anyhow!("failed to create ClickHouse client: {}", e))?,
            );
            Orchestrator::build_from_config(config, store)?.run().await
        }
        other => Err(anyhow::anyhow!("unknown storage backend '{}'", other)),
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - `create_new(true)` fails if the file exists, so two daemons cannot share it
/// - The created file must be a regular file (symlinks are rejected)
/// - Parent directory is created with mode 0o700, the file with 0o600
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .mode(0o700)
                .recursive(true)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    let pid = std::process::id();
    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Failure is logged, not returned.
pub fn remove_pid_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "PID file removed"),
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        ),
    }
}

fn record_daemon_metrics() {
    use watchdata_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}

/// Refresh the uptime gauge every 10 seconds until shutdown.
fn spawn_uptime_updater(
    start_time: Instant,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    use watchdata_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
