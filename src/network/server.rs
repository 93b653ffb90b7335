//! BlueRPC Server
//!
//! Owns the listening socket, advertises the service, and serves one
//! client connection at a time. Two scheduling models are offered:
//! [`Server::start`] runs the accept loop on a background task until
//! [`Server::stop`], and [`Server::serve_once`] handles a single
//! request/response cycle on the caller's task.

use bytes::Bytes;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::connection::{log_client_error, Connection};
use super::{Listener, ServerConfig, Transport};
use crate::discovery::{Advertiser, NoopAdvertiser, ServiceRecord};
use crate::protocol::Reply;
use crate::registry::{EndpointRegistry, Handler, RegistryError};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// BlueRPC Server
pub struct Server<T: Transport> {
    /// Server configuration
    config: ServerConfig,
    /// Listening-socket provider
    transport: T,
    /// Local transport address, queried once at construction
    local_address: String,
    /// Registered endpoints, shared read-only with the accept loop
    registry: Arc<EndpointRegistry>,
    /// Service advertisement
    advertiser: Box<dyn Advertiser>,
    /// Currently advertised record
    advertised: Option<ServiceRecord>,
    /// Cached listening socket while no accept loop owns it
    listener: Option<T::Listener>,
    /// Port the listening socket is bound to
    bound_port: Option<u16>,
    /// Whether the accept loop should keep running
    running: Arc<AtomicBool>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Background accept loop, hands the listener back when it exits
    accept_task: Option<JoinHandle<T::Listener>>,
}

impl<T: Transport> Server<T> {
    /// Create a new server. The local transport address is queried here once.
    pub fn new(config: ServerConfig, transport: T) -> ServerResult<Self> {
        let local_address = transport.local_address()?;

        Ok(Self {
            config,
            transport,
            local_address,
            registry: Arc::new(EndpointRegistry::new()),
            advertiser: Box::new(NoopAdvertiser),
            advertised: None,
            listener: None,
            bound_port: None,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
            accept_task: None,
        })
    }

    /// Use `advertiser` to make the service discoverable
    pub fn with_advertiser(mut self, advertiser: impl Advertiser + 'static) -> Self {
        self.advertiser = Box::new(advertiser);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn service_id(&self) -> &str {
        &self.config.service_id
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Port of the listening socket, once bound
    pub fn local_port(&self) -> Option<u16> {
        self.bound_port
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Check if the accept loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register an async closure as an endpoint. Only allowed while stopped.
    pub fn register<F, Fut, R>(&mut self, name: &str, handler: F) -> ServerResult<()>
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        self.registry_mut()?.register(name, handler)?;
        Ok(())
    }

    /// Register a [`Handler`] implementation as an endpoint. Only allowed while stopped.
    pub fn register_handler<H: Handler>(&mut self, name: &str, handler: H) -> ServerResult<()> {
        self.registry_mut()?.register_handler(name, handler)?;
        Ok(())
    }

    fn registry_mut(&mut self) -> ServerResult<&mut EndpointRegistry> {
        // Shared means an accept loop still holds it
        Arc::get_mut(&mut self.registry).ok_or(ServerError::AlreadyRunning)
    }

    /// Start the accept loop on a background task.
    ///
    /// Connections are served one at a time, each to completion, before the
    /// next is accepted. A panicking handler only ends its own connection.
    pub async fn start(&mut self) -> ServerResult<()> {
        if self.is_running() || self.accept_task.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let mut listener = self.take_listener().await?;
        self.advertise();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.running.store(true, Ordering::SeqCst);

        let registry = self.registry.clone();
        let running = self.running.clone();
        let max_endpoint_len = self.config.max_endpoint_len;

        // Spawn the accept loop
        self.accept_task = Some(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tracing::debug!("Waiting for client");
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                tracing::info!("Received new client on [{}]", peer);

                                let registry = registry.clone();
                                let mut client = tokio::spawn(async move {
                                    Connection::new(stream, peer)
                                        .with_max_endpoint_len(max_endpoint_len)
                                        .serve(&registry)
                                        .await
                                });

                                tokio::select! {
                                    result = &mut client => {
                                        if let Err(e) = result {
                                            tracing::error!("Unhandled exception while serving client: {}", e);
                                        }
                                    }
                                    _ = shutdown_rx.recv() => {
                                        client.abort();
                                        // The aborted task still holds a registry clone until it is joined
                                        let _ = client.await;
                                        tracing::info!("Server shutdown requested");
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
            listener
        }));

        Ok(())
    }

    /// Stop the accept loop, closing any active connection, and withdraw
    /// the advertisement.
    ///
    /// After [`Server::serve_once`] there is no loop to stop, but the
    /// advertisement it made is still withdrawn.
    pub async fn stop(&mut self) -> ServerResult<()> {
        let Some(task) = self.accept_task.take() else {
            if self.advertised.is_none() {
                return Err(ServerError::NotRunning);
            }
            self.withdraw();
            tracing::info!("Server stopped");
            return Ok(());
        };

        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        match task.await {
            Ok(listener) => self.listener = Some(listener),
            Err(e) => {
                tracing::error!("Accept loop ended abnormally: {}", e);
                self.bound_port = None;
            }
        }

        self.withdraw();
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Accept one connection, serve exactly one request/response cycle on
    /// the caller's task, and close it
    pub async fn serve_once(&mut self) -> ServerResult<()> {
        if self.accept_task.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let mut listener = self.take_listener().await?;
        self.advertise();

        tracing::debug!("Waiting for client");
        let accepted = listener.accept().await;
        self.listener = Some(listener);
        let (stream, peer) = accepted?;
        tracing::info!("Received new client on [{}]", peer);

        let mut conn = Connection::new(stream, peer)
            .with_max_endpoint_len(self.config.max_endpoint_len);
        if let Err(e) = conn.handle_next(&self.registry).await {
            log_client_error(conn.peer(), &e);
        }
        conn.close().await;

        Ok(())
    }

    /// Take the cached listening socket, binding it on first use
    async fn take_listener(&mut self) -> ServerResult<T::Listener> {
        if let Some(listener) = self.listener.take() {
            return Ok(listener);
        }

        let listener = self
            .transport
            .bind(self.config.port, self.config.backlog)
            .await
            .map_err(|e| {
                ServerError::BindFailed(format!("Failed to bind port {}: {}", self.config.port, e))
            })?;

        let port = listener.local_port()?;
        self.bound_port = Some(port);
        tracing::info!(
            "Listening on ({}, {}) with [{}]",
            self.local_address,
            port,
            self.config.service_id
        );

        Ok(listener)
    }

    fn advertise(&mut self) {
        if self.advertised.is_some() {
            return;
        }
        let Some(port) = self.bound_port else {
            return;
        };

        let record = ServiceRecord::new(
            &self.config.service_name,
            &self.config.service_id,
            &self.local_address,
            port,
        );
        match self.advertiser.advertise(&record) {
            Ok(()) => {
                tracing::info!("Advertised service '{}' [{}]", record.name, record.service_id);
                self.advertised = Some(record);
            }
            Err(e) => tracing::warn!("Service advertisement failed: {}", e),
        }
    }

    fn withdraw(&mut self) {
        if let Some(record) = self.advertised.take() {
            if let Err(e) = self.advertiser.withdraw(&record) {
                tracing::warn!("Service withdrawal failed: {}", e);
            }
        }
    }
}

impl<T: Transport> Drop for Server<T> {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            self.running.store(false, Ordering::SeqCst);
            task.abort();
        }
        self.withdraw();
    }
}
