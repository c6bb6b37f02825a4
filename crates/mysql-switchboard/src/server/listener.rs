//! TCP listener for incoming MySQL clients

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};
use tracing::Instrument;

use super::engine::{self, ServeOptions};
use crate::auth::{AuthDecisionHandler, CredentialSet};
use crate::backend::Catalog;
use crate::config::Config;
use crate::error::Result;
use crate::session::SessionRouter;
use crate::tls::TlsAcceptor;

/// Listener statistics
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Connections rejected due to limit
    pub connections_rejected: AtomicU64,
}

/// Accepts client connections and runs one session per connection.
pub struct Listener {
    listener: TcpListener,
    catalog: Arc<Catalog>,
    credentials: Arc<CredentialSet>,
    options: ServeOptions,
    max_connections: usize,
    stats: Arc<ListenerStats>,
    shutdown_rx: broadcast::Receiver<()>,
    /// Connection limit semaphore (None = unlimited)
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Bind to the configured address.
    ///
    /// Fails if the address is taken or the listener TLS files cannot be
    /// loaded.
    pub async fn bind(
        config: &Config,
        catalog: Arc<Catalog>,
        credentials: Arc<CredentialSet>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let addr = format!("{}:{}", config.listen.address, config.listen.port);

        let tls_acceptor = if config.listen.tls.enabled {
            Some(TlsAcceptor::new(&config.listen.tls)?)
        } else {
            None
        };

        let listener = TcpListener::bind(&addr).await?;

        let max_connections = config.listen.max_connections;
        let connection_semaphore = if max_connections > 0 {
            info!("Listening on {} (max {} connections)", addr, max_connections);
            Some(Arc::new(Semaphore::new(max_connections)))
        } else {
            info!("Listening on {} (unlimited connections)", addr);
            None
        };
        if tls_acceptor.is_some() {
            info!("Client TLS enabled");
        }

        Ok(Self {
            listener,
            catalog,
            credentials,
            options: ServeOptions {
                tls_acceptor,
                handshake_timeout: Duration::from_secs(config.listen.handshake_timeout_secs),
                max_prepared_statements: config.listen.max_prepared_statements,
            },
            max_connections,
            stats: Arc::new(ListenerStats::default()),
            shutdown_rx,
            connection_semaphore,
        })
    }

    /// Get listener statistics
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Get the local address the listener is bound to.
    ///
    /// This is useful when binding to port 0 to get an OS-assigned port.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until a shutdown signal arrives
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let permit = if let Some(ref semaphore) = self.connection_semaphore {
                                match semaphore.clone().try_acquire_owned() {
                                    Ok(permit) => Some(permit),
                                    Err(_) => {
                                        warn!(
                                            "Connection from {} rejected: max connections ({}) reached",
                                            addr,
                                            self.max_connections
                                        );
                                        self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                        drop(stream);
                                        continue;
                                    }
                                }
                            } else {
                                None
                            };

                            debug!("Accepted connection from {}", addr);
                            self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let catalog = Arc::clone(&self.catalog);
                            let credentials = Arc::clone(&self.credentials);
                            let options = self.options.clone();
                            let stats = Arc::clone(&self.stats);
                            let span = tracing::span!(
                                target: "mysql_switchboard",
                                tracing::Level::INFO,
                                "connection",
                                client = %addr
                            );

                            tokio::spawn(
                                async move {
                                    // Held for the connection lifetime
                                    let _permit = permit;

                                    if let Err(e) =
                                        handle_connection(stream, catalog, credentials, &options).await
                                    {
                                        warn!("Connection from {} error: {}", addr, e);
                                    }
                                    stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                    debug!("Connection from {} closed", addr);
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        info!(
            "Listener stopped. Total: {}, Active: {}, Rejected: {}",
            self.stats.connections_accepted.load(Ordering::Relaxed),
            self.stats.connections_active.load(Ordering::Relaxed),
            self.stats.connections_rejected.load(Ordering::Relaxed)
        );

        Ok(())
    }
}

/// Run one session: a fresh router decides the mode at login and owns the
/// upstream connection, which is closed whatever way the session ends.
async fn handle_connection(
    stream: TcpStream,
    catalog: Arc<Catalog>,
    credentials: Arc<CredentialSet>,
    options: &ServeOptions,
) -> Result<()> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed: {}", e);
    }

    let router = Arc::new(SessionRouter::new(Arc::clone(&catalog)));
    let auth = AuthDecisionHandler::new(catalog, credentials, router.clone());

    let result = engine::serve(stream, options, &auth, router.as_ref()).await;
    debug!("Session ended in {} mode", router.mode_name().await);
    router.close().await;
    result
}
