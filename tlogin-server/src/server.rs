//! TCP server implementation.

use crate::config::Config;
use crate::connection::{ConnectionState, Events};
use crate::error::ServerError;
use crate::handler::LoginService;
use crate::pool::{ConnectionPool, PooledConnection};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tlogin_protocol::{COMMAND_LOGIN, COMMAND_STATUS, DEFAULT_LOGIN_PORT};
use tokio::io::Interest;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Upper bound on a single readiness wait, so timeouts are enforced on idle
/// connections too.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Lifetime of a connection, `None` for unlimited.
    pub connection_timeout: Option<Duration>,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Readiness wait bound.
    pub tick: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_LOGIN_PORT)),
            connection_timeout: Some(Duration::from_secs(5)),
            max_connections: 10,
            tick: DEFAULT_TICK,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds the listener settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            connection_timeout: config.network.connection_timeout(),
            max_connections: config.network.max_connections,
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_connection_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_accepted: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub connections_active: AtomicU64,
    pub login_requests: AtomicU64,
    pub status_requests: AtomicU64,
}

/// TCP front end of the login service.
pub struct Server {
    config: ServerConfig,
    service: Arc<LoginService>,
    pool: Arc<ConnectionPool>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig, service: Arc<LoginService>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = Arc::new(ConnectionPool::new(config.max_connections));
        Self {
            config,
            service,
            pool,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        let conn = match self.pool.acquire(addr, Instant::now()) {
            Some(conn) => conn,
            None => {
                tracing::warn!(
                    "Rejecting connection from {}: all {} slots in use",
                    addr,
                    self.pool.capacity()
                );
                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let service = self.service.clone();
        let stats = self.stats.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            Self::handle_connection(stream, conn, &service, &stats, &config, shutdown).await;
            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Runs one connection tick by tick until it closes. Dropping the
    /// pooled connection at the end returns its slot.
    async fn handle_connection(
        stream: TcpStream,
        mut conn: PooledConnection,
        service: &LoginService,
        stats: &ServerStats,
        config: &ServerConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            let interest = if conn.state() == ConnectionState::Writing {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };

            let events = tokio::select! {
                ready = tokio::time::timeout(config.tick, stream.ready(interest)) => {
                    match ready {
                        Ok(Ok(ready)) => Events::from_ready(ready),
                        Ok(Err(e)) => {
                            tracing::debug!("Connection {} poll error: {}", conn.remote_address(), e);
                            Events {
                                error: true,
                                ..Events::default()
                            }
                        }
                        Err(_) => Events::default(),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Connection {} dropped on shutdown", conn.remote_address());
                    break;
                }
            };

            conn.check_input(&stream, events);

            if conn.state() == ConnectionState::Processing && !conn.is_closed() {
                match conn.command() {
                    Some(COMMAND_LOGIN) => {
                        stats.login_requests.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(COMMAND_STATUS) => {
                        stats.status_requests.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }
                service.process(&mut conn).await;
            }

            conn.check_output(&stream);

            if conn.check_connection(events, Instant::now(), config.connection_timeout) {
                break;
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Returns the connection slot pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlogin_crypto::RsaDecryptor;
    use tlogin_query::{QueryClient, QueryConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const TEST_KEY_PEM: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../testdata/login_test_key.pem"));

    fn test_server(config: ServerConfig) -> Arc<Server> {
        let decryptor = Arc::new(RsaDecryptor::from_pem(TEST_KEY_PEM).unwrap());
        let query = Arc::new(QueryClient::new(
            QueryConfig::new("127.0.0.1", 1).with_connect_timeout(Duration::from_millis(200)),
        ));
        let service = Arc::new(LoginService::from_config(&Config::default(), decryptor, query));
        Arc::new(Server::new(config, service))
    }

    async fn start(server: &Arc<Server>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });
        addr
    }

    #[tokio::test]
    async fn test_server_basic() {
        let server = test_server(ServerConfig::new("127.0.0.1:0".parse().unwrap()));
        assert!(!server.is_running());
        assert_eq!(server.pool().capacity(), 10);
    }

    #[tokio::test]
    async fn test_idle_connection_times_out() {
        let server = test_server(
            ServerConfig::default()
                .with_connection_timeout(Some(Duration::from_millis(300)))
                .with_tick(Duration::from_millis(50)),
        );
        let addr = start(&server).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(3), client.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.stats().connections_active.load(Ordering::Relaxed), 0);
        assert_eq!(server.pool().in_use(), 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_full_pool_rejects() {
        let server = test_server(
            ServerConfig::default()
                .with_max_connections(1)
                .with_connection_timeout(None)
                .with_tick(Duration::from_millis(50)),
        );
        let addr = start(&server).await;

        let _held = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut rejected = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(3), rejected.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
        assert_eq!(server.stats().connections_rejected.load(Ordering::Relaxed), 1);
        assert_eq!(server.stats().connections_accepted.load(Ordering::Relaxed), 1);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_bad_frame_closes_without_reply() {
        let server = test_server(ServerConfig::default().with_tick(Duration::from_millis(50)));
        let addr = start(&server).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&[0, 0]).await.unwrap();
        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(3), client.read_to_end(&mut buf))
            .await
            .unwrap();
        assert!(read.is_err() || buf.is_empty());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let server = test_server(ServerConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let serving = server.clone();
        let handle = tokio::spawn(async move { serving.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.is_running());
        server.shutdown();
        handle.await.unwrap().unwrap();
        assert!(!server.is_running());
    }
}
