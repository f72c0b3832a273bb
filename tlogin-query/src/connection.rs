//! Query manager link management.

use crate::error::QueryError;
use crate::query::{QueryStatus, QueryType, APPLICATION_TYPE_LOGIN};
use std::future::Future;
use std::time::Duration;
use tlogin_protocol::frame::{read_frame_length, FrameLength, EXTENDED_HEADER_SIZE};
use tlogin_protocol::{begin_frame, finish_frame, WireReader, WireWriter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};

/// Default query manager port.
pub const DEFAULT_QUERY_PORT: u16 = 7173;

/// Default request/response buffer size (16 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Minimum request/response buffer size (1 KiB).
pub const MIN_BUFFER_SIZE: usize = 1024;

/// Maximum request/response buffer size (1 MiB).
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Attempts made by [`QueryConnection::execute`] before giving up.
pub const MAX_ATTEMPTS: u32 = 2;

/// Size of the scratch buffer used to authenticate a fresh link.
const LOGIN_BUFFER_SIZE: usize = 1024;

/// Query manager link configuration.
#[derive(Clone)]
pub struct QueryConfig {
    /// Query manager host name or address.
    pub host: String,
    /// Query manager port.
    pub port: u16,
    /// Shared secret sent when the link is established.
    pub password: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Timeout for one request/response exchange.
    pub request_timeout: Duration,
    /// Size of the buffer holding requests and responses.
    pub buffer_size: usize,
}

impl QueryConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: String::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_QUERY_PORT)
    }
}

impl std::fmt::Debug for QueryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}

/// Response to a query, borrowing the link buffer.
#[derive(Debug)]
pub struct QueryResponse<'a> {
    pub status: QueryStatus,
    /// Cursor positioned just after the status byte.
    pub reader: WireReader<'a>,
}

impl<'a> QueryResponse<'a> {
    fn new(payload: &'a [u8]) -> Self {
        let mut reader = WireReader::new(payload);
        let status = QueryStatus::from_code(reader.read_u8());
        Self { status, reader }
    }
}

/// Starts a query frame in `buf`: reserved length prefix plus query type.
pub fn prepare_query(buf: &mut [u8], query: QueryType) -> WireWriter<'_> {
    let mut writer = WireWriter::new(buf);
    begin_frame(&mut writer);
    writer.write_u8(query.code());
    writer
}

/// A single blocking-style link to the query manager.
///
/// Requests are serialized into the link buffer and the response is read
/// back into the same buffer. Authentication of a fresh link goes through
/// a separate scratch buffer so a pending request survives a reconnect.
pub struct QueryConnection {
    config: QueryConfig,
    stream: Option<TcpStream>,
    buffer: Box<[u8]>,
}

impl QueryConnection {
    /// Creates a new link (not yet connected).
    pub fn new(config: QueryConfig) -> Self {
        let buffer = vec![0u8; config.buffer_size].into_boxed_slice();
        Self {
            config,
            stream: None,
            buffer,
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Returns whether the link is established.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Opens the link and authenticates with the shared secret.
    ///
    /// On failure the link is left disconnected.
    pub async fn connect(&mut self) -> Result<(), QueryError> {
        if self.stream.is_some() {
            tracing::debug!("Query manager link already established");
            return Ok(());
        }

        let host = self.config.host.as_str();
        tracing::debug!("Connecting to query manager at {}:{}...", host, self.config.port);

        let addr = lookup_host((host, self.config.port))
            .await
            .map_err(|e| {
                tracing::error!("Failed to resolve query manager host {:?}: {}", host, e);
                QueryError::Resolve(host.to_string())
            })?
            .find(|addr| addr.is_ipv4())
            .ok_or_else(|| QueryError::Resolve(host.to_string()))?;

        let mut stream = with_timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to query manager at {}: {}", addr, e);
                e
            })?;
        stream.set_nodelay(true).ok();

        let mut login = [0u8; LOGIN_BUFFER_SIZE];
        let mut writer = prepare_query(&mut login, QueryType::Login);
        writer.write_u8(APPLICATION_TYPE_LOGIN);
        writer.write_string(&self.config.password);
        let request_len = finish_frame(&mut writer)?;

        let timeout = self.config.request_timeout;
        let size = with_timeout(timeout, send_request(&mut stream, &login[..request_len], login.len())).await?;
        with_timeout(timeout, read_payload(&mut stream, &mut login[..size])).await?;

        let status = QueryResponse::new(&login[..size]).status;
        if status != QueryStatus::Ok {
            tracing::error!("Failed to login to query manager ({})", status.code());
            return Err(QueryError::LoginRefused(status.code()));
        }

        tracing::debug!("Query manager link established with {}", addr);
        self.stream = Some(stream);
        Ok(())
    }

    /// Drops the link.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Disconnected from query manager");
        }
    }

    /// Starts a request of type `query` in the link buffer.
    ///
    /// Finish it with [`finish_frame`] and pass the returned length to
    /// [`execute`](Self::execute).
    pub fn prepare(&mut self, query: QueryType) -> WireWriter<'_> {
        prepare_query(&mut self.buffer, query)
    }

    /// Sends the `request_len` bytes already serialized in the link buffer
    /// and waits for the response.
    ///
    /// With `auto_reconnect` a dropped link is re-established once per
    /// attempt. Failures up to the response length are retried on a fresh
    /// link, [`MAX_ATTEMPTS`] times in total.
    pub async fn execute(
        &mut self,
        request_len: usize,
        auto_reconnect: bool,
    ) -> Result<QueryResponse<'_>, QueryError> {
        let max = self.buffer.len();
        if request_len < 3 || request_len > max {
            return Err(QueryError::RequestSize {
                size: request_len,
                max,
            });
        }

        let timeout = self.config.request_timeout;
        let mut attempt = 1;
        let size = loop {
            if self.stream.is_none() {
                if !auto_reconnect {
                    return Err(QueryError::NotConnected);
                }
                self.connect().await?;
            }
            let stream = self.stream.as_mut().ok_or(QueryError::NotConnected)?;

            let sent = with_timeout(timeout, send_request(stream, &self.buffer[..request_len], max)).await;
            match sent {
                Ok(size) => break size,
                Err(e) => {
                    self.disconnect();
                    if attempt >= MAX_ATTEMPTS || !e.is_retryable() {
                        tracing::error!("Query failed after {} attempt(s): {}", attempt, e);
                        return Err(e);
                    }
                    tracing::warn!("Query attempt {} failed, retrying: {}", attempt, e);
                    attempt += 1;
                }
            }
        };

        // The request bytes are overwritten from here on: no more retries.
        let stream = self.stream.as_mut().ok_or(QueryError::NotConnected)?;
        let received = with_timeout(timeout, read_payload(stream, &mut self.buffer[..size])).await;
        if let Err(e) = received {
            tracing::error!("Failed to read query response: {}", e);
            self.disconnect();
            return Err(e);
        }

        Ok(QueryResponse::new(&self.buffer[..size]))
    }
}

/// Writes a request and reads back the response length, which must be
/// non-zero and fit `capacity`.
async fn send_request(
    stream: &mut TcpStream,
    request: &[u8],
    capacity: usize,
) -> Result<usize, QueryError> {
    stream.write_all(request).await.map_err(map_io)?;

    let mut header = [0u8; EXTENDED_HEADER_SIZE];
    let mut filled = 0;
    let size = loop {
        match read_frame_length(&header[..filled]) {
            FrameLength::Complete { payload, .. } => break payload,
            FrameLength::NeedMore(needed) => {
                stream
                    .read_exact(&mut header[filled..needed])
                    .await
                    .map_err(map_io)?;
                filled = needed;
            }
        }
    };

    if size == 0 || size > capacity {
        return Err(QueryError::ResponseSize {
            size,
            max: capacity,
        });
    }
    Ok(size)
}

async fn read_payload(stream: &mut TcpStream, payload: &mut [u8]) -> Result<(), QueryError> {
    stream.read_exact(payload).await.map_err(map_io)?;
    Ok(())
}

async fn with_timeout<T, E>(
    timeout: Duration,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, QueryError>
where
    QueryError: From<E>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result.map_err(QueryError::from),
        Err(_) => Err(QueryError::Timeout),
    }
}

fn map_io(e: std::io::Error) -> QueryError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        QueryError::ConnectionClosed
    } else {
        QueryError::Io(e)
    }
}
