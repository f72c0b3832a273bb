//! Per-connection state machine.
//!
//! A connection moves `Free -> Reading -> Processing -> Writing` and back to
//! `Free` when it is released. The same buffer holds the request while
//! reading and the response while writing, never both at once.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tlogin_crypto::{XteaKey, XTEA_BLOCK_SIZE};
use tlogin_protocol::{ProtocolError, WireWriter, CONNECTION_BUFFER_SIZE};
use tokio::net::TcpStream;

use crate::error::ServerError;

/// Size of the request header: a 16-bit payload length.
const REQUEST_HEADER_SIZE: usize = 2;

/// Encrypted length plus data length.
const ENCRYPTED_HEADER_SIZE: usize = 4;

/// Lifecycle state of a connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Free,
    Reading,
    Processing,
    Writing,
}

/// Non-blocking socket operations. `WouldBlock` means "try next tick".
pub trait NonBlockingIo {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl NonBlockingIo for TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

/// Readiness reported for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Events {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}

impl Events {
    pub fn from_ready(ready: tokio::io::Ready) -> Self {
        Self {
            readable: ready.is_readable(),
            writable: ready.is_writable(),
            error: ready.is_error(),
            hangup: ready.is_write_closed(),
        }
    }
}

/// One client connection slot.
pub struct Connection {
    slot: usize,
    state: ConnectionState,
    closed: bool,
    peer: Option<SocketAddr>,
    remote_address: String,
    buffer: Box<[u8]>,
    rw_size: usize,
    rw_position: usize,
    key: XteaKey,
    rng: SmallRng,
    started: Instant,
}

impl Connection {
    /// Creates a free slot.
    pub fn new(slot: usize) -> Self {
        Self {
            slot,
            state: ConnectionState::Free,
            closed: false,
            peer: None,
            remote_address: String::new(),
            buffer: vec![0u8; CONNECTION_BUFFER_SIZE].into_boxed_slice(),
            rw_size: 0,
            rw_position: 0,
            key: XteaKey::default(),
            rng: SmallRng::seed_from_u64(0),
            started: Instant::now(),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_free(&self) -> bool {
        self.state == ConnectionState::Free
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// `a.b.c.d:port` of the peer, for logs.
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// Peer address without the port.
    pub fn ip(&self) -> Option<IpAddr> {
        self.peer.map(|peer| peer.ip())
    }

    /// Time since the connection was assigned.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Takes the slot for a freshly accepted peer.
    pub fn assign(&mut self, peer: SocketAddr, now: Instant) {
        self.state = ConnectionState::Reading;
        self.closed = false;
        self.peer = Some(peer);
        self.remote_address = peer.to_string();
        self.rw_size = 0;
        self.rw_position = 0;
        self.rng = SmallRng::from_entropy();
        self.started = now;
        tracing::info!(
            "Connection {} assigned to slot {}",
            self.remote_address,
            self.slot
        );
    }

    /// Returns the slot to `Free`, wiping the buffer and key material.
    pub fn release(&mut self) {
        if !self.is_free() {
            tracing::debug!(
                "Connection {} released from slot {}",
                self.remote_address,
                self.slot
            );
        }
        self.state = ConnectionState::Free;
        self.closed = false;
        self.peer = None;
        self.remote_address.clear();
        self.buffer.fill(0);
        self.rw_size = 0;
        self.rw_position = 0;
        self.key = XteaKey::default();
        self.rng = SmallRng::seed_from_u64(0);
    }

    /// Marks the connection for release at the end of the tick.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Installs the session key recovered from the handshake.
    pub fn set_key(&mut self, key: XteaKey) {
        self.key = key;
    }

    /// Payload of the buffered request while `Processing`, empty otherwise.
    pub fn request(&self) -> &[u8] {
        if self.state == ConnectionState::Processing {
            &self.buffer[..self.rw_size]
        } else {
            &[]
        }
    }

    /// Command discriminator of the buffered request.
    pub fn command(&self) -> Option<u8> {
        self.request().first().copied()
    }

    /// Accumulates a request frame. Moves to `Processing` once the whole
    /// payload is buffered.
    pub fn check_input<I: NonBlockingIo>(&mut self, io: &I, events: Events) {
        if self.closed || !events.readable {
            return;
        }

        if self.state != ConnectionState::Reading {
            self.check_unexpected_input(io);
            return;
        }

        loop {
            let read_size = if self.rw_size > 0 {
                self.rw_size
            } else {
                REQUEST_HEADER_SIZE
            };

            match io.try_read(&mut self.buffer[self.rw_position..read_size]) {
                Ok(0) => {
                    tracing::debug!("Connection {} closed by peer", self.remote_address);
                    self.close();
                    break;
                }
                Ok(n) => {
                    self.rw_position += n;
                    if self.rw_position < read_size {
                        continue;
                    }

                    if self.rw_size > 0 {
                        self.state = ConnectionState::Processing;
                        break;
                    }

                    let payload = u16::from_le_bytes([self.buffer[0], self.buffer[1]]) as usize;
                    if payload == 0 || payload > self.buffer.len() {
                        tracing::warn!(
                            "Connection {}: {}",
                            self.remote_address,
                            ProtocolError::InvalidFrameLength {
                                size: payload,
                                max: self.buffer.len(),
                            }
                        );
                        self.close();
                        break;
                    }
                    self.rw_size = payload;
                    self.rw_position = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("Connection {} read error: {}", self.remote_address, e);
                    self.close();
                    break;
                }
            }
        }
    }

    /// Readiness outside `Reading` may be left over from the request that
    /// was just read, so only actual bytes, EOF or an error close the
    /// connection. A `WouldBlock` here also clears the cached readiness.
    fn check_unexpected_input<I: NonBlockingIo>(&mut self, io: &I) {
        let mut scratch = [0u8; 1];
        loop {
            match io.try_read(&mut scratch) {
                Ok(0) => {
                    tracing::debug!("Connection {} closed by peer", self.remote_address);
                }
                Ok(_) => {
                    tracing::warn!(
                        "Connection {} is sending out-of-order data",
                        self.remote_address
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("Connection {} read error: {}", self.remote_address, e);
                }
            }
            self.close();
            return;
        }
    }

    /// Builds an encrypted response and moves to `Writing`.
    ///
    /// Layout: encrypted length (u16), data length (u16), data, random
    /// padding. Everything after the first two bytes is encrypted.
    pub fn send_encrypted<F>(&mut self, build: F) -> Result<(), ServerError>
    where
        F: FnOnce(&mut WireWriter<'_>),
    {
        if self.state != ConnectionState::Processing {
            return Err(ServerError::NotProcessing(self.state));
        }

        let mut writer = WireWriter::new(&mut self.buffer);
        writer.write_u16(0);
        writer.write_u16(0);
        build(&mut writer);

        let data_size = writer.position().saturating_sub(ENCRYPTED_HEADER_SIZE);
        while (writer.position() - REQUEST_HEADER_SIZE) % XTEA_BLOCK_SIZE != 0 {
            writer.write_u8(self.rng.gen());
        }
        if writer.overflowed() {
            return Err(ProtocolError::Overflow("encrypted response").into());
        }

        let encrypted_size = writer.position() - REQUEST_HEADER_SIZE;
        writer.rewrite_u16(0, encrypted_size as u16);
        writer.rewrite_u16(2, data_size as u16);

        let (buffer, length) = writer.into_inner();
        self.key.encrypt(&mut buffer[REQUEST_HEADER_SIZE..length]);
        self.start_writing(length);
        Ok(())
    }

    /// Queues `data` unframed and unencrypted, truncated to the buffer.
    pub fn send_raw(&mut self, data: &[u8]) -> Result<(), ServerError> {
        if self.state != ConnectionState::Processing {
            return Err(ServerError::NotProcessing(self.state));
        }

        let length = data.len().min(self.buffer.len());
        self.buffer[..length].copy_from_slice(&data[..length]);
        self.start_writing(length);
        Ok(())
    }

    fn start_writing(&mut self, length: usize) {
        self.rw_size = length;
        self.rw_position = 0;
        self.state = ConnectionState::Writing;
    }

    /// Drains the pending response. The connection closes once everything
    /// is written.
    pub fn check_output<I: NonBlockingIo>(&mut self, io: &I) {
        if self.closed || self.state != ConnectionState::Writing {
            return;
        }

        while self.rw_position < self.rw_size {
            match io.try_write(&self.buffer[self.rw_position..self.rw_size]) {
                Ok(0) => {
                    self.close();
                    return;
                }
                Ok(n) => self.rw_position += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("Connection {} write error: {}", self.remote_address, e);
                    self.close();
                    return;
                }
            }
        }

        self.close();
    }

    /// Applies error, hangup and timeout checks. Returns whether the
    /// connection is closed and must be released.
    pub fn check_connection(
        &mut self,
        events: Events,
        now: Instant,
        timeout: Option<Duration>,
    ) -> bool {
        if self.is_free() {
            return false;
        }

        if events.error || events.hangup {
            tracing::debug!("Connection {} error or hangup", self.remote_address);
            self.close();
        }

        if let Some(timeout) = timeout {
            if !self.closed && self.elapsed(now) >= timeout {
                tracing::warn!("Connection {} TIMEDOUT", self.remote_address);
                self.close();
            }
        }

        self.closed
    }
}

#[cfg(test)]
impl Connection {
    /// A connection that has just buffered `payload` from `peer`.
    pub(crate) fn with_request(peer: SocketAddr, payload: &[u8]) -> Self {
        let mut conn = Self::new(0);
        conn.assign(peer, Instant::now());
        conn.buffer[..payload.len()].copy_from_slice(payload);
        conn.rw_size = payload.len();
        conn.state = ConnectionState::Processing;
        conn
    }

    /// Bytes queued for writing.
    pub(crate) fn pending_output(&self) -> &[u8] {
        if self.state == ConnectionState::Writing {
            &self.buffer[self.rw_position..self.rw_size]
        } else {
            &[]
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("slot", &self.slot)
            .field("state", &self.state)
            .field("closed", &self.closed)
            .field("remote_address", &self.remote_address)
            .field("rw_size", &self.rw_size)
            .field("rw_position", &self.rw_position)
            .finish_non_exhaustive()
    }
}
