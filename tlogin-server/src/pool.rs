//! Fixed-capacity connection slot pool.

use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::connection::Connection;

/// Preallocated connection slots handed out from a free list.
#[derive(Debug)]
pub struct ConnectionPool {
    free: Mutex<Vec<Connection>>,
    capacity: usize,
}

impl ConnectionPool {
    pub fn new(capacity: usize) -> Self {
        // Reversed so that the lowest slot is handed out first.
        let free = (0..capacity).rev().map(Connection::new).collect();
        Self {
            free: Mutex::new(free),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Assigns a free slot to `peer`. `None` when the pool is exhausted.
    pub fn acquire(self: &Arc<Self>, peer: SocketAddr, now: Instant) -> Option<PooledConnection> {
        let mut conn = self.free.lock().pop()?;
        conn.assign(peer, now);
        Some(PooledConnection {
            pool: Arc::clone(self),
            conn: Some(conn),
        })
    }

    fn give_back(&self, mut conn: Connection) {
        conn.release();
        self.free.lock().push(conn);
    }
}

/// A slot checked out of the pool. Dropping it releases the slot.
#[derive(Debug)]
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
        }
    }
}
