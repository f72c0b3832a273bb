//! Status request rate limiting.
//!
//! A fixed-capacity table of requester addresses. A new address takes a
//! free record or evicts the least recently used one; a known address is
//! allowed again only once the minimum interval has passed since its last
//! allowed request.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct StatusRecord {
    ip: IpAddr,
    last: Instant,
}

/// Shared status rate limiter.
#[derive(Debug)]
pub struct StatusRateLimiter {
    records: Mutex<Vec<StatusRecord>>,
    capacity: usize,
    min_interval: Duration,
}

impl StatusRateLimiter {
    pub fn new(capacity: usize, min_interval: Duration) -> Self {
        Self {
            records: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            min_interval,
        }
    }

    pub fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now())
    }

    /// Decides whether `ip` may request the status document at `now`.
    pub fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut records = self.records.lock();

        let mut existing = None;
        let mut least_recent: Option<usize> = None;
        for (index, record) in records.iter().enumerate() {
            if record.ip == ip {
                existing = Some(index);
                break;
            }
            // Ties keep the earlier record.
            if least_recent.map_or(true, |lru| record.last < records[lru].last) {
                least_recent = Some(index);
            }
        }

        match existing {
            Some(index) => {
                let record = &mut records[index];
                if now.saturating_duration_since(record.last) >= self.min_interval {
                    record.last = now;
                    true
                } else {
                    false
                }
            }
            None => {
                let record = StatusRecord { ip, last: now };
                if records.len() < self.capacity {
                    records.push(record);
                } else if let Some(index) = least_recent {
                    tracing::debug!("Evicting status record of {}", records[index].ip);
                    records[index] = record;
                }
                true
            }
        }
    }

    /// Number of tracked addresses.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.records.lock().iter().any(|record| record.ip == ip)
    }
}
