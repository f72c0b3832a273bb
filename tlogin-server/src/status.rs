//! Status document cache.
//!
//! The XML document answered to server list aggregators is rebuilt at most
//! once per refresh interval. Built documents live in a small ring; a
//! refresh builds into the next slot and only then publishes it, so a
//! connection still sending an older document keeps a complete copy.

use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tlogin_query::{QueryClient, World};
use tokio::sync::Mutex;

use crate::config::Config;

/// Number of documents kept alive at once.
pub const STATUS_RING_SIZE: usize = 3;

/// Longest document produced, in bytes.
pub const MAX_STATUS_LENGTH: usize = 2 * 1024 - 1;

/// Static fields of the status document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusInfo {
    /// World to report. Empty reports the busiest world.
    pub world: String,
    pub url: String,
    pub location: String,
    pub server_type: String,
    pub server_version: String,
    pub client_version: String,
    /// Message of the day without its hash line.
    pub motd: String,
}

impl StatusInfo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            world: config.status.world.clone(),
            url: config.status.url.clone(),
            location: config.status.location.clone(),
            server_type: config.status.server_type.clone(),
            server_version: config.status.server_version.clone(),
            client_version: config.status.client_version.clone(),
            motd: String::new(),
        }
        .with_motd_line(&config.message_of_the_day().unwrap_or_default())
    }

    /// Takes the message of the day as sent to clients, skipping its hash line.
    pub fn with_motd_line(mut self, motd: &str) -> Self {
        self.motd = motd
            .split_once('\n')
            .map_or_else(String::new, |(_, text)| text.to_string());
        self
    }
}

#[derive(Debug)]
struct StatusRing {
    slots: [Bytes; STATUS_RING_SIZE],
    index: usize,
    last_refresh: Option<i64>,
}

/// Rate-bounded cache of the status document.
pub struct StatusCache {
    query: Arc<QueryClient>,
    info: StatusInfo,
    min_interval: Duration,
    ring: Mutex<StatusRing>,
}

impl StatusCache {
    pub fn new(query: Arc<QueryClient>, info: StatusInfo, min_interval: Duration) -> Self {
        Self {
            query,
            info,
            min_interval,
            ring: Mutex::new(StatusRing {
                slots: Default::default(),
                index: 0,
                last_refresh: None,
            }),
        }
    }

    /// Returns the current document, refreshing it first when stale.
    pub async fn get(&self) -> Bytes {
        self.get_at(chrono::Utc::now().timestamp()).await
    }

    /// [`get`](Self::get) with an explicit wall clock in unix seconds.
    pub async fn get_at(&self, now: i64) -> Bytes {
        let mut ring = self.ring.lock().await;

        let interval = i64::try_from(self.min_interval.as_secs()).unwrap_or(i64::MAX);
        let stale = ring
            .last_refresh
            .map_or(true, |last| now.saturating_sub(last) >= interval);

        if stale {
            let world = match self.query.get_world(&self.info.world).await {
                Ok(Some(world)) => Some(world),
                Ok(None) => {
                    tracing::warn!("Status world {:?} not found", self.info.world);
                    None
                }
                Err(e) => {
                    tracing::error!("Failed to query world data: {}", e);
                    None
                }
            };

            let next = (ring.index + 1) % STATUS_RING_SIZE;
            ring.slots[next] = build_document(world.as_ref(), &self.info, now);
            ring.index = next;
            ring.last_refresh = Some(now);
            tracing::debug!("Status document refreshed into slot {}", next);
        }

        ring.slots[ring.index].clone()
    }

    /// Ring slot holding the published document.
    pub async fn current_index(&self) -> usize {
        self.ring.lock().await.index
    }
}

impl fmt::Debug for StatusCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusCache")
            .field("info", &self.info)
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}

/// Renders the status document. A missing world reports an empty name and
/// zero counters.
pub fn build_document(world: Option<&World>, info: &StatusInfo, now: i64) -> Bytes {
    let (name, uptime, online, max, peak) = match world {
        Some(world) => {
            let uptime = if world.last_startup != 0 && world.last_startup > world.last_shutdown {
                now - i64::from(world.last_startup)
            } else {
                0
            };
            (
                world.name.as_str(),
                uptime,
                world.players,
                world.max_players,
                world.online_peak.max(world.players),
            )
        }
        None => ("", 0, 0, 0, 0),
    };

    let mut doc = String::with_capacity(MAX_STATUS_LENGTH + 1);
    // Writing into a String cannot fail.
    let _ = write!(
        doc,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <tsqp version=\"1.0\">\
         <serverinfo servername=\"{}\" uptime=\"{}\" url=\"{}\" location=\"{}\" server=\"{}\" version=\"{}\" client=\"{}\"/>\
         <players online=\"{}\" max=\"{}\" peak=\"{}\"/>\
         <motd>{}</motd>\
         </tsqp>",
        Escaped(name),
        uptime,
        Escaped(&info.url),
        Escaped(&info.location),
        Escaped(&info.server_type),
        Escaped(&info.server_version),
        Escaped(&info.client_version),
        online,
        max,
        peak,
        Escaped(&info.motd),
    );

    if doc.len() > MAX_STATUS_LENGTH {
        let mut end = MAX_STATUS_LENGTH;
        while !doc.is_char_boundary(end) {
            end -= 1;
        }
        doc.truncate(end);
    }
    Bytes::from(doc)
}

/// XML attribute/text escaping.
struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ch in self.0.chars() {
            match ch {
                '\t' => f.write_str("&#9;")?,
                '\n' => f.write_str("&#10;")?,
                '"' => f.write_str("&quot;")?,
                '&' => f.write_str("&amp;")?,
                '\'' => f.write_str("&apos;")?,
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                other => f.write_char(other)?,
            }
        }
        Ok(())
    }
}
