//! # tlogin-server
//!
//! Client-facing login server.
//!
//! This crate provides:
//! - Layered configuration (defaults, YAML file, environment)
//! - A fixed pool of connection slots, each driving a small state machine
//!   over non-blocking socket I/O
//! - Login handling: RSA handshake, XTEA encrypted responses, account
//!   validation through the query manager
//! - A cached, rate-limited XML status document

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod pool;
pub mod rate_limit;
pub mod server;
pub mod status;

pub use config::{
    ClientConfig, Config, ConfigError, CryptoConfig, NetworkConfig, QueryManagerConfig,
    StatusConfig,
};
pub use connection::{Connection, ConnectionState, Events, NonBlockingIo};
pub use error::ServerError;
pub use handler::LoginService;
pub use pool::{ConnectionPool, PooledConnection};
pub use rate_limit::StatusRateLimiter;
pub use server::{Server, ServerConfig, ServerStats};
pub use status::{StatusCache, StatusInfo};
