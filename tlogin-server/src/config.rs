//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via TLOGIN_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tlogin_protocol::{latin1, DEFAULT_LOGIN_PORT};
use tlogin_query::QueryConfig;

/// Number of known terminal types.
pub const TERMINAL_TYPES: usize = 3;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Status document and rate limiting.
    pub status: StatusConfig,
    /// Query manager link.
    pub query: QueryManagerConfig,
    /// Handshake key material.
    pub crypto: CryptoConfig,
    /// Accepted client builds.
    pub client: ClientConfig,
    /// Message of the day. Empty disables it.
    pub motd: String,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("TLOGIN_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::ParseError(_, msg) => ConfigError::ParseError(path.to_path_buf(), msg),
            other => other,
        })
    }

    /// Parses configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content)
            .map_err(|e| ConfigError::ParseError(PathBuf::from("<inline>"), e.to_string()))
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.status.apply_env_overrides();
        self.query.apply_env_overrides();
        self.crypto.apply_env_overrides();
        self.client.apply_env_overrides();

        if let Ok(motd) = std::env::var("TLOGIN_MOTD") {
            self.motd = motd;
        }
    }

    /// Checks values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_connections must be at least 1".to_string(),
            ));
        }
        if self.status.max_records == 0 {
            return Err(ConfigError::ValidationError(
                "status.max_records must be at least 1".to_string(),
            ));
        }
        if self.query.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "query.host must not be empty".to_string(),
            ));
        }
        if self.query.port == 0 {
            return Err(ConfigError::ValidationError(
                "query.port must not be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Message of the day as sent to clients: a decimal FNV-1a hash line
    /// followed by the text. `None` when no message is configured.
    pub fn message_of_the_day(&self) -> Option<String> {
        if self.motd.is_empty() {
            None
        } else {
            Some(format!("{}\n{}", fnv1a32(&self.motd), self.motd))
        }
    }

    /// Builds the query manager link configuration.
    pub fn query_config(&self) -> QueryConfig {
        QueryConfig::new(self.query.host.clone(), self.query.port)
            .with_password(self.query.password.clone())
            .with_connect_timeout(self.query.connect_timeout())
            .with_request_timeout(self.query.request_timeout())
    }

    /// Logs the resolved configuration. Secrets are not printed.
    pub fn log_summary(&self) {
        tracing::info!("  Bind address: {}", self.network.bind_addr);
        tracing::info!("  Connection timeout: {}s", self.network.connection_timeout_secs);
        tracing::info!("  Max connections: {}", self.network.max_connections);
        tracing::info!("  Max status records: {}", self.status.max_records);
        tracing::info!("  Min status interval: {}s", self.status.min_interval_secs);
        tracing::info!("  Query manager: {}:{}", self.query.host, self.query.port);
        tracing::info!("  Status world: {:?}", self.status.world);
        tracing::info!("  URL: {:?}", self.status.url);
        tracing::info!("  Location: {:?}", self.status.location);
        tracing::info!("  Server type: {:?}", self.status.server_type);
        tracing::info!("  Server version: {:?}", self.status.server_version);
        tracing::info!("  Client version: {:?}", self.status.client_version);
        tracing::info!("  Terminal versions: {:?}", self.client.terminal_versions);
        tracing::info!("  MOTD: {}", motd_preview(&self.motd));
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Lifetime of a client connection in seconds (0 = unlimited).
    pub connection_timeout_secs: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_LOGIN_PORT)),
            connection_timeout_secs: 5,
            max_connections: 10,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("TLOGIN_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(port) = std::env::var("TLOGIN_PORT") {
            if let Ok(port) = port.parse() {
                self.bind_addr.set_port(port);
            }
        }

        if let Ok(timeout) = std::env::var("TLOGIN_CONNECTION_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.connection_timeout_secs = secs;
            }
        }

        if let Ok(max) = std::env::var("TLOGIN_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }

    /// Returns the connection timeout, `None` when unlimited.
    pub fn connection_timeout(&self) -> Option<Duration> {
        (self.connection_timeout_secs > 0).then(|| Duration::from_secs(self.connection_timeout_secs))
    }
}

/// Status document and status rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Number of requester addresses tracked by the rate limiter.
    pub max_records: usize,
    /// Minimum seconds between status refreshes, and between allowed
    /// requests from one address.
    pub min_interval_secs: u64,
    /// World reported in the status document. Empty picks the busiest.
    pub world: String,
    pub url: String,
    pub location: String,
    pub server_type: String,
    pub server_version: String,
    pub client_version: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            max_records: 1024,
            min_interval_secs: 300,
            world: String::new(),
            url: String::new(),
            location: String::new(),
            server_type: String::new(),
            server_version: String::new(),
            client_version: String::new(),
        }
    }
}

impl StatusConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("TLOGIN_STATUS_MAX_RECORDS") {
            if let Ok(n) = max.parse() {
                self.max_records = n;
            }
        }

        if let Ok(interval) = std::env::var("TLOGIN_STATUS_MIN_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.min_interval_secs = secs;
            }
        }

        let strings = [
            ("TLOGIN_STATUS_WORLD", &mut self.world),
            ("TLOGIN_STATUS_URL", &mut self.url),
            ("TLOGIN_STATUS_LOCATION", &mut self.location),
            ("TLOGIN_STATUS_SERVER_TYPE", &mut self.server_type),
            ("TLOGIN_STATUS_SERVER_VERSION", &mut self.server_version),
            ("TLOGIN_STATUS_CLIENT_VERSION", &mut self.client_version),
        ];
        for (var, field) in strings {
            if let Ok(value) = std::env::var(var) {
                *field = value;
            }
        }
    }

    /// Returns the minimum interval as Duration.
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

/// Query manager link configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryManagerConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret.
    pub password: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for QueryManagerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7173,
            password: String::new(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for QueryManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryManagerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl QueryManagerConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("TLOGIN_QUERY_HOST") {
            self.host = host;
        }

        if let Ok(port) = std::env::var("TLOGIN_QUERY_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }

        if let Ok(password) = std::env::var("TLOGIN_QUERY_PASSWORD") {
            self.password = password;
        }

        if let Ok(timeout) = std::env::var("TLOGIN_QUERY_CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.connect_timeout_secs = secs;
            }
        }

        if let Ok(timeout) = std::env::var("TLOGIN_QUERY_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.request_timeout_secs = secs;
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Handshake key configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PEM file holding the service RSA private key.
    pub private_key_path: PathBuf,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            private_key_path: PathBuf::from("login.pem"),
        }
    }
}

impl CryptoConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TLOGIN_PRIVATE_KEY") {
            self.private_key_path = PathBuf::from(path);
        }
    }
}

/// Accepted client builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Required protocol version, indexed by terminal type.
    pub terminal_versions: [u16; TERMINAL_TYPES],
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            terminal_versions: [770; TERMINAL_TYPES],
        }
    }
}

impl ClientConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(version) = std::env::var("TLOGIN_TERMINAL_VERSION") {
            if let Ok(version) = version.parse() {
                self.terminal_versions = [version; TERMINAL_TYPES];
            }
        }
    }

    /// Returns whether a client with this terminal type and version may log in.
    pub fn accepts(&self, terminal_type: u16, terminal_version: u16) -> bool {
        self.terminal_versions
            .get(terminal_type as usize)
            .is_some_and(|&required| required == terminal_version)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// 32-bit FNV-1a hash over the Latin-1 form of `text`.
///
/// Bytes are sign-extended before mixing, which is how existing MOTD hash
/// lines were computed for characters above U+007F.
pub fn fnv1a32(text: &str) -> u32 {
    let mut bytes = vec![0u8; latin1::encoded_len(text)];
    latin1::encode_into(text, &mut bytes);
    bytes.iter().fold(0x811C_9DC5, |hash, &byte| {
        (hash ^ (byte as i8 as i32 as u32)).wrapping_mul(0x0100_0193)
    })
}

/// Escaped, shortened rendering of the MOTD for logs.
fn motd_preview(motd: &str) -> String {
    const PREVIEW_CHARS: usize = 30;
    let escaped = motd.escape_debug().to_string();
    if escaped.chars().count() > PREVIEW_CHARS {
        let short: String = escaped.chars().take(PREVIEW_CHARS).collect();
        format!("\"{}...\"", short)
    } else {
        format!("\"{}\"", escaped)
    }
}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
