//! Request dispatch for buffered client requests.

use std::sync::Arc;

use tlogin_crypto::{RsaDecryptor, XteaKey};
use tlogin_protocol::{
    tag, ProtocolError, WireReader, COMMAND_LOGIN, COMMAND_STATUS, LOGIN_REQUEST_SIZE,
    LOGIN_RSA_BLOCK_SIZE, MAX_PASSWORD_LENGTH, STATUS_FORMAT_XML,
};
use tlogin_query::{AccountLogin, Character, LoginDenial, QueryClient};
use zeroize::Zeroizing;

use crate::config::{ClientConfig, Config};
use crate::connection::Connection;
use crate::error::ServerError;
use crate::rate_limit::StatusRateLimiter;
use crate::status::{StatusCache, StatusInfo};

/// User-facing login error messages.
pub mod message {
    pub const ACCOUNT_NUMBER_REQUIRED: &str = "You must enter an account number.";
    pub const TERMINAL_TOO_OLD: &str =
        "Your terminal version is too old.\nPlease get a new version at\nhttp://www.tibia.com.";
    pub const INVALID_CREDENTIALS: &str = "Accountnumber or password is not correct.";
    pub const ACCOUNT_DISABLED: &str = "Account disabled for five minutes. Please wait.";
    pub const IP_BLOCKED: &str = "IP address blocked for 30 minutes. Please wait.";
    pub const ACCOUNT_BANISHED: &str = "Your account is banished.";
    pub const IP_BANISHED: &str = "Your IP address is banished.";
    pub const INTERNAL_ERROR: &str = "Internal error, closing connection.";
}

/// Content signature fields of a login request, not checked.
const SIGNATURES_SIZE: usize = 12;

/// Message shown for a refused account login.
pub fn denial_message(denial: LoginDenial) -> &'static str {
    match denial {
        LoginDenial::InvalidAccount | LoginDenial::InvalidPassword => message::INVALID_CREDENTIALS,
        LoginDenial::AccountDisabled => message::ACCOUNT_DISABLED,
        LoginDenial::IpBlocked => message::IP_BLOCKED,
        LoginDenial::AccountBanished => message::ACCOUNT_BANISHED,
        LoginDenial::IpBanished => message::IP_BANISHED,
    }
}

/// Login and status request handler shared by all connections.
pub struct LoginService {
    decryptor: Arc<RsaDecryptor>,
    query: Arc<QueryClient>,
    status: StatusCache,
    rate_limiter: StatusRateLimiter,
    client: ClientConfig,
    /// Message of the day as sent to clients, hash line included.
    motd: Option<String>,
}

impl LoginService {
    /// Creates a new service with default client versions and no MOTD.
    pub fn new(
        decryptor: Arc<RsaDecryptor>,
        query: Arc<QueryClient>,
        status: StatusCache,
        rate_limiter: StatusRateLimiter,
    ) -> Self {
        Self {
            decryptor,
            query,
            status,
            rate_limiter,
            client: ClientConfig::default(),
            motd: None,
        }
    }

    /// Creates a service wired from the configuration.
    pub fn from_config(
        config: &Config,
        decryptor: Arc<RsaDecryptor>,
        query: Arc<QueryClient>,
    ) -> Self {
        let status = StatusCache::new(
            query.clone(),
            StatusInfo::from_config(config),
            config.status.min_interval(),
        );
        let rate_limiter =
            StatusRateLimiter::new(config.status.max_records, config.status.min_interval());
        Self::new(decryptor, query, status, rate_limiter)
            .with_client(config.client.clone())
            .with_motd(config.message_of_the_day())
    }

    /// Sets the accepted client builds.
    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    /// Sets the message of the day sent ahead of character lists.
    pub fn with_motd(mut self, motd: Option<String>) -> Self {
        self.motd = motd;
        self
    }

    pub fn query(&self) -> &Arc<QueryClient> {
        &self.query
    }

    pub fn status_cache(&self) -> &StatusCache {
        &self.status
    }

    pub fn rate_limiter(&self) -> &StatusRateLimiter {
        &self.rate_limiter
    }

    /// Handles the buffered request of a `Processing` connection. The
    /// connection ends up `Writing` a response, or closed.
    pub async fn process(&self, conn: &mut Connection) {
        let result = match conn.command() {
            Some(COMMAND_LOGIN) => self.process_login(conn).await,
            Some(COMMAND_STATUS) => self.process_status(conn).await,
            Some(other) => Err(ProtocolError::UnknownCommand(other).into()),
            None => Err(ServerError::NotProcessing(conn.state())),
        };

        if let Err(e) = result {
            tracing::warn!("Closing connection {}: {}", conn.remote_address(), e);
            conn.close();
        }
    }

    async fn process_login(&self, conn: &mut Connection) -> Result<(), ServerError> {
        let request = conn.request();
        if request.len() != LOGIN_REQUEST_SIZE {
            return Err(ProtocolError::InvalidPayloadSize {
                expected: LOGIN_REQUEST_SIZE,
                actual: request.len(),
            }
            .into());
        }

        let mut reader = WireReader::new(request);
        reader.read_u8();
        let terminal_type = reader.read_u16();
        let terminal_version = reader.read_u16();
        reader.skip(SIGNATURES_SIZE);
        let mut block = Zeroizing::new([0u8; LOGIN_RSA_BLOCK_SIZE]);
        reader.read_bytes(&mut block[..]);
        if reader.overflowed() {
            return Err(ProtocolError::Overflow("login request").into());
        }

        self.decryptor.decrypt_in_place(&mut block[..])?;

        let mut reader = WireReader::new(&block[..]);
        reader.read_u8();
        let key = XteaKey::new([
            reader.read_u32(),
            reader.read_u32(),
            reader.read_u32(),
            reader.read_u32(),
        ]);
        let account_id = reader.read_u32();
        let password = Zeroizing::new(reader.read_string_bounded(MAX_PASSWORD_LENGTH + 1));
        if reader.overflowed() {
            return Err(ProtocolError::Overflow("login credentials").into());
        }

        conn.set_key(key);

        // Account numbers are positive signed 32-bit values.
        if account_id == 0 || account_id > i32::MAX as u32 {
            return send_login_error(conn, message::ACCOUNT_NUMBER_REQUIRED);
        }

        if !self.client.accepts(terminal_type, terminal_version) {
            tracing::debug!(
                "Connection {} uses terminal {} version {}",
                conn.remote_address(),
                terminal_type,
                terminal_version
            );
            return send_login_error(conn, message::TERMINAL_TOO_OLD);
        }

        let ip = match conn.ip() {
            Some(ip) => ip.to_string(),
            None => return Err(ServerError::NotProcessing(conn.state())),
        };

        match self.query.login_account(account_id, &password, &ip).await {
            Ok(AccountLogin::Granted {
                characters,
                premium_days,
            }) => {
                tracing::debug!(
                    "Account {} logged in from {} with {} characters",
                    account_id,
                    conn.remote_address(),
                    characters.len()
                );
                self.send_character_list(conn, &characters, premium_days)
            }
            Ok(AccountLogin::Denied(denial)) => {
                tracing::debug!("Account {} login refused: {:?}", account_id, denial);
                send_login_error(conn, denial_message(denial))
            }
            Err(e) => {
                tracing::error!("Account login query for {} failed: {}", account_id, e);
                send_login_error(conn, message::INTERNAL_ERROR)
            }
        }
    }

    fn send_character_list(
        &self,
        conn: &mut Connection,
        characters: &[Character],
        premium_days: u16,
    ) -> Result<(), ServerError> {
        let motd = self.motd.as_deref();
        let count = characters.len().min(u8::MAX as usize);
        conn.send_encrypted(|writer| {
            if let Some(motd) = motd {
                writer.write_u8(tag::MOTD);
                writer.write_string(motd);
            }

            writer.write_u8(tag::CHARACTER_LIST);
            writer.write_u8(count as u8);
            for character in &characters[..count] {
                writer.write_string(&character.name);
                writer.write_string(&character.world_name);
                writer.write_u32_be(u32::from(character.world_address));
                writer.write_u16(character.world_port);
            }
            writer.write_u16(premium_days);
        })
    }

    async fn process_status(&self, conn: &mut Connection) -> Result<(), ServerError> {
        if let Some(ip) = conn.ip() {
            if !self.rate_limiter.allow(ip) {
                return Err(ServerError::RateLimited);
            }
        }

        let mut reader = WireReader::new(conn.request());
        reader.read_u8();
        let format = reader.read_u8();
        if format != STATUS_FORMAT_XML {
            return Err(ProtocolError::UnsupportedStatusFormat(format).into());
        }

        let request: [u8; 4] = reader.read_array();
        if !request.eq_ignore_ascii_case(b"info") {
            return Err(ProtocolError::UnsupportedStatusRequest(
                String::from_utf8_lossy(&request).into_owned(),
            )
            .into());
        }

        let document = self.status.get().await;
        conn.send_raw(&document)
    }
}

fn send_login_error(conn: &mut Connection, text: &str) -> Result<(), ServerError> {
    conn.send_encrypted(|writer| {
        writer.write_u8(tag::LOGIN_ERROR);
        writer.write_string(text);
    })
}
