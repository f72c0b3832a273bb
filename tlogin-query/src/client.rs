//! High-level query manager API.

use crate::connection::{QueryConfig, QueryConnection};
use crate::error::QueryError;
use crate::query::{parse_account_login, select_world, AccountLogin, QueryType, World};
use tlogin_protocol::finish_frame;
use tokio::sync::Mutex;

/// Shared handle to the query manager link.
///
/// Every query holds the link for its whole exchange, so at most one
/// request is in flight at a time.
pub struct QueryClient {
    conn: Mutex<QueryConnection>,
}

impl QueryClient {
    /// Creates a new client with the given configuration.
    pub fn new(config: QueryConfig) -> Self {
        Self {
            conn: Mutex::new(QueryConnection::new(config)),
        }
    }

    /// Establishes the link.
    pub async fn connect(&self) -> Result<(), QueryError> {
        self.conn.lock().await.connect().await
    }

    /// Returns whether the link is established.
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_connected()
    }

    /// Drops the link. The next query reconnects.
    pub async fn disconnect(&self) {
        self.conn.lock().await.disconnect();
    }

    /// Validates account credentials and fetches the character list.
    pub async fn login_account(
        &self,
        account_id: u32,
        password: &str,
        ip_address: &str,
    ) -> Result<AccountLogin, QueryError> {
        let mut conn = self.conn.lock().await;
        let mut writer = conn.prepare(QueryType::LoginAccount);
        writer.write_u32(account_id);
        writer.write_string(password);
        writer.write_string(ip_address);
        let request_len = finish_frame(&mut writer)?;

        let mut response = conn.execute(request_len, true).await?;
        parse_account_login(response.status, &mut response.reader)
    }

    /// Fetches the world list and picks `name`, or the busiest world when
    /// `name` is empty. `Ok(None)` means the query worked but no world
    /// matched.
    pub async fn get_world(&self, name: &str) -> Result<Option<World>, QueryError> {
        let mut conn = self.conn.lock().await;
        let mut writer = conn.prepare(QueryType::GetWorlds);
        let request_len = finish_frame(&mut writer)?;

        let mut response = conn.execute(request_len, true).await?;
        select_world(response.status, &mut response.reader, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation() {
        let client = QueryClient::new(QueryConfig::default());
        assert!(!client.is_connected().await);
    }
}
