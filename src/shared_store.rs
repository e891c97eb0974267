//! Lazily connected handle to the shared Redis store.
//!
//! Both the rate limiter and the recent-key store talk to the same Redis
//! deployment. Connecting is deferred to the first command so that building
//! a router never blocks on the network and a store that is down at startup
//! only degrades admission instead of preventing the service from booting.

use {
    crate::Result,
    redis::{Client, aio::ConnectionManager},
    std::sync::Arc,
    tokio::sync::OnceCell,
};

#[derive(Clone)]
pub struct SharedStore {
    client: Client,
    conn: Arc<OnceCell<ConnectionManager>>,
}

impl SharedStore {
    /// Parses the URL without connecting.
    pub fn open(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client,
            conn: Arc::new(OnceCell::new()),
        })
    }

    /// Returns a cloneable multiplexed connection, connecting on first use.
    /// A failed connect is retried on the next call.
    pub async fn connection(&self) -> Result<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                tracing::info!("Connecting to shared rate-limit store");
                self.client.get_connection_manager().await
            })
            .await?;
        Ok(conn.clone())
    }
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore")
            .field("connected", &self.conn.initialized())
            .finish()
    }
}
