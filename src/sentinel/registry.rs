use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::sync::RwLock;
use tracing::debug;

use super::error::StoreError;
use super::types::{WatchedAddress, Watchlist};

/// Source of the custodial addresses currently eligible for credit
#[async_trait]
pub trait AddressRegistry: Send + Sync {
    async fn active_watched_addresses(&self) -> Result<Watchlist, StoreError>;
}

/// Fixed watchlist (config file or tests). Replaceable at runtime.
#[derive(Default)]
pub struct StaticAddressRegistry {
    addresses: RwLock<Vec<WatchedAddress>>,
}

impl StaticAddressRegistry {
    pub fn new(addresses: Vec<WatchedAddress>) -> Self {
        Self {
            addresses: RwLock::new(addresses),
        }
    }

    pub fn replace(&self, addresses: Vec<WatchedAddress>) {
        if let Ok(mut guard) = self.addresses.write() {
            *guard = addresses;
        }
    }
}

#[async_trait]
impl AddressRegistry for StaticAddressRegistry {
    async fn active_watched_addresses(&self) -> Result<Watchlist, StoreError> {
        let addresses = self
            .addresses
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default();
        Ok(Watchlist::new(addresses))
    }
}

/// Reads the `watched_addresses` table owned by the wallet service
pub struct PgAddressRegistry {
    pool: PgPool,
    chain_id: String,
}

impl PgAddressRegistry {
    pub fn new(pool: PgPool, chain_id: &str) -> Self {
        Self {
            pool,
            chain_id: chain_id.to_string(),
        }
    }
}

#[async_trait]
impl AddressRegistry for PgAddressRegistry {
    async fn active_watched_addresses(&self) -> Result<Watchlist, StoreError> {
        let rows = sqlx::query(
            r#"SELECT address, user_id FROM watched_addresses
               WHERE chain_id = $1 AND active"#,
        )
        .bind(&self.chain_id)
        .fetch_all(&self.pool)
        .await?;

        let addresses = rows
            .iter()
            .map(|r| -> Result<WatchedAddress, sqlx::Error> {
                Ok(WatchedAddress {
                    address: r.try_get::<String, _>("address")?.to_lowercase(),
                    user_id: r.try_get("user_id")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        debug!(chain_id = %self.chain_id, count = addresses.len(), "Loaded watched addresses");
        Ok(Watchlist::new(addresses))
    }
}
