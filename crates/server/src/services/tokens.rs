//! Shop access token storage.

use chrono::{DateTime, Utc};
use delivery_dates_core::ShopDomain;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::kv::{self, KvError, SharedKv, keys};

/// Most shops [`TokenStore::list_shops`] returns.
const MAX_SHOPS: usize = 10_000;

/// A shop's offline access token.
#[derive(Clone, Serialize, Deserialize)]
pub struct ShopToken {
    pub shop: ShopDomain,
    pub access_token: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub installed_at: DateTime<Utc>,
}

impl std::fmt::Debug for ShopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopToken")
            .field("shop", &self.shop)
            .field("access_token", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .field("installed_at", &self.installed_at)
            .finish()
    }
}

/// Token repository over KV (`token:{shop}`).
#[derive(Clone)]
pub struct TokenStore {
    kv: SharedKv,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}

impl TokenStore {
    #[must_use]
    pub fn new(kv: SharedKv) -> Self {
        Self { kv }
    }

    /// Save or replace the shop's token.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the write fails.
    #[instrument(skip(self, access_token))]
    pub async fn save(
        &self,
        shop: &ShopDomain,
        access_token: &str,
        scopes: Vec<String>,
    ) -> Result<ShopToken, KvError> {
        let token = ShopToken {
            shop: shop.clone(),
            access_token: access_token.to_string(),
            scopes,
            installed_at: Utc::now(),
        };
        kv::put_json(self.kv.as_ref(), &keys::token(shop), &token, None).await?;
        tracing::info!("Stored access token");
        Ok(token)
    }

    /// Get the shop's token, if installed.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the read fails or the record is corrupt.
    pub async fn get(&self, shop: &ShopDomain) -> Result<Option<ShopToken>, KvError> {
        kv::get_json(self.kv.as_ref(), &keys::token(shop)).await
    }

    /// Remove the shop's token. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, shop: &ShopDomain) -> Result<bool, KvError> {
        let removed = self.kv.delete(&keys::token(shop)).await?;
        if removed {
            tracing::info!("Removed access token");
        }
        Ok(removed)
    }

    /// Shops with a stored token, sorted.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if listing fails.
    pub async fn list_shops(&self) -> Result<Vec<ShopDomain>, KvError> {
        let entries = self.kv.list(keys::TOKEN_PREFIX, MAX_SHOPS).await?;
        Ok(entries
            .iter()
            .filter_map(|k| k.strip_prefix(keys::TOKEN_PREFIX))
            .filter_map(|s| ShopDomain::parse(s).ok())
            .collect())
    }
}
