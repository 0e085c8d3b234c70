//! Application state shared across handlers.

use std::sync::Arc;

use thiserror::Error;

use crate::config::ServiceConfig;
use crate::dutchned::{DutchNedClient, DutchNedError};
use crate::kv::SharedKv;
use crate::services::error_handling::CircuitConfig;
use crate::services::{ErrorHandlingService, MetafieldService, Pipeline, TokenStore};
use crate::shopify::{AdminClient, AdminShopifyError};

/// Errors that can occur while building application state.
#[derive(Debug, Error)]
pub enum StateError {
    /// The Shopify Admin API client could not be built.
    #[error("failed to build Shopify client: {0}")]
    Shopify(#[from] AdminShopifyError),

    /// The `DutchNed` client could not be built.
    #[error("failed to build DutchNed client: {0}")]
    DutchNed(#[from] DutchNedError),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// the KV store, the API clients and the processing pipeline.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServiceConfig,
    kv: SharedKv,
    shopify: AdminClient,
    dutchned: DutchNedClient,
    pipeline: Pipeline,
}

impl AppState {
    /// Create a new application state with clients built from `config`.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if an HTTP client fails to build.
    pub fn new(config: ServiceConfig, kv: SharedKv) -> Result<Self, StateError> {
        let shopify = AdminClient::new(&config.shopify)?;
        let metafields = MetafieldService::new(shopify.clone(), &config.shopify.metafield_namespace);
        Self::with_clients(config, kv, shopify, metafields)
    }

    /// Create application state around prebuilt Shopify clients.
    ///
    /// Used by tests that point the Admin API at a mock server.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the `DutchNed` client fails to build.
    pub fn with_clients(
        config: ServiceConfig,
        kv: SharedKv,
        shopify: AdminClient,
        metafields: MetafieldService,
    ) -> Result<Self, StateError> {
        let dutchned = DutchNedClient::new(&config.dutchned)?;
        let tokens = TokenStore::new(kv.clone());
        let errors = ErrorHandlingService::new(kv.clone(), CircuitConfig::from(&config.pipeline));
        let pipeline = Pipeline::new(
            kv.clone(),
            tokens,
            metafields,
            errors,
            config.pipeline.clone(),
            config.shopify.api_secret.clone(),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                kv,
                shopify,
                dutchned,
                pipeline,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn kv(&self) -> &SharedKv {
        &self.inner.kv
    }

    #[must_use]
    pub fn shopify(&self) -> &AdminClient {
        &self.inner.shopify
    }

    #[must_use]
    pub fn dutchned(&self) -> &DutchNedClient {
        &self.inner.dutchned
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        self.inner.pipeline.tokens()
    }

    #[must_use]
    pub fn errors(&self) -> &ErrorHandlingService {
        self.inner.pipeline.errors()
    }
}
