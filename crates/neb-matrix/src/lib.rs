//! Matrix client-server API adapter.
//!
//! Implements the core's protocol and client-factory ports over plain HTTP
//! (`/_matrix/client/v3`). End-to-end encryption is not provided here:
//! [`NoGroupCrypto`] makes encrypted rooms fail closed.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use neb_core::{
    domain::ClientConfig,
    errors::Error,
    ports::{ClientFactory, ClientParts},
    Result,
};
use tracing::info;

pub mod client;
pub mod crypto;
pub mod sync;

pub use client::MatrixClient;
pub use crypto::NoGroupCrypto;

/// Builds one [`MatrixClient`] per identity, sharing a connection pool.
#[derive(Clone)]
pub struct MatrixClientFactory {
    http: reqwest::Client,
    sync_timeout: Duration,
}

impl MatrixClientFactory {
    pub fn new(http_timeout: Duration, sync_timeout: Duration) -> Result<Self> {
        // Long polls carry their own per-request timeout.
        let http = reqwest::Client::builder()
            .connect_timeout(http_timeout)
            .user_agent(concat!("neb/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self { http, sync_timeout })
    }
}

#[async_trait]
impl ClientFactory for MatrixClientFactory {
    async fn create(&self, config: &ClientConfig) -> Result<ClientParts> {
        let client = MatrixClient::new(config, self.http.clone(), self.sync_timeout)?;
        info!(
            user_id = %config.user_id,
            homeserver = %config.homeserver_url,
            device_id = %config.device_id,
            "matrix client created"
        );
        Ok(ClientParts {
            client: Arc::new(client),
            crypto: Arc::new(NoGroupCrypto),
        })
    }
}
