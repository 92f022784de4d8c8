use std::sync::Arc;

use ste_engine::Engine;
use ste_engine::blob::{BlobClient, InMemoryBlobClient, RetryingClient, SharedBlobClient};

use crate::config::{BlobClientKind, Config};

pub type ServiceState = Arc<State>;

pub struct State {
    pub config: Config,
    pub engine: Engine,
}

impl State {
    pub async fn new(config: Config) -> anyhow::Result<ServiceState> {
        match config.blob_client {
            BlobClientKind::Memory => {
                let client = InMemoryBlobClient::new();
                Self::with_client(config, client).await
            }
        }
    }

    /// Builds the state around a caller-provided blob client, wrapping it
    /// with the configured retry policy.
    pub async fn with_client<C: BlobClient>(
        config: Config,
        client: C,
    ) -> anyhow::Result<ServiceState> {
        let client: SharedBlobClient =
            Arc::new(RetryingClient::new(client, config.retry.to_options()));
        let engine = Engine::spawn(config.engine_config(), client).await?;

        Ok(Arc::new(Self { config, engine }))
    }
}
