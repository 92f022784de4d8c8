use anyhow::Result;

use ste_server::config::Config;
use ste_server::{http, observability};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    observability::initialize_tracing(&config);
    tracing::debug!(?config);

    http::server(config).await
}
