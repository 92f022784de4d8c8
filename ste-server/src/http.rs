//! The control-plane HTTP listener.

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal::unix::SignalKind;

use crate::config::Config;
use crate::endpoints;
use crate::state::State;

/// Runs the control-plane server until termination is requested.
pub async fn server(config: Config) -> Result<()> {
    let addr = config.control_addr;
    let state = State::new(config).await?;

    let app = endpoints::routes().with_state(state).into_make_service();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control listener on {addr}"))?;
    tracing::info!("control plane listening on {addr}");

    let shutdown = elegant_departure::tokio::depart()
        .on_termination()
        .on_sigint()
        .on_signal(SignalKind::hangup())
        .on_signal(SignalKind::quit());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown.await;
        })
        .await?;

    tracing::info!("control plane shut down");
    Ok(())
}
