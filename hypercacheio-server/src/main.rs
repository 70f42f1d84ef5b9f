use clap::Parser;
use hypercacheio_server::{Config, Server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let config = Config::parse();

    let server = match Server::boot(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "failed to boot hypercacheio-server");
            std::process::exit(1);
        }
    };

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let run = tokio::spawn(async move {
        if let Err(e) = server.run(ready_tx).await {
            tracing::error!(error = %e, "server exited with an error");
            std::process::exit(1);
        }
    });

    if let Ok(addr) = ready_rx.await {
        tracing::info!(addr = %addr, "hypercacheio-server ready");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl_c, shutting down");
        }
        result = run => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server task panicked");
                std::process::exit(1);
            }
        }
    }
}
