mod config;
mod error;
pub(crate) mod registry;

use std::process::ExitCode;

use clap::Parser;
use config::Cli;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::registry::Registry;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cargobay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let registry = match Registry::new(&cli.datadir) {
        Ok(registry) => registry,
        Err(err) => {
            error!(%err, datadir = %cli.datadir.display(), "could not initialize storage");
            return ExitCode::FAILURE;
        }
    };

    let app = registry.make_router().layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(cli.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, addr = %cli.listen, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };

    info!(addr = %cli.listen, datadir = %cli.datadir.display(), "starting server");

    if let Err(err) = axum::serve(listener, app).await {
        error!(%err, "http server exited with error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
