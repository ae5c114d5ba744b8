//! Service-node entrypoint.
//!
//! Startup order: configuration → logging → database → signer → chain
//! clients → plugin resolution → node-registration reconciliation → queue
//! purge and bid-task seeding → task workers → HTTP server. Any failure
//! before the server is up exits non-zero.

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use pantos_service_node::bid_engine;
use pantos_service_node::config::Config;
use pantos_service_node::context::Context;
use pantos_service_node::node::NodeRegistrar;
use pantos_service_node::scheduler::{self, BIDS_QUEUE, TaskRegistry};
use pantos_service_node::store::TaskStore as _;
use pantos_service_node::transfers;
use pantos_service_node::{handlers, telemetry};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("unable to load the configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let _telemetry = match telemetry::init(&config.application.log, config.application.debug) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("unable to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let ctx = match Context::initialize(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "unable to initialize the service node");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = NodeRegistrar::new(Arc::clone(&ctx))
        .update_node_registrations()
        .await
    {
        tracing::error!(error = %e, "unable to update the service node registrations");
        return ExitCode::FAILURE;
    }

    // Stale bid ticks from a previous run must not pile up.
    match ctx.tasks.purge_queue(BIDS_QUEUE).await {
        Ok(purged) if purged > 0 => tracing::info!(purged, "purged the bids queue"),
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, "unable to purge the bids queue");
            return ExitCode::FAILURE;
        }
    }
    if let Err(e) = bid_engine::seed_bid_tasks(&ctx).await {
        tracing::error!(error = %e, "unable to seed the bid tasks");
        return ExitCode::FAILURE;
    }

    let mut registry = TaskRegistry::default();
    transfers::register_tasks(&mut registry);
    bid_engine::register_tasks(&mut registry);
    let cancel = CancellationToken::new();
    let workers = scheduler::spawn_workers(Arc::clone(&ctx), Arc::new(registry), cancel.clone());

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(Arc::clone(&ctx)))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(ctx.config.application.host, ctx.config.application.port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!("starting server at http://{addr}");

    let shutdown = cancel.clone();
    let graceful_shutdown = async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(_) => std::future::pending().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    };

    let served = axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(graceful_shutdown)
        .await;

    cancel.cancel();
    for worker in workers {
        let _ = worker.await;
    }

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server error");
            ExitCode::FAILURE
        }
    }
}
