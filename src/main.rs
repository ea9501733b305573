use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use voltcart_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::AppConfig::load().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone())),
        )
        .init();

    let db_pool = api::db::establish_connection(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(process_events(event_rx));

    let clock: api::clock::SharedClock = Arc::new(api::clock::SystemClock);

    let warranties = Arc::new(api::services::warranties::WarrantyService::new(
        db.clone(),
        event_sender.clone(),
        clock.clone(),
        cfg.warranty_code_prefix.clone(),
    ));
    let orders = Arc::new(api::services::orders::OrderService::new(
        db.clone(),
        event_sender.clone(),
        warranties.clone(),
        clock.clone(),
    ));
    let returns = Arc::new(api::services::returns::ReturnService::new(
        db.clone(),
        event_sender.clone(),
        warranties.clone(),
        clock.clone(),
        cfg.return_window_days,
    ));

    let services = api::handlers::AppServices {
        orders,
        returns,
        warranties,
    };

    let app_state = api::AppState {
        db: db.clone(),
        config: cfg.clone(),
        event_sender,
        services,
    };

    let app = api::handlers::router(app_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(TimeoutLayer::new(Duration::from_secs(
                cfg.request_timeout_secs,
            ))),
    );

    let addr: SocketAddr = cfg.bind_address().parse()?;
    info!("voltcart-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Drains in-process events. The audit trail is already durable by the time
/// an event lands here; this consumer only feeds telemetry.
async fn process_events(mut rx: mpsc::Receiver<api::events::Event>) {
    while let Some(event) = rx.recv().await {
        info!(?event, "domain event");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
