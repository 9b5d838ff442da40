use booking_payments::api;
use booking_payments::app::App;
use booking_payments::config::AppConfig;
use booking_payments::database::{
    init_pool_from_config, run_migrations, InMemoryOrderStore, OrderStore, PgOrderStore,
};
use booking_payments::logging::init_tracing;
use booking_payments::payments::factory::PaymentProviderFactory;
use booking_payments::services::LoggingNotifier;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = config.payments.environment.as_str(),
        "🚀 Starting booking payments service"
    );

    let store: Arc<dyn OrderStore> = match &config.database {
        Some(database) if !config.skip_externals => {
            info!("📊 Initializing database connection pool...");
            let pool = init_pool_from_config(database).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "✅ Database connection pool initialized"
            );
            if database.run_migrations {
                run_migrations(&pool).await?;
            }
            Arc::new(PgOrderStore::new(pool))
        }
        _ => {
            info!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true), using in-memory store");
            Arc::new(InMemoryOrderStore::new())
        }
    };

    let factory = Arc::new(PaymentProviderFactory::from_env().map_err(|e| {
        error!("❌ Failed to configure payment gateways: {}", e);
        e
    })?);
    let unrestricted = factory.gateways_without_callback_ips();
    if !unrestricted.is_empty() {
        if config.payments.enforce_callback_ips() {
            anyhow::bail!(
                "callback IP allow-list is empty for: {:?}",
                unrestricted
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
            );
        }
        warn!(
            providers = ?unrestricted,
            "callback IP allow-list empty, source addresses are only logged"
        );
    }
    info!(
        providers = ?factory.list_available_providers(),
        "✅ Payment gateways configured"
    );

    let app = App::assemble(
        store,
        factory,
        Arc::new(LoggingNotifier::new()),
        &config.payments,
    );

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let mut handles = vec![tokio::spawn(
        app.side_effect_worker.run(worker_shutdown_rx.clone()),
    )];
    if config.payments.sweeper_enabled {
        handles.push(tokio::spawn(app.sweeper.run(worker_shutdown_rx)));
    } else {
        info!("Session sweeper disabled");
    }

    let router = api::router(app.state);
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
    .await?;

    let _ = worker_shutdown_tx.send(true);
    for handle in handles {
        if tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            error!("Timed out waiting for worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
