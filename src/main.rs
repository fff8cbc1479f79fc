use credit_ledger_engine::api::AppState;
use credit_ledger_engine::config::AppConfig;
use credit_ledger_engine::database::invoice_repository::InvoiceStore;
use credit_ledger_engine::database::marketplace_repository::MarketplaceStore;
use credit_ledger_engine::database::memory::InMemoryStore;
use credit_ledger_engine::health::HealthChecker;
use credit_ledger_engine::ledger::{CreditLedger, LedgerStore};
use credit_ledger_engine::logging::init_tracing;
use credit_ledger_engine::payments::providers::AcquirerGateway;
use credit_ledger_engine::payments::signature::WebhookVerifier;
use credit_ledger_engine::payments::PaymentGateway;
use credit_ledger_engine::services::{MarketplaceService, NotificationReconciler, PaymentService};
use credit_ledger_engine::workers::invoice_sweep::{InvoiceSweepConfig, InvoiceSweepWorker};
use std::net::SocketAddr;
use std::sync::Arc;
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
            Ok(mut stream) => {
                stream.recv().await;
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

struct Stores {
    invoices: Arc<dyn InvoiceStore>,
    ledger: Arc<dyn LedgerStore>,
    marketplace: Arc<dyn MarketplaceStore>,
    health_checker: HealthChecker,
}

fn in_memory_stores() -> Stores {
    let store = Arc::new(InMemoryStore::new());
    Stores {
        invoices: store.clone(),
        ledger: store.clone(),
        marketplace: store,
        health_checker: HealthChecker::in_memory(),
    }
}

#[cfg(feature = "database")]
async fn stores(config: &AppConfig) -> anyhow::Result<Stores> {
    use credit_ledger_engine::database::invoice_repository::PgInvoiceRepository;
    use credit_ledger_engine::database::ledger_repository::PgLedgerRepository;
    use credit_ledger_engine::database::marketplace_repository::PgMarketplaceRepository;

    let Some(db_config) = &config.database else {
        info!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true), using in-memory stores");
        return Ok(in_memory_stores());
    };

    info!("📊 Initializing database connection pool...");
    let pool = credit_ledger_engine::database::init_pool_from_config(db_config)
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            e
        })?;
    info!(
        max_connections = pool.options().get_max_connections(),
        "✅ Database connection pool initialized"
    );

    Ok(Stores {
        invoices: Arc::new(PgInvoiceRepository::new(pool.clone())),
        ledger: Arc::new(PgLedgerRepository::new(pool.clone())),
        marketplace: Arc::new(PgMarketplaceRepository::new(pool.clone())),
        health_checker: HealthChecker::with_database(pool),
    })
}

#[cfg(not(feature = "database"))]
async fn stores(config: &AppConfig) -> anyhow::Result<Stores> {
    if config.database.is_some() {
        warn!("built without the database feature, using in-memory stores");
    }
    Ok(in_memory_stores())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        skip_externals = config.skip_externals,
        "🚀 Starting credit ledger service"
    );

    info!(
        host = %config.server.host,
        port = config.server.port,
        gateway = %config.gateway.base_url,
        "Server configuration loaded"
    );

    let stores = stores(&config).await?;

    if config.gateway.webhook_secret.is_none() {
        warn!("GATEWAY_WEBHOOK_SECRET not set, every webhook will be rejected");
    }
    let gateway: Arc<dyn PaymentGateway> = Arc::new(AcquirerGateway::new(config.gateway.acquirer())?);
    let verifier = WebhookVerifier::new(
        config.gateway.webhook_secret.clone(),
        config.gateway.signature_scheme,
    );

    let ledger = CreditLedger::new(stores.ledger.clone());
    let reconciler = Arc::new(NotificationReconciler::new(
        stores.invoices.clone(),
        ledger.clone(),
        gateway.clone(),
        verifier,
    ));
    let payments = Arc::new(PaymentService::new(
        stores.invoices.clone(),
        gateway,
        reconciler.clone(),
        config.gateway.return_url.clone(),
    ));
    let marketplace = MarketplaceService::new(
        stores.marketplace.clone(),
        ledger.clone(),
        config.ledger.platform_user_id,
    );
    if config.ledger.platform_user_id.is_nil() {
        warn!("PLATFORM_USER_ID not set, platform fees go to the nil wallet");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweep_config = InvoiceSweepConfig::from_env();
    let sweep_handle = if sweep_config.is_enabled() {
        let worker = InvoiceSweepWorker::new(stores.invoices.clone(), reconciler.clone(), sweep_config);
        Some(tokio::spawn(worker.run(shutdown_rx.clone())))
    } else {
        info!("⏭️  Invoice sweep disabled (INVOICE_SWEEP_TIMEOUT_SECS not set)");
        None
    };

    let app = credit_ledger_engine::app(AppState {
        payments,
        reconciler,
        ledger,
        marketplace,
        health_checker: stores.health_checker,
    });

    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🌐 Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx))
        .await?;

    if let Some(handle) = sweep_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "invoice sweep worker panicked");
        }
    }

    info!("👋 Server shut down");
    Ok(())
}
