use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use storepay::application::callback::CallbackHandler;
use storepay::application::checkout::CheckoutInitiator;
use storepay::application::sweeper::{DEFAULT_SWEEP_LIMIT, ReconciliationSweeper};
use storepay::config::AppConfig;
use storepay::domain::ports::{ClockRef, OrderStoreRef};
use storepay::gateway::GatewayClient;
use storepay::infrastructure::clock::SystemClock;
use storepay::infrastructure::in_memory::{
    InMemoryCartStore, InMemoryCatalog, InMemoryOrderStore, StorefrontSeed,
};
use storepay::interfaces::csv::sweep_writer::SweepWriter;
use storepay::interfaces::http::{AppState, router};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile pending orders with the gateway once and print the results as CSV.
    Sync {
        /// Maximum number of pending orders to check, oldest first.
        #[arg(long, default_value_t = DEFAULT_SWEEP_LIMIT)]
        limit: usize,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Serve checkout, the gateway callback endpoints, and the operator endpoints.
    Serve {
        /// Address to listen on. Defaults to BIND_ADDR.
        #[arg(long)]
        bind: Option<String>,

        /// JSON file with the products, shipping methods, and carts to serve.
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `sync` output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().into_diagnostic()?;
    let gateway = Arc::new(GatewayClient::new(config.gateway.clone()).into_diagnostic()?);
    let clock: ClockRef = Arc::new(SystemClock);

    match cli.command {
        Commands::Sync { limit, db_path } => {
            let orders = open_order_store(db_path)?;
            let sweeper = ReconciliationSweeper::new(orders, gateway, clock);
            let report = sweeper.sweep(limit).await.into_diagnostic()?;

            let stdout = io::stdout();
            let mut writer = SweepWriter::new(stdout.lock());
            writer.write_results(&report.results).into_diagnostic()?;
            eprintln!("processed={} updated={}", report.processed, report.updated);
        }
        Commands::Serve {
            bind,
            catalog: seed_path,
            db_path,
        } => {
            let orders = open_order_store(db_path)?;
            let catalog = Arc::new(InMemoryCatalog::new());
            let carts = Arc::new(InMemoryCartStore::new());
            if let Some(path) = seed_path {
                StorefrontSeed::from_path(&path)
                    .into_diagnostic()?
                    .load_into(&catalog, &carts)
                    .await;
                info!(path = %path.display(), "Storefront catalog loaded");
            }

            let state = AppState {
                orders: orders.clone(),
                checkout: Arc::new(CheckoutInitiator::new(
                    orders.clone(),
                    carts,
                    catalog,
                    gateway.clone(),
                    clock.clone(),
                    config.public_base_url.clone(),
                )),
                callbacks: Arc::new(CallbackHandler::new(
                    orders.clone(),
                    gateway.clone(),
                    clock.clone(),
                )),
                sweeper: Arc::new(ReconciliationSweeper::new(orders, gateway, clock)),
            };

            let addr = bind.unwrap_or(config.bind_addr);
            let listener = tokio::net::TcpListener::bind(&addr).await.into_diagnostic()?;
            info!(%addr, public_base_url = %config.public_base_url, "Listening");
            axum::serve(listener, router(state)).await.into_diagnostic()?;
        }
    }

    Ok(())
}

fn open_order_store(db_path: Option<PathBuf>) -> Result<OrderStoreRef> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = storepay::infrastructure::rocksdb::RocksDBStore::open(path).into_diagnostic()?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Arc::new(InMemoryOrderStore::new()))
        }
        None => Ok(Arc::new(InMemoryOrderStore::new())),
    }
}
