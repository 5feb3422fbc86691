use clap::Parser;
use miette::{IntoDiagnostic, Result};
use paycore::application::Orchestrator;
use paycore::config::Settings;
use paycore::domain::ports::{SharedClock, SharedLedgerStore, SharedTransactionStore};
use paycore::infrastructure::clock::SystemClock;
use paycore::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryTransactionStore};
use paycore::infrastructure::notifier::LogNotifier;
use paycore::interfaces::batch::BatchRunner;
use paycore::interfaces::csv::operation_reader::OperationReader;
use paycore::interfaces::csv::wallet_writer::WalletWriter;
use paycore::telemetry;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file
    input: PathBuf,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.json_logs);

    let settings = Settings::load(cli.config.as_deref()).into_diagnostic()?;
    let clock: SharedClock = Arc::new(SystemClock);
    let (ledger, transactions) = open_stores(cli.db_path, clock.clone())?;
    let gateway = settings.build_gateway(clock.clone()).into_diagnostic()?;

    let orchestrator = Arc::new(Orchestrator::new(
        ledger,
        transactions,
        gateway,
        clock,
        settings.orchestrator_config(),
    ));
    let runner = BatchRunner::new(orchestrator, Arc::new(LogNotifier));

    let file = File::open(cli.input).into_diagnostic()?;
    for operation in OperationReader::new(file).operations() {
        match operation {
            Ok(operation) => {
                if let Err(e) = runner.apply(operation).await {
                    eprintln!("Error processing operation: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading operation: {}", e);
            }
        }
    }

    runner.finish(Duration::from_secs(5)).await;

    let wallets = runner.report().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(wallets).into_diagnostic()?;

    Ok(())
}

fn in_memory_stores(clock: SharedClock) -> (SharedLedgerStore, SharedTransactionStore) {
    (
        Arc::new(InMemoryLedgerStore::with_clock(clock)),
        Arc::new(InMemoryTransactionStore::new()),
    )
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(
    db_path: Option<PathBuf>,
    clock: SharedClock,
) -> Result<(SharedLedgerStore, SharedTransactionStore)> {
    use paycore::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            let store = RocksDBStore::open_with_clock(path, clock).into_diagnostic()?;
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory_stores(clock)),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(
    db_path: Option<PathBuf>,
    clock: SharedClock,
) -> Result<(SharedLedgerStore, SharedTransactionStore)> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_stores(clock))
}
