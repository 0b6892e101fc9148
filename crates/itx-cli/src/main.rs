use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use itx_data::store::Store;
use itx_data::{HostRange, Transaction};
use itx_pipeline::config::{parse_hosts, PipelineConfig, HOSTS_ENV};
use itx_pipeline::Pipeline;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// Transactions written per import batch.
const IMPORT_BATCH: usize = 5_000;

#[derive(Parser, Debug)]
#[command(name = "itx-extract")]
#[command(about = "Extract and classify internal transactions from trace_block")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[arg(long, global = true, default_value = "data/itx.sqlite")]
    db_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load transaction documents (one JSON object per line) into the store.
    Import(ImportArgs),
    /// Run one extraction pass over all untraced blocks.
    Extract(ExtractArgs),
    /// Show trace coverage of the store.
    Status,
}

#[derive(Args, Debug)]
struct ImportArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Trace endpoint range `<lower>..<upper>=<url>`; repeat for several nodes.
    #[arg(long = "host", value_name = "RANGE")]
    hosts: Vec<HostRange>,

    /// Concurrent fetch workers.
    #[arg(long, default_value_t = 10)]
    workers: usize,

    /// Blocks per progress chunk (defaults to 10 × workers).
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Transactions per store batch.
    #[arg(long, default_value_t = 1000)]
    page_size: usize,

    /// Timeout in seconds for one endpoint batch.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    match cli.command {
        Commands::Import(args) => handle_import(&cli.db_path, args),
        Commands::Extract(args) => handle_extract(&cli.db_path, args, cli.quiet).await,
        Commands::Status => handle_status(&cli.db_path),
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn open_store(db_path: &str) -> Result<Store> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Store::new(db_path).wrap_err("failed to open SQLite store")
}

fn handle_import(db_path: &str, args: ImportArgs) -> Result<()> {
    let store = open_store(db_path)?;
    let file = std::fs::File::open(&args.file)
        .wrap_err_with(|| format!("failed to open {}", args.file.display()))?;

    let mut batch = Vec::with_capacity(IMPORT_BATCH);
    let mut imported = 0;
    for (line_number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.wrap_err_with(|| format!("failed to read {}", args.file.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let tx: Transaction = serde_json::from_str(trimmed).wrap_err_with(|| {
            format!("invalid transaction on line {}", line_number + 1)
        })?;
        batch.push(tx);

        if batch.len() == IMPORT_BATCH {
            imported += store.insert_transactions(&batch)?;
            batch.clear();
        }
    }
    imported += store.insert_transactions(&batch)?;

    info!(imported, file = %args.file.display(), db_path, "import finished");
    Ok(())
}

async fn handle_extract(db_path: &str, args: ExtractArgs, quiet: bool) -> Result<()> {
    let hosts = if args.hosts.is_empty() {
        let value = std::env::var(HOSTS_ENV)
            .map_err(|_| eyre!("no --host given and {HOSTS_ENV} is not set"))?;
        parse_hosts(&value)?
    } else {
        args.hosts
    };

    let mut config = PipelineConfig::new(hosts).with_workers(args.workers);
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    config.page_size = args.page_size;
    config.request_timeout = Duration::from_secs(args.timeout_secs);
    config.show_progress = !(args.no_progress || quiet);

    let store = open_store(db_path)?;
    let pipeline = Pipeline::http(&store, config)?;

    for range in &pipeline.config().hosts {
        info!(
            lower = ?range.lower,
            upper = ?range.upper,
            url = %range.url,
            "trace host configured"
        );
    }

    let report = pipeline.extract_traces().await?;
    if report.blocks_deferred > 0 {
        info!(
            blocks_deferred = report.blocks_deferred,
            "some blocks were deferred; run extract again to retry them"
        );
    }
    Ok(())
}

fn handle_status(db_path: &str) -> Result<()> {
    let store = open_store(db_path)?;
    let stats = store.stats().wrap_err("failed to query store statistics")?;

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);

    table.add_row(vec!["Database Path", db_path]);
    table.add_row(vec!["Transactions", &stats.transactions.to_string()]);
    table.add_row(vec![
        "Contract Transactions",
        &stats.contract_transactions.to_string(),
    ]);
    table.add_row(vec!["Traced", &stats.traced_transactions.to_string()]);
    table.add_row(vec![
        "Untraced (contract)",
        &stats.untraced_contract_transactions.to_string(),
    ]);
    table.add_row(vec![
        "Internal Transactions",
        &stats.internal_transactions.to_string(),
    ]);
    for (class, count) in &stats.by_class {
        let label = match class {
            Some(class) => format!("  {}", class.as_str()),
            None => "  UNCLASSIFIED".to_string(),
        };
        table.add_row(vec![label, count.to_string()]);
    }

    println!("\n{}\n", table);

    info!(
        transactions = stats.transactions,
        internal_transactions = stats.internal_transactions,
        db_path,
        "status command completed"
    );
    Ok(())
}
