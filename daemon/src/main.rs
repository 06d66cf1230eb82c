//! wavelet daemon: entry point for running a wavelet node.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use wavelet_node::{init_logging, wait_for_signal, Importer, LogFormat, NodeConfig, WaveletNode};
use wavelet_store_lmdb::LmdbStore;
use wavelet_types::Scheme;

#[derive(Parser)]
#[command(name = "wavelet-daemon", about = "wavelet peer-to-peer node daemon")]
struct Cli {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// Defaults to the config file value.
    #[arg(long, global = true, env = "WAVELET_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, global = true, env = "WAVELET_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Node operations.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },

    /// Record the transaction ids of a chain export and report duplicates.
    Import {
        /// Database directory.
        #[arg(long, env = "WAVELET_DB")]
        db: PathBuf,

        /// Chain export: repeated `u32 BE length || block bytes`.
        #[arg(long)]
        import_file: PathBuf,

        /// Also report every transaction of this type.
        #[arg(long)]
        transaction_type: Option<u8>,
    },
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Run the node until SIGINT/SIGTERM.
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "WAVELET_CONFIG")]
    config: Option<PathBuf>,

    /// Network scheme character (e.g. "W", "T").
    #[arg(long, env = "WAVELET_SCHEME")]
    scheme: Option<char>,

    /// Address to accept peer connections on.
    #[arg(long, env = "WAVELET_LISTEN")]
    listen: Option<SocketAddr>,

    /// Address announced to peers.
    #[arg(long, env = "WAVELET_DECLARED_ADDRESS")]
    declared_address: Option<SocketAddr>,

    /// Data directory for block storage.
    #[arg(long, env = "WAVELET_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, env = "WAVELET_NODE_NAME")]
    node_name: Option<String>,

    /// Hex signature of the genesis block.
    #[arg(long, env = "WAVELET_GENESIS_SIGNATURE")]
    genesis_signature: Option<String>,

    /// Bootstrap peers (comma-separated: "1.2.3.4:6868,5.6.7.8:6868").
    #[arg(long, env = "WAVELET_BOOTSTRAP_PEERS", value_delimiter = ',')]
    bootstrap_peers: Vec<String>,
}

impl RunArgs {
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let path_str = path.to_str().context("config path is not UTF-8")?;
                NodeConfig::from_toml_file(path_str)
                    .with_context(|| format!("loading {}", path.display()))?
            }
            None => NodeConfig::default(),
        };

        if let Some(scheme) = self.scheme {
            config.scheme = Scheme::try_from(scheme).context("invalid scheme")?;
        }
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if self.declared_address.is_some() {
            config.declared_address = self.declared_address;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(node_name) = self.node_name {
            config.node_name = node_name;
        }
        if self.genesis_signature.is_some() {
            config.genesis_signature = self.genesis_signature;
        }
        if !self.bootstrap_peers.is_empty() {
            config.bootstrap_peers = self.bootstrap_peers;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Node {
            action: NodeAction::Run(args),
        } => {
            let mut config = args.into_config()?;
            if let Some(level) = cli.log_level {
                config.log_level = level;
            }
            if let Some(format) = cli.log_format {
                config.log_format = format;
            }
            init_logging(config.log_format.parse()?, &config.log_level)?;
            run_node(config).await
        }
        Command::Import {
            db,
            import_file,
            transaction_type,
        } => {
            let format: LogFormat = cli.log_format.as_deref().unwrap_or("human").parse()?;
            init_logging(format, cli.log_level.as_deref().unwrap_or("info"))?;
            run_import(&db, &import_file, transaction_type)
        }
    }
}

async fn run_node(config: NodeConfig) -> anyhow::Result<()> {
    let genesis = config.genesis()?;
    let store = LmdbStore::open(&config.data_dir, genesis)
        .with_context(|| format!("opening store in {}", config.data_dir.display()))?;

    let mut node = WaveletNode::new(config, Arc::new(store))?;
    let local_addr = node.start().await?;
    tracing::info!(%local_addr, "node running, press Ctrl-C to stop");

    let signal = wait_for_signal().await?;
    tracing::info!(%signal, "stop requested");
    node.stop().await;
    Ok(())
}

fn run_import(
    db: &std::path::Path,
    import_file: &std::path::Path,
    transaction_type: Option<u8>,
) -> anyhow::Result<()> {
    let store = LmdbStore::open(db, None)
        .with_context(|| format!("opening store in {}", db.display()))?;
    let mut importer = Importer::new(&store);
    if let Some(tx_type) = transaction_type {
        importer = importer.with_type_filter(tx_type);
    }
    let report = importer
        .import_file(import_file)
        .with_context(|| format!("importing {}", import_file.display()))?;

    println!(
        "imported {} blocks ({} skipped), {} transactions, last height {}",
        report.blocks, report.skipped, report.transactions, report.last_height
    );
    for alarm in &report.alarms {
        println!(
            "ALARM duplicate transaction {} at height {} (first seen at {})",
            alarm.id, alarm.height, alarm.first_seen
        );
    }
    for matched in &report.matching {
        println!(
            "type {} transaction {} at height {}",
            matched.tx_type, matched.id, matched.height
        );
    }
    if let Some(height) = report.invalid_at {
        println!("stopped at height {height}: invalid block signature");
    }
    Ok(())
}
