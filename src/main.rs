//! Binary entrypoint for the meshtac CLI.
//!
//! Commands:
//! - `start [--port <path>]` - run the messaging service against a radio
//! - `init` - create a starter `config.toml`
//! - `status` - print queue statistics
//! - `send <text>` / `send --position <lat> <lon> [alt]` - queue a message
//! - `peers` - list known mesh peers
//! - `export <file>` / `import <file>` - snapshot the durable stores
//! - `purge [--days <n>]` - delete records past the retention window
//!
//! See the library crate docs for module-level details: `meshtac::`.
use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use meshtac::config::Config;
use meshtac::queue::{snapshot, DeliveryQueue, DeliveryQueueBuilder};

#[derive(Parser)]
#[command(name = "meshtac")]
#[command(about = "Off-grid mesh messaging with CoT interop and a durable delivery queue")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the messaging service
    Start {
        /// Radio serial port (e.g., /dev/ttyUSB0); overrides the config
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Initialize a new configuration file
    Init,
    /// Show queue statistics
    Status,
    /// Queue a message for delivery (works offline)
    Send {
        /// Text to broadcast
        #[arg(required_unless_present = "position")]
        text: Option<String>,

        /// Queue a position report instead: lat lon [alt]
        #[arg(long, num_args = 2..=3, value_names = ["LAT", "LON", "ALT"])]
        position: Option<Vec<f32>>,
    },
    /// List known mesh peers
    Peers,
    /// Export all stores to a snapshot file
    Export {
        /// Output file (gzipped JSON)
        file: String,
    },
    /// Import a snapshot file, replacing all stores
    Import {
        /// Snapshot file written by `export`
        file: String,
    },
    /// Delete sent/received records past the retention window
    Purge {
        /// Override the configured retention in days
        #[arg(long)]
        days: Option<i64>,
    },
}

fn open_queue(config: &Config) -> Result<DeliveryQueue> {
    let path = Path::new(&config.storage.data_dir).join("queue");
    Ok(DeliveryQueueBuilder::new(path)
        .max_retries(config.queue.max_retries)
        .open()?)
}

async fn load_config(pre_config: Option<Config>, path: &str) -> Result<Config> {
    match pre_config {
        Some(config) => Ok(config),
        None => Config::load(path).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to configure logging (except for Init which writes it)
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { port } => {
            let config = load_config(pre_config, &cli.config).await?;
            info!("Starting meshtac v{}", env!("CARGO_PKG_VERSION"));

            // CLI port overrides config; fallback to config when CLI absent
            let chosen_port = port.or_else(|| {
                if config.radio.port.is_empty() {
                    None
                } else {
                    Some(config.radio.port.clone())
                }
            });
            let Some(port_path) = chosen_port else {
                anyhow::bail!("no radio port given; pass --port or set radio.port in the config");
            };

            #[cfg(feature = "serial")]
            {
                use meshtac::service::MeshService;
                use meshtac::transport::serial::SerialLink;
                use meshtac::transport::RadioClient;

                let link = SerialLink::new(&port_path, config.radio.baud_rate);
                let client = RadioClient::new(Box::new(link), config.radio.source_id);
                let queue = open_queue(&config)?;
                let mut service = MeshService::new(client, queue, &config);

                match service.connect().await {
                    Ok(state) => info!("radio link on {} is {:?}", port_path, state),
                    Err(e) => warn!(
                        "failed to connect on {}: {} (service continuing offline; queued messages wait)",
                        port_path, e
                    ),
                }
                service.run().await?;
            }
            #[cfg(not(feature = "serial"))]
            {
                anyhow::bail!(
                    "built without serial support; rebuild with --features serial to use {}",
                    port_path
                );
            }
        }
        Commands::Init => {
            info!("Initializing new meshtac configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Status => {
            let config = load_config(pre_config, &cli.config).await?;
            let queue = open_queue(&config)?;
            let stats = queue.stats()?;
            println!("meshtac v{}", env!("CARGO_PKG_VERSION"));
            println!("  pending:  {}", stats.pending_count);
            println!("  failed:   {}", stats.failed_count);
            println!("  sent:     {}", stats.sent_count);
            println!("  received: {}", stats.received_count);
            println!("  peers:    {}", stats.peer_count);
            for msg in queue.list_failed()? {
                println!(
                    "  failed message {} ({} attempts, created {})",
                    msg.id,
                    msg.retry_count,
                    msg.created_at.format("%Y-%m-%d %H:%M:%SZ")
                );
            }
        }
        Commands::Send { text, position } => {
            let config = load_config(pre_config, &cli.config).await?;
            let queue = open_queue(&config)?;
            let id = if let Some(pos) = position {
                let mut payload = Vec::with_capacity(12);
                payload.extend_from_slice(&pos[0].to_le_bytes());
                payload.extend_from_slice(&pos[1].to_le_bytes());
                payload.extend_from_slice(&pos.get(2).copied().unwrap_or(0.0).to_le_bytes());
                queue.enqueue(payload, meshtac::queue::MessageKind::Position)?
            } else {
                let text = text.unwrap_or_default();
                queue.enqueue(text.into_bytes(), meshtac::queue::MessageKind::Text)?
            };
            println!("queued {id}");
        }
        Commands::Peers => {
            let config = load_config(pre_config, &cli.config).await?;
            let queue = open_queue(&config)?;
            let peers = queue.list_peers()?;
            if peers.is_empty() {
                println!("no peers known yet");
            }
            for peer in peers {
                let position = match (peer.lat, peer.lon) {
                    (Some(lat), Some(lon)) => format!("{lat:.5}, {lon:.5}"),
                    _ => "no position".to_string(),
                };
                println!(
                    "{}  {}  {}  (updated {})",
                    peer.id,
                    if peer.name.is_empty() { "-" } else { &peer.name },
                    position,
                    peer.updated_at.format("%Y-%m-%d %H:%M:%SZ")
                );
            }
        }
        Commands::Export { file } => {
            let config = load_config(pre_config, &cli.config).await?;
            let queue = open_queue(&config)?;
            let snap = queue.export_snapshot()?;
            let checksum = snapshot::write_snapshot_file(Path::new(&file), &snap)?;
            println!(
                "exported {} pending, {} sent, {} received, {} peers to {}",
                snap.pending.len(),
                snap.sent.len(),
                snap.received.len(),
                snap.peers.len(),
                file
            );
            println!("sha256 {checksum}");
        }
        Commands::Import { file } => {
            let config = load_config(pre_config, &cli.config).await?;
            let queue = open_queue(&config)?;
            let (snap, checksum) = snapshot::read_snapshot_file(Path::new(&file))?;
            queue.import_snapshot(&snap)?;
            println!("imported snapshot from {file} (sha256 {checksum})");
        }
        Commands::Purge { days } => {
            let config = load_config(pre_config, &cli.config).await?;
            let queue = open_queue(&config)?;
            let days = days.unwrap_or(config.queue.retention_days);
            let removed = queue.purge_older_than(chrono::Duration::days(days))?;
            println!("purged {removed} records older than {days} days");
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    if let Some(cfg) = config {
        if let Some(ref file) = cfg.logging.file {
            if let Ok(f) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
            {
                let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));

                // When stdout is a terminal, also echo to the console; under
                // a service manager stdout is redirected and skipped.
                let is_tty = atty::is(atty::Stream::Stdout);

                builder.format(move |fmt, record| {
                    let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                    let line = format!("{} [{}] {}", ts, record.level(), record.args());
                    if let Ok(mut guard) = write_mutex.lock() {
                        let _ = writeln!(guard, "{line}");
                    }
                    if is_tty {
                        writeln!(fmt, "{line}")?;
                    }
                    Ok(())
                });
            }
        }
    }
    let _ = builder.try_init();
}
