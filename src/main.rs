//! Binary entrypoint for the insteon-linkdb CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml`
//! - `modem [--port <path>]` - download and print the modem all-link table
//! - `device <address> [--engine <i1|i2|i2cs>] [--port <path>] [--delta <n>] [--force]` - print a device link
//!   table, downloading it unless the cached copy is complete and current
//! - `cache` - print what the JSON cache holds
//!
//! See the library crate docs for module-level details: `insteon_linkdb::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::info;

use insteon_linkdb::config::Config;
use insteon_linkdb::database::DatabaseCache;
use insteon_linkdb::device::InsteonEngine;
use insteon_linkdb::insteon::InsteonAddress;

#[derive(Parser)]
#[command(name = "insteon-linkdb")]
#[command(about = "Read Insteon modem and device all-link databases over a PLM")]
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
    /// Write a default configuration file
    Init,
    /// Download the modem database
    Modem {
        /// PLM serial port (overrides the config file)
        #[arg(short, long)]
        port: Option<String>,
        /// Seconds to wait for the download
        #[arg(short, long, default_value_t = 120)]
        wait: u64,
    },
    /// Download one device's link database
    Device {
        /// Device address, e.g. 1A.2B.3C
        address: InsteonAddress,
        /// Insteon engine of the device
        #[arg(short, long, default_value = "i2")]
        engine: InsteonEngine,
        /// PLM serial port (overrides the config file)
        #[arg(short, long)]
        port: Option<String>,
        /// Seconds to wait for the download
        #[arg(short, long, default_value_t = 60)]
        wait: u64,
        /// Database revision the device currently reports
        #[arg(short, long)]
        delta: Option<u8>,
        /// Download even when the cached table is current
        #[arg(short, long)]
        force: bool,
    },
    /// Print the cached databases
    Cache,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            info!("Initializing new configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Modem { port, wait } => {
            let config = pre_config.ok_or_else(|| anyhow!("Failed to load config file {}", cli.config))?;
            session::read_modem(&config, port, wait).await?;
        }
        Commands::Device {
            address,
            engine,
            port,
            wait,
            delta,
            force,
        } => {
            let config = pre_config.ok_or_else(|| anyhow!("Failed to load config file {}", cli.config))?;
            let refresh = Refresh { delta, force };
            session::read_device(&config, address, engine, port, wait, refresh).await?;
        }
        Commands::Cache => {
            let config = pre_config.ok_or_else(|| anyhow!("Failed to load config file {}", cli.config))?;
            let cache = DatabaseCache::load_from_file(&config.cache.file)?;
            println!("cache updated {}", cache.last_updated.to_rfc3339());
            println!(
                "modem: {} records ({})",
                cache.modem_records.len(),
                if cache.modem_complete { "complete" } else { "incomplete" }
            );
            for (address, product) in &cache.products {
                println!("  {} {}", address, product);
            }
            for (address, db) in &cache.devices {
                println!(
                    "device {}: {} records, delta {}",
                    address,
                    db.records.len(),
                    db.delta.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
                );
            }
        }
    }

    Ok(())
}

/// What the caller knows about the device's current table.
#[cfg_attr(not(feature = "serial"), allow(dead_code))]
struct Refresh {
    delta: Option<u8>,
    force: bool,
}

#[cfg(feature = "serial")]
mod session {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use log::{debug, info, warn};
    use tokio::sync::broadcast;

    use insteon_linkdb::config::Config;
    use insteon_linkdb::database::{DatabaseCache, DatabaseManager, DatabaseTarget, PauseFlag};
    use insteon_linkdb::device::{DatabaseEvent, InsteonDevice, InsteonEngine, InsteonModem};
    use insteon_linkdb::insteon::serial::{connect, SerialIo};
    use insteon_linkdb::insteon::InsteonAddress;
    use insteon_linkdb::metrics;

    use super::Refresh;

    struct Session {
        manager: DatabaseManager,
        io: SerialIo,
        cache: DatabaseCache,
    }

    async fn open(config: &Config, port: Option<String>) -> Result<Session> {
        let port = port.unwrap_or_else(|| config.transport.port.clone());
        let (transport, io) = connect(&port, config.transport.baud_rate).await?;
        // nothing else talks on this port, the pausables only track state
        let manager = DatabaseManager::start(
            config.database.tuning(),
            transport,
            Arc::new(PauseFlag::new()),
            Arc::new(PauseFlag::new()),
        );
        let cache = match DatabaseCache::load_from_file(&config.cache.file) {
            Ok(cache) => cache,
            Err(e) => {
                info!("No usable cache at {} ({}), starting empty", config.cache.file, e);
                DatabaseCache::new()
            }
        };
        Ok(Session { manager, io, cache })
    }

    async fn close(session: Session, config: &Config) -> Result<()> {
        session.manager.shutdown().await;
        session.io.shutdown();
        if config.cache.save_on_exit {
            session.cache.save_to_file(&config.cache.file)?;
            info!("Cache saved to {}", config.cache.file);
        }
        info!("{:?}", metrics::snapshot());
        Ok(())
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<DatabaseEvent>,
        wait: u64,
        done: impl Fn(&DatabaseEvent) -> bool,
    ) -> bool {
        let deadline = tokio::time::sleep(Duration::from_secs(wait));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return false,
                event = rx.recv() => match event {
                    Ok(event) if done(&event) => return true,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return false,
                },
            }
        }
    }

    pub async fn read_modem(config: &Config, port: Option<String>, wait: u64) -> Result<()> {
        let mut session = open(config, port).await?;
        let modem = Arc::new(InsteonModem::new(InsteonAddress::default()));
        let mut rx = modem.subscribe();
        session
            .manager
            .read(DatabaseTarget::Modem(modem.clone()), Duration::ZERO);

        let finished = wait_for(&mut rx, wait, |e| {
            matches!(e, DatabaseEvent::ModemDbCompleted { .. } | DatabaseEvent::ModemDbUpdated)
        })
        .await;
        if !finished {
            warn!("Modem database download did not finish within {}s", wait);
        }
        {
            let db = modem.db();
            for record in db.records() {
                println!("{}", record);
            }
            for entry in db.entries() {
                let product = entry
                    .product_data()
                    .map(|pd| pd.to_string())
                    .unwrap_or_else(|| "unknown product".to_string());
                println!(
                    "{}: {} controller groups {:?} responder groups {:?}",
                    entry.address(),
                    product,
                    entry.controller_groups(),
                    entry.responder_groups()
                );
            }
            session.cache.capture_modem(&db);
        }
        close(session, config).await
    }

    pub async fn read_device(
        config: &Config,
        address: InsteonAddress,
        engine: InsteonEngine,
        port: Option<String>,
        wait: u64,
        refresh: Refresh,
    ) -> Result<()> {
        let mut session = open(config, port).await?;
        let device = Arc::new(InsteonDevice::new(address, engine));
        let download = {
            let mut db = device.link_db();
            db.set_first_record_location(config.database.first_record_location());
            if session.cache.restore_device(address, &mut db) {
                debug!("{}: restored {} cached records ({:?})", address, db.record_count(), db.status());
            }
            if let Some(delta) = refresh.delta {
                db.update_database_delta(delta);
            }
            refresh.force || db.needs_download()
        };

        if download {
            let mut rx = device.subscribe();
            session
                .manager
                .read(DatabaseTarget::Device(device.clone()), Duration::ZERO);
            let finished = wait_for(&mut rx, wait, |e| matches!(e, DatabaseEvent::LinkDbUpdated { .. })).await;
            if !finished {
                warn!("Link database download for {} did not finish within {}s", address, wait);
            }
        } else {
            info!("Cached link database for {} is current, not downloading", address);
        }
        {
            let db = device.link_db();
            println!("{} link db: {:?}", address, db.status());
            for record in db.records() {
                println!("{}", record);
            }
            session.cache.capture_device(address, &db);
        }
        close(session, config).await
    }
}

#[cfg(not(feature = "serial"))]
mod session {
    use anyhow::{anyhow, Result};

    use insteon_linkdb::config::Config;
    use insteon_linkdb::device::InsteonEngine;
    use insteon_linkdb::insteon::InsteonAddress;

    use super::Refresh;

    pub async fn read_modem(_config: &Config, _port: Option<String>, _wait: u64) -> Result<()> {
        Err(anyhow!("Reading the modem requires the 'serial' feature"))
    }

    pub async fn read_device(
        _config: &Config,
        _address: InsteonAddress,
        _engine: InsteonEngine,
        _port: Option<String>,
        _wait: u64,
        _refresh: Refresh,
    ) -> Result<()> {
        Err(anyhow!("Reading a device requires the 'serial' feature"))
    }
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
    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    match log_file.and_then(|file| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    }) {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Mirror to the console only when someone is watching
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    record.level(),
                    record.args()
                )
            });
        }
    }
    let _ = builder.try_init();
}
