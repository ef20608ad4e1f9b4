//! mockdev daemon - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use mockdev::config::DaemonConfig;
use mockdev::record::{record, write_conversation_file, RecordRequest};
use mockdev::session::SessionCounter;
use mockdev::snmp::read_snapshot_file;
use mockdev::{HttpService, LineService, SnapshotTable};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mockdevd",
    about = "Device emulator for integration testing - HTTP and SSH conversations, SNMP snapshots",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides `loglevel`
    #[arg(short = 'L', long)]
    log_level: Option<Level>,

    /// Print an example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Parse an SNMP snapshot file, print it normalized and exit
    #[arg(long, value_name = "FILE")]
    dump_snapshot: Option<PathBuf>,

    /// Request URL and write the exchange as a conversation file, then exit
    #[arg(long, value_name = "URL")]
    record: Option<String>,

    /// HTTP method for --record
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request header for --record, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER", requires = "record")]
    headers: Vec<String>,

    /// Request content for --record
    #[arg(short = 'd', long, requires = "record")]
    data: Option<String>,

    /// Output file for --record (default: stdout)
    #[arg(short = 'o', long, value_name = "FILE", requires = "record")]
    output: Option<PathBuf>,

    /// Overwrite the --record output file if it exists
    #[arg(short = 'f', long, requires = "output")]
    force: bool,
}

/// Everything that loaded successfully, plus how many services did not.
#[derive(Default)]
struct Services {
    http: Vec<HttpService>,
    ssh: Vec<LineService>,
    snmp: Vec<(String, SnapshotTable)>,
    failed: usize,
}

fn build_services(config: &DaemonConfig) -> Services {
    let mut services = Services::default();

    for cfg in &config.http {
        match HttpService::from_config(cfg) {
            Ok(service) => services.http.push(service),
            Err(e) => {
                error!(service = %cfg.name, error = %e, "HTTP service disabled");
                services.failed += 1;
            }
        }
    }
    for cfg in &config.ssh {
        match LineService::from_config(cfg) {
            Ok(service) => services.ssh.push(service),
            Err(e) => {
                error!(service = %cfg.name, error = %e, "line service disabled");
                services.failed += 1;
            }
        }
    }
    for cfg in &config.snmp {
        match SnapshotTable::load(cfg) {
            Ok(table) => services.snmp.push((cfg.name.clone(), table)),
            Err(e) => {
                error!(service = %cfg.name, error = %e, "SNMP snapshot disabled");
                services.failed += 1;
            }
        }
    }
    services
}

fn init_logging(level: Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Print example config if requested
    if args.print_config {
        let default_config = include_str!("../config/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    if let Some(path) = &args.dump_snapshot {
        init_logging(args.log_level.unwrap_or(Level::INFO))?;
        for pdu in read_snapshot_file(path)? {
            println!("{}", pdu);
        }
        return Ok(());
    }

    if let Some(url) = &args.record {
        init_logging(args.log_level.unwrap_or(Level::WARN))?;
        let request = RecordRequest {
            url: url.clone(),
            method: args.method.clone(),
            headers: args.headers.clone(),
            data: args.data.clone(),
        };
        let conversation = record(&request).await?;
        match &args.output {
            Some(path) => write_conversation_file(path, &[conversation], args.force)?,
            None => print!("{}", serde_yaml::to_string(&[conversation])?),
        }
        return Ok(());
    }

    let config = if args.config.exists() {
        DaemonConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        DaemonConfig::default()
    };

    let level = match args.log_level {
        Some(level) => level,
        None => config.loglevel.parse().unwrap_or(Level::INFO),
    };
    init_logging(level)?;
    if args.config.exists() {
        info!(path = ?args.config, "Loaded configuration");
    } else {
        warn!(path = ?args.config, "Configuration file not found, no services defined");
    }

    let services = build_services(&config);

    // Validate and exit if requested
    if args.validate {
        for service in &services.http {
            println!(
                "http  {:<20} {:<22} {} conversations",
                service.name(),
                service.bind_addr(),
                service.table().len()
            );
        }
        for service in &services.ssh {
            println!(
                "ssh   {:<20} {:<22} {} conversations",
                service.name(),
                format!("{:?}", service.transport()).to_lowercase(),
                service.table().len()
            );
        }
        for (name, table) in &services.snmp {
            println!("snmp  {:<20} {} oids", name, table.len());
        }
        if services.failed > 0 {
            anyhow::bail!("{} service(s) failed to load", services.failed);
        }
        println!("Configuration is valid");
        return Ok(());
    }

    for (name, table) in &services.snmp {
        info!(service = %name, oids = table.len(), "SNMP snapshot ready");
    }

    let sessions = Arc::new(SessionCounter::new());
    let mut tasks = JoinSet::new();
    for service in services.http {
        let service = Arc::new(service.with_session_counter(Arc::clone(&sessions)));
        let name = service.name().to_string();
        tasks.spawn(async move { (name, service.run().await) });
    }
    for service in services.ssh {
        let service = Arc::new(service.with_session_counter(Arc::clone(&sessions)));
        let name = service.name().to_string();
        tasks.spawn(async move { (name, service.run().await) });
    }

    if tasks.is_empty() {
        warn!("No listening services configured");
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            joined = tasks.join_next() => match joined {
                Some(Ok((name, Ok(())))) => info!(service = %name, "service stopped"),
                Some(Ok((name, Err(e)))) => error!(service = %name, error = %e, "service failed"),
                Some(Err(e)) => error!(error = %e, "service task panicked"),
                None => break,
            },
        }
    }
    tasks.abort_all();

    Ok(())
}
