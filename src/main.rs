use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use checkin::{
    client::CheckInClient,
    config::Config,
    import::{import_all, read_drafts},
    persist::sqlite::SqliteOpSink,
    qr::encode_payload,
    server::{
        self,
        routes::Listing,
        state::{AppState, open_registry},
    },
    types::{ListOptions, ListOrder, Projection},
};

#[derive(Parser)]
#[command(name = "checkin", about = "Event check-in service")]
struct Args {
    #[arg(long, global = true, env = "CHECKIN_CONFIG", help = "Config file path")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "SQLite journal path (overrides config)")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the check-in HTTP API.
    Serve {
        #[arg(long, help = "Listen port (overrides config)")]
        port: Option<u16>,
    },
    /// Import registrations from a JSON array.
    Import { file: PathBuf },
    /// Print every registration as JSON.
    List {
        #[arg(long, help = "Newest registrations first")]
        newest: bool,
        #[arg(long, help = "Only display fields")]
        summary: bool,
    },
    /// Print the journaled ops for one attendee.
    History { email: String },
    /// Submit a decoded QR payload to a running server.
    Scan {
        payload: String,
        #[arg(long, env = "CHECKIN_SERVER_URL", default_value = "http://127.0.0.1:3000")]
        server: String,
        #[arg(long, default_value_t = 10, help = "Request timeout in seconds")]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("checkin=info,tower_http=info"));
    fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(path) = args.database {
        config.database.path = Some(path);
    }

    match args.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        }
        Command::Import { file } => import(config, file).await,
        Command::List { newest, summary } => {
            let options = ListOptions {
                projection: if summary { Projection::Summary } else { Projection::Full },
                order: if newest { ListOrder::Newest } else { ListOrder::Created },
            };
            list(config, options).await
        }
        Command::History { email } => history(&config, &email),
        Command::Scan {
            payload,
            server,
            timeout_secs,
        } => scan(&server, &payload, Duration::from_secs(timeout_secs)).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("Initializing state...");
    let address = config.server.address();
    let state = AppState::open(config).context("opening registration store")?;

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;

    server::serve(listener, state.clone(), server::shutdown_signal()).await?;

    info!("Server shutting down...");
    state.registry().shutdown().await?;
    Ok(())
}

async fn import(config: Config, file: PathBuf) -> Result<()> {
    let drafts = read_drafts(&file)?;
    let registry = open_registry(&config)?;

    let report = import_all(&registry, drafts).await?;
    registry.flush().await?;

    for id in &report.inserted {
        if let Some(rec) = registry.get(*id).await? {
            println!("{}\t{}", rec.email, encode_payload(&rec.name, &rec.email));
        }
    }
    for (email, err) in &report.skipped {
        eprintln!("skipped {email}: {err}");
    }
    println!(
        "imported {} registrations, skipped {}",
        report.inserted.len(),
        report.skipped.len()
    );

    registry.shutdown().await?;
    Ok(())
}

async fn list(config: Config, options: ListOptions) -> Result<()> {
    let registry = open_registry(&config)?;
    let registrations = registry.list(options).await?;
    registry.shutdown().await?;

    let listing = match options.projection {
        Projection::Full => Listing::Full(registrations),
        Projection::Summary => Listing::Summary(registrations.iter().map(|r| r.summary()).collect()),
    };
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

fn history(config: &Config, email: &str) -> Result<()> {
    let path = config
        .database
        .path
        .as_ref()
        .context("history needs a database path")?;
    let sink = SqliteOpSink::open(path).with_context(|| format!("opening {}", path.display()))?;
    let ops = sink.attendee_history(email)?;
    if ops.is_empty() {
        eprintln!("no journal entries for {email}");
    }
    println!("{}", serde_json::to_string_pretty(&ops)?);
    Ok(())
}

async fn scan(server: &str, payload: &str, timeout: Duration) -> Result<()> {
    let client = CheckInClient::new(server, timeout)?;
    match client.scan_and_submit(payload).await {
        Ok(rec) => {
            println!("QR Code scanned successfully! {} <{}>", rec.name, rec.email);
            Ok(())
        }
        Err(err) => {
            if err.is_unreachable() {
                eprintln!("Could not reach {server}; check the connection and scan again.");
            } else if err.is_retryable() {
                eprintln!("Scan again to retry.");
            }
            Err(err.into())
        }
    }
}
