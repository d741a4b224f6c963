use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use resolver::backend::etcd::{decode_get, decode_watch};
use resolver::backend::memory::InMemoryStore;
use resolver::{Discover, Lifecycle, Service, ServiceEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Capacity of the in-memory store's change feed
const STORE_BUFFER: usize = 1024;

/// How long the service must stay quiet before a replay counts as applied
const QUIET_PERIOD: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "discover")]
#[command(about = "Discover - resolve logical service names into live endpoints")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: DiscoverCommands,
}

#[derive(Subcommand)]
enum DiscoverCommands {
    /// Resolve a service name against a store snapshot
    Resolve(ResolveArgs),
    #[command(flatten)]
    Common(CommonCommands),
}

#[derive(Args)]
struct ResolveArgs {
    /// Logical service name, e.g. proxy-api
    name: String,

    #[arg(long, help = "etcd v2 JSON response holding the store contents")]
    snapshot: Option<PathBuf>,

    #[arg(long, help = "etcd v2 watch responses, one per line, replayed after resolving")]
    events: Option<PathBuf>,

    #[arg(long, help = "Print every endpoint instead of a single pick")]
    all: bool,

    #[arg(long, help = "Print the result as JSON")]
    json: bool,

    #[arg(long, help = "Keep running and report membership changes until interrupted")]
    follow: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command {
        DiscoverCommands::Common(ref command) => utils::handle_common_command(command, &config),
        DiscoverCommands::Resolve(ref args) => resolve(&config, args).await,
    }
}

async fn resolve(config: &Configuration, args: &ResolveArgs) -> Result<()> {
    utils::validate_config(config)?;

    let store = Arc::new(InMemoryStore::new(STORE_BUFFER));
    if let Some(path) = &args.snapshot {
        let written = seed(&store, path).await?;
        info!("Loaded {written} keys from {}", path.display());
    }

    let discover = Discover::new(&config.discovery, store.clone())
        .context("Failed to create service resolver")?;
    let service = discover
        .resolve(&args.name)
        .with_context(|| format!("Failed to resolve service '{}'", args.name))?;
    debug!(prefix = discover.prefix(), service = %args.name, "Resolving service");
    let mut events = service.subscribe();

    let state = match tokio::time::timeout(config.discovery.settle_timeout, service.settled()).await
    {
        Ok(state) => state,
        Err(_) => {
            warn!(
                "Service '{}' did not settle within {:?}",
                args.name, config.discovery.settle_timeout
            );
            service.state()
        }
    };
    info!(service = %args.name, path = %service.path(), state = ?state, "Service settled");

    if let Some(path) = &args.events {
        wait_for_watch(&store, config.discovery.settle_timeout).await;
        let replayed = replay(&store, path).await?;
        info!("Replayed {replayed} events from {}", path.display());
        drain(&mut events).await;
    }

    report(&service, args)?;

    if args.follow {
        follow(&service, &mut events).await?;
    }
    Ok(())
}

/// Write every key of an etcd v2 GET response into `store`
async fn seed(store: &InMemoryStore, path: &Path) -> Result<usize> {
    let body = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    let tree = decode_get(&body).with_context(|| format!("Invalid snapshot {}", path.display()))?;
    Ok(store.put_tree(&tree).await)
}

async fn replay(store: &InMemoryStore, path: &Path) -> Result<usize> {
    let body = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read events {}", path.display()))?;

    let mut replayed = 0;
    for (number, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = decode_watch(line.as_bytes())
            .with_context(|| format!("Invalid event on line {}", number + 1))?;
        match event {
            Some(event) => {
                store.apply(event).await;
                replayed += 1;
            }
            None => debug!("Skipping line {}, nothing to apply", number + 1),
        }
    }
    Ok(replayed)
}

async fn wait_for_watch(store: &InMemoryStore, limit: Duration) {
    let opened = tokio::time::timeout(limit, async {
        while store.watchers() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if opened.is_err() {
        warn!("No watch opened within {limit:?}, replayed events may be missed");
    }
}

/// Consume service events until none arrive for `QUIET_PERIOD`
async fn drain(events: &mut tokio::sync::broadcast::Receiver<ServiceEvent>) {
    loop {
        match tokio::time::timeout(QUIET_PERIOD, events.recv()).await {
            Ok(Ok(event)) => debug!(event = ?event, "Service event"),
            Ok(Err(RecvError::Lagged(skipped))) => debug!("Skipped {skipped} service events"),
            Ok(Err(RecvError::Closed)) | Err(_) => break,
        }
    }
}

fn report(service: &Service, args: &ResolveArgs) -> Result<()> {
    let mut endpoints = service.list();
    endpoints.sort();

    if args.json {
        let output = serde_json::json!({
            "service": args.name,
            "path": service.path(),
            "state": format!("{:?}", service.state()),
            "uri": service.uri(),
            "endpoints": endpoints,
        });
        let output =
            serde_json::to_string_pretty(&output).context("Failed to serialize result to JSON")?;
        println!("{output}");
        return Ok(());
    }

    if endpoints.is_empty() && !args.follow {
        bail!("Service '{}' has no registered instances", args.name);
    }

    if args.all {
        for endpoint in &endpoints {
            println!("{endpoint}");
        }
    } else if let Some(uri) = service.uri() {
        println!("{uri}");
    }
    Ok(())
}

async fn follow(
    service: &Service,
    events: &mut tokio::sync::broadcast::Receiver<ServiceEvent>,
) -> Result<()> {
    info!("Following {}, press Ctrl+C to stop", service.path());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(ServiceEvent::Changed { members }) => {
                    info!(members, "Membership changed");
                    let mut endpoints = service.list();
                    endpoints.sort();
                    println!("{}", endpoints.join(" "));
                }
                Ok(ServiceEvent::Resolved) => info!(state = ?Lifecycle::Resolved, "Service resolved"),
                Ok(ServiceEvent::NotFound) => info!(state = ?Lifecycle::NotFound, "Service not found"),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {skipped} service events"),
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}
