//! Aquaring daemon — runs either the membership broker or a tank node.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use aquaring_broker::{Broker, BrokerConfig};
use aquaring_tank::{TankConfig, TankEvent, TankNode};
use aquaring_transport::{SecureTransport, Transport, UdpTransport};
use aquaring_types::{FishId, PeerAddress};
use aquaring_utils::ShutdownController;

#[derive(Parser)]
#[command(name = "aquaring-daemon", about = "Distributed aquarium broker and tank node")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings are
    /// used as the base; CLI flags and env vars override them.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, global = true, default_value = "info", env = "AQUARING_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// The membership broker.
    Broker {
        #[command(subcommand)]
        action: BrokerAction,
    },
    /// A tank node.
    Tank {
        #[command(subcommand)]
        action: TankAction,
    },
}

#[derive(clap::Subcommand)]
enum BrokerAction {
    /// Run the broker.
    Run {
        /// Address to listen on.
        #[arg(long, env = "AQUARING_BROKER_BIND")]
        bind: Option<String>,

        /// Lease granted to each member, in milliseconds.
        #[arg(long, env = "AQUARING_LEASE_MS")]
        lease_ms: Option<u64>,
    },
}

#[derive(clap::Subcommand)]
enum TankAction {
    /// Run a tank node.
    Run {
        /// Broker address to register with.
        #[arg(long, env = "AQUARING_BROKER")]
        broker: Option<String>,

        /// Local address to bind.
        #[arg(long, env = "AQUARING_TANK_BIND")]
        bind: Option<String>,

        /// How long to hold the ring token, in milliseconds.
        #[arg(long, env = "AQUARING_TOKEN_HOLD_MS")]
        token_hold_ms: Option<u64>,

        /// Encrypt non-control traffic between peers.
        #[arg(long, env = "AQUARING_SECURE")]
        secure: bool,
    },
}

fn read_config_file(path: &Option<PathBuf>) -> anyhow::Result<Option<String>> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
            tracing::info!("loaded config from {}", path.display());
            Ok(Some(contents))
        }
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    aquaring_utils::init_tracing(&cli.log_level);

    match cli.command {
        Command::Broker { action: BrokerAction::Run { bind, lease_ms } } => {
            let mut config = match read_config_file(&cli.config)? {
                Some(text) => BrokerConfig::from_toml_str(&text)?,
                None => BrokerConfig::default(),
            };
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(lease_ms) = lease_ms {
                config.lease_duration_ms = lease_ms;
            }
            run_broker(config).await
        }
        Command::Tank { action: TankAction::Run { broker, bind, token_hold_ms, secure } } => {
            let mut config = match read_config_file(&cli.config)? {
                Some(text) => TankConfig::from_toml_str(&text)?,
                None => TankConfig::default(),
            };
            if let Some(broker) = broker {
                config.broker_addr = broker;
            }
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(token_hold_ms) = token_hold_ms {
                config.token_hold_ms = token_hold_ms;
            }
            config.secure = config.secure || secure;
            run_tank(config).await
        }
    }
}

async fn run_broker(config: BrokerConfig) -> anyhow::Result<()> {
    let bind: PeerAddress = config.bind_addr.parse()?;
    let transport = Arc::new(UdpTransport::bind(bind).await?);
    tracing::info!(addr = %transport.local_addr(), "broker listening");

    let broker = Broker::new(config, transport);
    let handle = tokio::spawn(broker.clone().run());

    let signals = ShutdownController::new();
    signals.wait_for_signal().await;
    broker.shutdown();
    handle.await?;
    tracing::info!("broker exited cleanly");
    Ok(())
}

async fn run_tank(config: TankConfig) -> anyhow::Result<()> {
    let bind: PeerAddress = config.bind_addr.parse()?;
    let udp = UdpTransport::bind(bind).await?;
    let transport: Arc<dyn Transport> = if config.secure {
        tracing::info!("link encryption enabled");
        Arc::new(SecureTransport::new(udp))
    } else {
        Arc::new(udp)
    };
    tracing::info!(addr = %transport.local_addr(), "tank node listening");

    let node = TankNode::new(transport, config)?;
    node.subscribe(Box::new(|event| match event {
        TankEvent::SnapshotComplete { population } => {
            tracing::info!(population, "snapshot result");
        }
        TankEvent::FishLocated { id } => {
            tracing::info!(fish = %id, "fish located");
        }
        _ => {}
    }))
    .await;
    node.start().await?;

    // Console commands drive the interactive operations.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shutdown_rx = node.shutdown_controller().subscribe();
    let signals = ShutdownController::new();
    let signal_wait = signals.wait_for_signal();
    tokio::pin!(signal_wait);
    loop {
        tokio::select! {
            _ = &mut signal_wait => break,
            _ = shutdown_rx.recv() => break,
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                handle_command(&node, line.trim()).await;
            }
        }
    }

    node.stop().await;
    tracing::info!("tank node exited cleanly");
    Ok(())
}

async fn handle_command(node: &TankNode, command: &str) {
    match command.split_whitespace().collect::<Vec<_>>().as_slice() {
        ["fish"] => node.spawn_fish().await,
        ["snapshot"] => node.initiate_snapshot().await,
        ["locate", id] => node.locate_fish(FishId::from(id.to_string())).await,
        [] => {}
        _ => tracing::warn!("commands: fish | snapshot | locate <fish-id>"),
    }
}
