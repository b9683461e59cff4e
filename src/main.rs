//! Tunnel fleet control-plane CLI
//!
//! Exposes the fleet query surface (server selection, fleet stats, admission,
//! heartbeats, token revocation) against the shared store, and a `node` mode
//! that keeps a tunnel server's registration and heartbeat alive.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::time::Duration;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleet_admission::{AdmissionController, CapacityConfig};
use fleet_auth::{JwtValidator, TokenGuard};
use fleet_control::{HttpServerControl, RefresherConfig, RegistrationRefresher};
use fleet_liveness::{HeartbeatTask, LivenessConfig, LivenessTracker, TokenCheckPolicy};
use fleet_registry::{RegistryConfig, ServerRecord, ServerRegistry};
use fleet_store::{StoreConfig, StoreHandle};

/// Tunnel fleet coordination and admission control
#[derive(Parser, Debug)]
#[command(name = "tunnel-fleet")]
#[command(about = "Coordinate a fleet of tunnel servers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    store: StoreArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FLEET_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Redis URL of the shared store; without it state is process-local
    #[arg(long, env = "REDIS_URL", global = true)]
    redis_url: Option<String>,

    /// Upper bound for a single store call (milliseconds)
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "2000", global = true)]
    store_timeout_ms: u64,

    /// Upper bound for a complete key listing (milliseconds)
    #[arg(long, env = "STORE_SCAN_TIMEOUT_MS", default_value = "5000", global = true)]
    store_scan_timeout_ms: u64,

    /// Keys requested per SCAN batch
    #[arg(long, env = "STORE_SCAN_BATCH", default_value = "100", global = true)]
    store_scan_batch: usize,
}

impl StoreArgs {
    fn config(&self) -> StoreConfig {
        StoreConfig {
            url: self.redis_url.clone(),
            op_timeout_ms: self.store_timeout_ms,
            scan_timeout_ms: self.store_scan_timeout_ms,
            scan_batch: self.store_scan_batch,
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
struct CapacityArgs {
    /// Tunnel slots a server declares by default
    #[arg(long, env = "MAX_TUNNELS_PER_SERVER", default_value = "100")]
    max_tunnels_per_server: u32,

    /// Bandwidth budget per tunnel (Mbps)
    #[arg(long, env = "MAX_BANDWIDTH_PER_TUNNEL", default_value = "100")]
    max_bandwidth_per_tunnel: u32,

    /// System-wide tunnel ceiling before reserved headroom
    #[arg(long, env = "TOTAL_SYSTEM_CAPACITY", default_value = "100")]
    total_system_capacity: u32,

    /// Percentage of system capacity never handed out
    #[arg(long, env = "RESERVED_CAPACITY_PERCENT", default_value = "20")]
    reserved_capacity_percent: f64,
}

impl CapacityArgs {
    fn config(&self) -> CapacityConfig {
        CapacityConfig {
            max_tunnels_per_server: self.max_tunnels_per_server,
            max_bandwidth_per_tunnel_mbps: self.max_bandwidth_per_tunnel,
            total_system_capacity: self.total_system_capacity,
            reserved_capacity_percent: self.reserved_capacity_percent,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Keep this tunnel server registered and heartbeating until interrupted
    Node {
        /// Server id (unique across the fleet)
        #[arg(long, env = "FLEET_SERVER_ID")]
        server_id: String,

        /// Host the control plane reaches this server on
        #[arg(long)]
        host: String,

        /// Control API port
        #[arg(long, default_value = "7835")]
        port: u16,

        /// Location label
        #[arg(long, default_value = "default")]
        location: String,

        /// Concurrent tunnels this server accepts
        #[arg(long, env = "MAX_TUNNELS_PER_SERVER", default_value = "100")]
        max_tunnels: u32,

        /// Bandwidth this server can carry (Mbps)
        #[arg(long, default_value = "1000")]
        max_bandwidth_mbps: u32,

        /// Seconds between registration refreshes
        #[arg(long, default_value = "60")]
        refresh_interval_secs: u64,

        /// Seconds between reads of the local tunnel count from the control API
        #[arg(long, default_value = "10")]
        load_sync_interval_secs: u64,
    },

    /// Print the least-utilized eligible server
    BestServer,

    /// Print aggregate fleet capacity
    Stats,

    /// Decide whether an account may open one more tunnel
    CheckCapacity {
        /// Tunnels the account's plan allows
        #[arg(long)]
        plan_quota: u32,

        /// Tunnels the account currently runs
        #[arg(long, default_value = "0")]
        current_tunnels: u32,

        #[command(flatten)]
        capacity: CapacityArgs,
    },

    /// Print every live heartbeat
    Heartbeats,

    /// Blacklist a token for the rest of its lifetime
    RevokeToken {
        /// JWT to revoke
        #[arg(long)]
        token: String,

        /// JWT secret the token was signed with
        #[arg(long, env = "FLEET_JWT_SECRET")]
        secret: String,
    },

    /// Check whether a token is blacklisted
    IsRevoked {
        #[arg(long)]
        token: String,

        /// Answer when the store is unreachable (fail-open or fail-closed)
        #[arg(long, default_value = "fail-open")]
        policy: TokenCheckPolicy,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let store_config = cli.store.config();
    store_config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid store configuration: {}", e))?;

    let handle = StoreHandle::connect(&store_config)
        .await
        .context("Failed to connect to the state store")?;
    let store = handle.store();

    let result = match cli.command {
        Commands::Node {
            server_id,
            host,
            port,
            location,
            max_tunnels,
            max_bandwidth_mbps,
            refresh_interval_secs,
            load_sync_interval_secs,
        } => {
            let record = ServerRecord::new(server_id, host, port)
                .with_location(location)
                .with_capacity(max_tunnels, max_bandwidth_mbps);
            let registry = ServerRegistry::new(store.clone(), RegistryConfig::default());
            let liveness = LivenessTracker::new(store, LivenessConfig::default())?;
            run_node(
                registry,
                liveness,
                record,
                RefresherConfig {
                    interval_secs: refresh_interval_secs,
                },
                Duration::from_secs(load_sync_interval_secs.max(1)),
            )
            .await
        }
        Commands::BestServer => {
            let registry = ServerRegistry::new(store, RegistryConfig::default());
            print_json(&registry.best_server().await)
        }
        Commands::Stats => {
            let registry = ServerRegistry::new(store, RegistryConfig::default());
            print_json(&registry.fleet_stats().await)
        }
        Commands::CheckCapacity {
            plan_quota,
            current_tunnels,
            capacity,
        } => {
            let registry = ServerRegistry::new(store, RegistryConfig::default());
            let controller = AdmissionController::new(registry, capacity.config())?;
            print_json(&controller.check_capacity(plan_quota, current_tunnels).await)
        }
        Commands::Heartbeats => {
            let liveness = LivenessTracker::new(store, LivenessConfig::default())?;
            print_json(&liveness.get_all_heartbeats().await)
        }
        Commands::RevokeToken { token, secret } => {
            let liveness = LivenessTracker::new(store, LivenessConfig::default())?;
            let guard = TokenGuard::new(JwtValidator::new(secret.as_bytes()), liveness);
            let remaining = guard.revoke(&token).await?;
            print_json(&json!({
                "revoked": !remaining.is_zero(),
                "ttlSecs": remaining.as_secs(),
            }))
        }
        Commands::IsRevoked { token, policy } => {
            let liveness = LivenessTracker::new(
                store,
                LivenessConfig {
                    token_check_policy: policy,
                    ..Default::default()
                },
            )?;
            print_json(&json!({ "revoked": liveness.is_blacklisted(&token).await }))
        }
    };

    handle.shutdown();
    result
}

async fn run_node(
    registry: ServerRegistry,
    liveness: LivenessTracker,
    record: ServerRecord,
    refresher_config: RefresherConfig,
    load_sync_interval: Duration,
) -> Result<()> {
    let server_id = record.id.clone();
    info!(
        server_id = %server_id,
        control_addr = %record.control_addr(),
        capacity = record.max_concurrent_tunnels,
        "Starting fleet node"
    );

    let refresher = RegistrationRefresher::spawn(registry, record, refresher_config)
        .context("Failed to start registration refresher")?;
    let heartbeat = HeartbeatTask::spawn(liveness, server_id.clone());
    let control = HttpServerControl::new().context("Failed to build control API client")?;

    let mut load_sync = tokio::time::interval(load_sync_interval);
    load_sync.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                match result {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(err) => error!("Error listening for shutdown signal: {}", err),
                }
                break;
            }
            _ = load_sync.tick() => {
                if let Err(e) = refresher.sync_load(&control).await {
                    warn!(server_id = %server_id, error = %e, "Local control API unavailable");
                }
            }
        }
    }

    heartbeat.shutdown().await;
    refresher.shutdown().await;
    info!(server_id = %server_id, "Fleet node stopped");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
