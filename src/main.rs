//! flocknet - Networked boid flocking
//!
//! An authoritative server simulates the flock and broadcasts state
//! snapshots over TCP; clients watch the flock and submit add/remove
//! commands.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use rand::Rng;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flocknet::config::{self, Config};
use flocknet::flock::{Flock, MAX_SPEED, MIN_SPEED};
use flocknet::network::{self, Client, ClientEvent, InboundPacket, Server};
use flocknet::protocol::{self, Boid, PacketKind};

/// flocknet - Networked boid flocking
#[derive(Parser)]
#[command(name = "flocknet")]
#[command(author = "FlockNet Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Authoritative flock server with TCP snapshot broadcast", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the authoritative flock server
    Server {
        /// Port to listen on
        #[arg(short, long, default_value_t = protocol::DEFAULT_PORT)]
        port: u16,

        /// Simulation ticks per second
        #[arg(short, long)]
        tick_rate: Option<u32>,

        /// Boids to seed at startup
        #[arg(short, long)]
        boids: Option<usize>,
    },

    /// Connect to a server and watch the flock
    Client {
        /// Server address to connect to
        #[arg(short, long)]
        server: Option<String>,

        /// Server port
        #[arg(short, long, default_value_t = protocol::DEFAULT_PORT)]
        port: u16,

        /// Ask the server to add this many random boids after connecting
        #[arg(long, default_value_t = 0)]
        spawn: usize,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    match cli.command {
        Commands::Server {
            port,
            tick_rate,
            boids,
        } => {
            run_server(config, port, tick_rate, boids).await?;
        }
        Commands::Client {
            server,
            port,
            spawn,
        } => {
            run_client(config, server, port, spawn).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config();
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Run the authoritative server
async fn run_server(
    config: Config,
    port: u16,
    tick_rate: Option<u32>,
    initial_boids: Option<usize>,
) -> anyhow::Result<()> {
    let tick_rate = tick_rate.unwrap_or(config.flock.tick_rate).max(1);
    let initial_boids = initial_boids.unwrap_or(config.flock.initial_boids);

    let mut net_config = config.network.runtime();
    net_config.port = port;

    let mut server = Server::new(net_config);
    let mut inbound_rx = server.take_inbound_receiver().unwrap();

    let mut flock = Flock::new(config.flock.runtime());
    let seeded = flock.spawn_random(initial_boids);
    tracing::info!("Seeded {} boids", seeded);

    let addr = server.start().await?;

    println!("\n========================================");
    println!("  Flock Server Running");
    println!("========================================");
    println!("  Host: {}", config.general.name);
    println!("  Address: {}", addr);
    println!("  Boids: {}", flock.len());
    println!("  Tick rate: {}/s", tick_rate);
    println!("========================================");
    println!("\nWaiting for clients to connect...");
    println!("Press Ctrl+C to stop.\n");

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / tick_rate as f64));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // A stalled host steps the simulation by a capped dt rather than a huge one
    let max_dt = 1.0 / 20.0;
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_tick).as_secs_f32().min(max_dt);
                last_tick = now;

                while let Ok(inbound) = inbound_rx.try_recv() {
                    apply_command(&mut flock, inbound);
                }

                flock.step(dt);
                server.broadcast_state(&flock.snapshot()).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    server.stop().await?;
    tracing::info!("Server stopped");

    Ok(())
}

/// Apply one client command to the flock
fn apply_command(flock: &mut Flock, inbound: InboundPacket) {
    let InboundPacket { session, packet } = inbound;

    match packet.kind {
        PacketKind::AddBoid => match packet.parse_add_boid() {
            Ok(boid) => {
                if flock.insert(boid) {
                    tracing::debug!("Session {} added boid {}", session, boid.id);
                } else {
                    tracing::debug!("Session {} add refused, flock is full", session);
                }
            }
            Err(e) => tracing::warn!("Session {} sent a malformed add: {}", session, e),
        },
        PacketKind::RemoveBoid => match packet.parse_remove_boid() {
            Ok(id) => {
                if flock.remove(id) {
                    tracing::debug!("Session {} removed boid {}", session, id);
                } else {
                    tracing::debug!("Session {} removed unknown boid {}", session, id);
                }
            }
            Err(e) => tracing::warn!("Session {} sent a malformed remove: {}", session, e),
        },
        PacketKind::Error => {
            tracing::warn!(
                "Session {} reported an error: {}",
                session,
                packet.parse_error()
            );
        }
        other => {
            tracing::debug!("Ignoring {:?} packet from session {}", other, session);
        }
    }
}

/// Run a headless client that watches the flock
async fn run_client(
    config: Config,
    server_addr: Option<String>,
    port: u16,
    spawn: usize,
) -> anyhow::Result<()> {
    let Some(addr) = server_addr else {
        anyhow::bail!("Please specify --server address");
    };

    let server_socket_addr: SocketAddr = if addr.contains(':') {
        addr.parse()?
    } else {
        network::resolve_host(&addr, port).await?
    };

    let mut net_config = config.network.runtime();
    net_config.port = port;

    let mut client = Client::new(net_config);
    let mut event_rx = client.take_event_receiver().unwrap();

    println!("Connecting to {}...", server_socket_addr);
    client.connect(server_socket_addr).await?;

    if spawn > 0 {
        spawn_random_boids(&client, &config, spawn).await?;
    }

    println!("\n========================================");
    println!("  Flock Client Connected");
    println!("========================================");
    println!("  Local: {}", config.general.name);
    println!("  Server: {}", server_socket_addr);
    println!("========================================");
    println!("\nWatching the flock...");
    println!("Press Ctrl+C to disconnect.\n");

    let mut stats = tokio::time::interval(Duration::from_secs(1));
    let mut tracked: Option<usize> = None;
    let mut snapshots: u64 = 0;

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ClientEvent::Connected { server_addr } => {
                        tracing::info!("Connected to server at {}", server_addr);
                    }
                    ClientEvent::Snapshot { boids } => {
                        snapshots += 1;
                        tracked = Some(boids.len());
                    }
                    ClientEvent::ServerError { message } => {
                        tracing::error!("Server error: {}", message);
                    }
                    ClientEvent::Disconnected => {
                        println!("Disconnected from server.");
                        return Ok(());
                    }
                }
            }
            _ = stats.tick() => {
                if let Some(count) = tracked {
                    println!("{} boids tracked ({} snapshots received)", count, snapshots);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                break;
            }
        }
    }

    client.disconnect().await?;
    tracing::info!("Client disconnected");

    Ok(())
}

/// Ask the server to add `count` randomly generated boids
async fn spawn_random_boids(client: &Client, config: &Config, count: usize) -> anyhow::Result<()> {
    let mut rng = rand::thread_rng();
    let flock = &config.flock;

    for _ in 0..count {
        let heading = rng.gen_range(0.0..std::f32::consts::TAU);
        let speed = rng.gen_range(MIN_SPEED..MAX_SPEED);
        let boid = Boid::new(
            rng.gen(),
            rng.gen_range(flock.margin..flock.width - flock.margin),
            rng.gen_range(flock.margin..flock.height - flock.margin),
            heading.cos() * speed,
            heading.sin() * speed,
        );
        client.send_add(&boid).await?;
    }

    println!("Requested {} boids", count);
    Ok(())
}
