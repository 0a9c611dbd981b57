// SPDX-License-Identifier: MIT OR Apache-2.0

//! roomlink CLI - interactive session coordinator
//!
//! Runs one local coordinator plus a few simulated peers against in-process
//! directory and relay services, so the whole create / join / leave cycle
//! can be driven from a terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use roomlink_cli::{parse_command, render, Command, HELP};
use roomlink_core::EncryptionType;
use roomlink_network::{
    load_config, load_config_from, CoordinatorConfig, CoordinatorEvent, IdentityProvider,
    InMemoryDirectory, InMemoryRelay, LocalIdentity, RecordingTransport, Services,
    SessionCoordinator,
};
use tokio::io::AsyncBufReadExt;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(name = "roomlink-cli", about = "Interactive room session coordinator", version)]
struct Args {
    /// Relay transport security (overrides the config file)
    #[clap(short, long, value_enum)]
    encryption: Option<Encryption>,

    /// Display name to sign in with
    #[clap(short = 'n', long)]
    player_name: Option<String>,

    /// Config file to use instead of the per-user one
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Number of simulated peers sharing the in-process services
    #[clap(long, default_value = "2")]
    peers: usize,

    /// Enable debug logging
    #[clap(long)]
    debug: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Encryption {
    /// Native clients over DTLS
    Dtls,
    /// Browser clients over secure WebSockets
    Wss,
}

impl From<Encryption> for EncryptionType {
    fn from(value: Encryption) -> Self {
        match value {
            Encryption::Dtls => EncryptionType::Dtls,
            Encryption::Wss => EncryptionType::Wss,
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(args: &Args) -> Result<CoordinatorConfig> {
    let mut config = match &args.config {
        Some(path) => load_config_from(path)?,
        None => load_config().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default config");
            CoordinatorConfig::default()
        }),
    };
    if let Some(encryption) = args.encryption {
        config.encryption = encryption.into();
    }
    config.validate()?;
    Ok(config)
}

/// A simulated peer and whether it currently sits in a session
struct SimPeer {
    name: String,
    coordinator: SessionCoordinator,
    joined: bool,
}

struct App {
    local: SessionCoordinator,
    identity: Arc<LocalIdentity>,
    peers: Vec<SimPeer>,
}

impl App {
    fn new(config: CoordinatorConfig, peer_count: usize) -> Self {
        let directory = Arc::new(InMemoryDirectory::new());
        let relay = Arc::new(InMemoryRelay::new());

        let coordinator_for = |identity: Arc<LocalIdentity>| {
            let services = Services {
                directory: directory.clone(),
                relay: relay.clone(),
                identity,
                transport: Arc::new(RecordingTransport::new()),
            };
            let coordinator = SessionCoordinator::new(services, config.clone());
            coordinator.spawn_driver();
            coordinator
        };

        let identity = Arc::new(LocalIdentity::new());
        let local = coordinator_for(identity.clone());

        let peers = (1..=peer_count)
            .map(|i| {
                let name = format!("Bot{}", i);
                let identity = Arc::new(LocalIdentity::signed_in(format!("sim-{}", i), name.clone()));
                SimPeer {
                    name,
                    coordinator: coordinator_for(identity),
                    joined: false,
                }
            })
            .collect();

        Self { local, identity, peers }
    }

    /// Run one command; `Ok(false)` ends the loop
    async fn handle(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::Create { name, capacity } => {
                let session = self.local.create_session(&name, capacity).await?;
                println!("Created '{}' - share lobby code {}", session.name, session.lobby_code);
            }
            Command::Join { code } => {
                let session = self.local.join_session_by_code(&code).await?;
                println!("Joined '{}' ({} players)", session.name, session.players.len());
            }
            Command::Quick => {
                let session = self.local.quick_join_session().await?;
                println!("Quick-joined '{}' (code {})", session.name, session.lobby_code);
            }
            Command::Leave => {
                if self.local.is_in_session() {
                    self.local.leave_session().await;
                } else {
                    println!("Not in a session");
                }
            }
            Command::Rename { name } => {
                let applied = self.local.set_display_name(&name).await?;
                println!("You are now '{}'", applied);
            }
            Command::Roster => match self.local.current_session() {
                Some(session) => print!(
                    "{}",
                    render::render_roster(&session, self.identity.local_player_id().as_deref())
                ),
                None => println!("Not in a session"),
            },
            Command::Refresh => {
                self.local.refresh_now().await?;
                println!("Session refreshed");
            }
            Command::PeerJoin => self.peer_join().await?,
            Command::PeerLeave => self.peer_leave().await,
            Command::Status => {
                println!(
                    "{}",
                    render::render_status(
                        self.local.phase(),
                        self.local.current_session().as_ref(),
                        self.local.is_host(),
                        self.local.timers(),
                    )
                );
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    async fn peer_join(&mut self) -> Result<()> {
        let session = self
            .local
            .current_session()
            .context("Create or join a session first")?;
        let peer = self
            .peers
            .iter_mut()
            .find(|p| !p.joined)
            .context("Every simulated peer is already in a session")?;

        peer.coordinator.join_session_by_code(&session.lobby_code).await?;
        peer.joined = true;
        println!("{} joined", peer.name);
        Ok(())
    }

    async fn peer_leave(&mut self) {
        match self.peers.iter_mut().rev().find(|p| p.joined) {
            Some(peer) => {
                peer.coordinator.leave_session().await;
                peer.joined = false;
                println!("{} left", peer.name);
            }
            None => println!("No simulated peer is in a session"),
        }
    }

    async fn shutdown(&self) {
        for peer in &self.peers {
            peer.coordinator.shutdown().await;
        }
        self.local.shutdown().await;
    }
}

/// Main entry point
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let config = resolve_config(&args)?;
    tracing::info!(?config, "Starting roomlink CLI");

    let mut app = App::new(config, args.peers);
    let name = app.local.sign_in(args.player_name.as_deref()).await?;
    println!("Signed in as '{}'. Type 'help' for commands.", name);

    let mut events = app.local.subscribe();
    let mut stdin_lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!("\nReceived Ctrl+C, shutting down gracefully...");
                break;
            }

            result = stdin_lines.next_line() => {
                let line = match result {
                    Ok(Some(line)) => line,
                    Ok(None) => break, // EOF
                    Err(e) => {
                        eprintln!("Error reading input: {}", e);
                        continue;
                    }
                };

                let command = match parse_command(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        eprintln!("{}", e);
                        continue;
                    }
                };

                match app.handle(command).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("Error: {}", e),
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        println!("{}", render::render_event(&event));
                        if let CoordinatorEvent::RosterChanged(_) = event {
                            if let Some(session) = app.local.current_session() {
                                print!("{}", render::render_roster(&session, app.identity.local_player_id().as_deref()));
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    app.shutdown().await;
    Ok(())
}
