use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info, warn};

use mmo_protocol::config::NetworkConfig;
use mmo_protocol::core::command::Opcode;
use mmo_protocol::error::{ProtocolError, Result};
use mmo_protocol::protocol::dispatcher::Dispatcher;
use mmo_protocol::protocol::handshake;
use mmo_protocol::transport::{Inbound, Server, StopReason};
use mmo_protocol::utils::crypto::KeyAgent;
use mmo_protocol::utils::logging::init_logging;

#[derive(Debug, Parser)]
#[command(name = "mmo-server", version, about = "Session and relay server for game clients")]
struct Args {
    /// TOML configuration file; defaults plus MMO_* environment overrides if absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding server.pub and server.key
    #[arg(long, default_value = ".")]
    key_dir: PathBuf,

    /// Print the default configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if args.print_config {
        println!("{}", NetworkConfig::example_config());
        return;
    }

    if let Err(e) = run(args).await {
        error!(error = %e, "Server exited with error");
        eprintln!("mmo-server: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::default(),
    };
    config.apply_env();
    config.validate_strict()?;
    init_logging(&config.logging)?;

    let agent = load_keys(&args.key_dir)?;
    let server = Server::new(&config, agent);
    server.start(relay_dispatcher()?.into_callback()).await?;

    tokio::signal::ctrl_c().await?;
    server.stop_with(StopReason::Interrupted);

    if let Err(e) = server.drain(config.server.shutdown_timeout).await {
        warn!(error = %e, "Sessions still open after shutdown timeout");
    }
    info!("Server stopped");
    Ok(())
}

/// Restore the key pair, writing a fresh one if it was missing or corrupt
fn load_keys(dir: &Path) -> Result<KeyAgent> {
    let public_path = dir.join("server.pub");
    let private_path = dir.join("server.key");
    let public = std::fs::read(&public_path).unwrap_or_default();
    let private = std::fs::read(&private_path).unwrap_or_default();

    let (agent, regenerated) = KeyAgent::load_or_generate(&public, &private);
    if regenerated {
        std::fs::write(&public_path, agent.public_key())
            .and_then(|_| write_secret(&private_path, &agent.private_key()[..]))
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to persist key pair: {e}")))?;
        info!(path = %dir.display(), "Generated new server key pair");
    }
    Ok(agent)
}

/// Write a file only the owner can read, tightening it if it already existed
fn write_secret(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o600);

    let mut file = options.open(path)?;
    // the mode above only applies to a newly created file
    #[cfg(unix)]
    file.set_permissions(<std::fs::Permissions as std::os::unix::fs::PermissionsExt>::from_mode(0o600))?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Accept every login and relay chat and movement to the other players
fn relay_dispatcher() -> Result<Dispatcher> {
    let dispatcher = Dispatcher::new();

    dispatcher.register(Opcode::Login, |server, inbound| {
        if let Some(handle) = inbound.session() {
            server.send(handle, &handshake::login_accepted())?;
        }
        Ok(())
    })?;

    for opcode in [Opcode::Chat, Opcode::PlayerUpdate] {
        dispatcher.register(opcode, |server, inbound| {
            if let Inbound::Session { handle, command } = inbound {
                if server.account(handle).is_some() {
                    server.send_others(command, handle)?;
                }
            }
            Ok(())
        })?;
    }

    dispatcher.register(Opcode::Heartbeat, |server, inbound| match inbound {
        Inbound::Session { handle, command } => server.send(handle, command),
        Inbound::Datagram { from, .. } => {
            info!(%from, "Heartbeat datagram");
            Ok(())
        }
    })?;

    dispatcher.register(Opcode::Logout, |server, inbound| {
        if let Some(handle) = inbound.session() {
            server.close_session(handle)?;
        }
        Ok(())
    })?;

    dispatcher.register(Opcode::ProbeReply, |_, inbound| {
        if let Inbound::Datagram { from, command } = inbound {
            info!(%from, seq = ?command.get_u8(mmo_protocol::protocol::props::SEQ), "Probe reply");
        }
        Ok(())
    })?;

    Ok(dispatcher)
}
