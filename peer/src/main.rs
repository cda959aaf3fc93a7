use clap::Parser;
use log::{debug, info};
use peer::engine::ArenaEngine;
use peer::transport::udp::UdpTransport;
use peer::{Command, NodeEvent, PeerNode, SyncConfig};
use shared::{Difficulty, Dimensions, Direction, GameSettings};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rendezvous server used to register and look up room codes
    #[arg(short = 'r', long, default_value = "127.0.0.1:9000")]
    rendezvous: SocketAddr,

    /// Local address to bind the peer socket to
    #[arg(short = 'b', long, default_value = "0.0.0.0:0")]
    bind: String,

    /// Host a new room on startup
    #[arg(long, conflicts_with = "join")]
    host: bool,

    /// Join the room with this code on startup
    #[arg(short = 'j', long)]
    join: Option<String>,

    /// Viewport width reported to the opponent
    #[arg(short = 'w', long, default_value = "800")]
    width: u32,

    /// Viewport height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "600")]
    height: u32,

    #[arg(short = 'd', long, default_value = "medium")]
    difficulty: Difficulty,

    /// Disable bombs and the chasing hazard
    #[arg(long)]
    no_bombs: bool,

    /// Signal ready as soon as the channel opens
    #[arg(long)]
    auto_ready: bool,

    /// Host only: start as soon as both sides are ready
    #[arg(long)]
    auto_start: bool,
}

/// Turns one line of console input into a node command. Settings commands
/// edit `settings` in place and send the whole result.
fn parse_command(line: &str, settings: &mut GameSettings) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".into());
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "host" => Command::Host,
        "join" => match words.next() {
            Some(code) => Command::Join(code.to_string()),
            None => return Err("usage: join <code>".into()),
        },
        "ready" => Command::SignalReady,
        "start" => Command::RequestStart,
        "rematch" => Command::Rematch,
        "cancel" | "leave" => Command::Cancel,
        "quit" | "exit" => Command::Shutdown,
        "w" | "up" => Command::Input(Direction::Up),
        "s" | "down" => Command::Input(Direction::Down),
        "a" | "left" => Command::Input(Direction::Left),
        "d" | "right" => Command::Input(Direction::Right),
        "difficulty" => {
            let level = words.next().ok_or("usage: difficulty <easy|medium|hard>")?;
            settings.difficulty = level.parse()?;
            Command::UpdateSettings(settings.clone())
        }
        "bombs" => {
            settings.bombs_enabled = match words.next() {
                Some("on") => true,
                Some("off") => false,
                _ => return Err("usage: bombs <on|off>".into()),
            };
            Command::UpdateSettings(settings.clone())
        }
        "size" => {
            let mut next_u32 = || words.next().and_then(|w| w.parse::<u32>().ok());
            match (next_u32(), next_u32()) {
                (Some(width), Some(height)) => {
                    Command::SetDimensions(Dimensions::new(width, height))
                }
                _ => return Err("usage: size <width> <height>".into()),
            }
        }
        other => return Err(format!("unknown command '{}'", other)),
    };

    Ok(command)
}

fn spawn_console(commands: mpsc::UnboundedSender<Command>, mut settings: GameSettings) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line, &mut settings) {
                Ok(command) => {
                    if commands.send(command).is_err() {
                        break;
                    }
                }
                Err(message) => eprintln!("{}", message),
            }
        }
        let _ = commands.send(Command::Shutdown);
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let settings = GameSettings {
        difficulty: args.difficulty,
        bombs_enabled: !args.no_bombs,
        ..GameSettings::default()
    };

    info!("Starting peer...");
    info!("Rendezvous: {}", args.rendezvous);
    info!("Commands: host, join <code>, ready, start, rematch, w/a/s/d, cancel, quit");

    let transport = UdpTransport::bind(&args.bind, args.rendezvous).await?;
    info!("Peer socket bound to {}", transport.local_addr()?);

    let config = SyncConfig::default();
    let engine = ArenaEngine::new().with_tile_size(config.tile_size);
    let mut node = PeerNode::new(
        transport,
        engine,
        config,
        settings.clone(),
        Dimensions::new(args.width, args.height),
    );
    let mut events = node.subscribe();

    let (commands, command_rx) = mpsc::unbounded_channel();
    if args.host {
        commands.send(Command::Host)?;
    } else if let Some(code) = args.join.clone() {
        commands.send(Command::Join(code))?;
    }
    spawn_console(commands.clone(), settings);

    let auto_ready = args.auto_ready;
    let auto_start = args.auto_start;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                NodeEvent::Snapshot(_) => {
                    debug!("{:?}", event);
                    continue;
                }
                NodeEvent::RoomCreated(code) => println!("Room code: {}", code),
                NodeEvent::Connected { .. } if auto_ready => {
                    let _ = commands.send(Command::SignalReady);
                }
                NodeEvent::ReadyChanged(status) if auto_start && status.both() => {
                    let _ = commands.send(Command::RequestStart);
                }
                NodeEvent::ReturnedToLobby if auto_ready => {
                    let _ = commands.send(Command::SignalReady);
                }
                _ => {}
            }
            println!("{:?}", event);
        }
    });

    node.run(command_rx).await;
    info!("Peer stopped");

    Ok(())
}
