//! codecollab: headless terminal client for a shared coding room.
//!
//! Joins an existing room (or creates one), then turns stdin lines into
//! session commands and prints what the session reports back. Backend
//! endpoints come from `CODECOLLAB_*` environment variables or flags.

mod input;

use clap::Parser;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use codecollab_core::RoomId;
use codecollab_sync::{
    Backend, EditorSurface, Notice, Session, SessionCommand, SessionConfig, SyncConnector,
    TextBuffer,
};

#[derive(Parser, Debug)]
#[command(name = "codecollab")]
#[command(about = "Edit files in a shared room from the terminal")]
#[command(version)]
struct Cli {
    /// Room to join (a new room is created if omitted)
    room: Option<String>,

    /// Backend base URL, overrides CODECOLLAB_BACKEND_URL
    #[arg(long)]
    backend: Option<String>,

    /// WebSocket base URL, overrides CODECOLLAB_WS_URL
    #[arg(long)]
    ws: Option<String>,

    /// Show one marker per remote participant instead of only the latest
    #[arg(long)]
    all_cursors: bool,
}

impl Cli {
    fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::from_env();
        if let Some(url) = &self.backend {
            config.backend_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = &self.ws {
            config.ws_url = Some(url.trim_end_matches('/').to_string());
        }
        if self.all_cursors {
            config.presence_capacity = codecollab_sync::PresenceCapacity::PerSender;
        }
        config
    }
}

fn describe(notice: &Notice) -> String {
    match notice {
        Notice::Output(output) => format!("[terminal]\n{output}"),
        Notice::Saved(id) => format!("saved file {id}"),
        Notice::SaveFailed(id) => format!("could not save file {id}"),
        Notice::FileCreated(id) => format!("created file {id}"),
        Notice::ActiveFileChanged(id) => format!("now editing file {id}"),
        Notice::Disconnected => "connection lost, changes stay local".to_string(),
    }
}

fn print_files(session: &Session<TextBuffer>) {
    let active = session.store().active_id();
    for file in session.store().files() {
        let marker = if Some(file.id) == active { '*' } else { ' ' };
        println!("{marker} {:>4}  {}", file.id, file.filename);
    }
}

/// Forward stdin lines as commands until EOF or `:quit`.
async fn read_commands(commands: mpsc::UnboundedSender<SessionCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim() == ":help" {
            println!("{}", input::HELP);
            continue;
        }
        match input::parse_line(&line) {
            Ok(command) => {
                let quit = command == SessionCommand::Close;
                if commands.send(command).is_err() || quit {
                    break;
                }
            }
            Err(e) => eprintln!("{e:#}"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.config();
    let backend = Backend::http(&config)?;

    let room = match &cli.room {
        Some(raw) => RoomId::parse(raw)?,
        None => {
            let room = backend.storage.create_room().await?;
            println!("created room {room}");
            room
        }
    };

    info!("Joining room {room} as {}", config.sender_id);
    let connector = SyncConnector::new();
    let mut session = Session::start(config, backend, &connector, room, TextBuffer::new()).await;
    print_files(&session);
    println!("{}", session.output());
    println!("type :help for commands");

    let mut notices = session.subscribe_notices();
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            println!("{}", describe(&notice));
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(read_commands(tx));
    session.run(rx).await;
    session.close().await;

    print_files(&session);
    if let Some(file) = session.store().get_active() {
        println!("--- {} ---\n{}", file.filename, session.surface().value());
    }
    Ok(())
}
