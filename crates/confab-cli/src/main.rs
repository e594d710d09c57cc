use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use confab_core::{
    CameraFacing, DeepLink, Identity, LoopbackEngine, MediaSettings, SessionConfig, SessionError,
    SessionEvent, SessionHandle, SessionListener, SessionOrchestrator, SettingsStore, TokenClient,
};
use tokio::sync::watch;

/// Join a conference room from the terminal.
///
/// Lines typed on stdin are broadcast to the room. Commands:
/// `/camera front|back`, `/bitrate <kbps>`, `/peers`, `/leave`.
#[derive(Parser, Debug)]
#[command(name = "confab", version)]
struct Args {
    /// Deep link such as `confab://meet.example.com/join?room=<id>`.
    #[arg(conflicts_with = "room")]
    link: Option<String>,
    /// Room id, when no deep link is given.
    #[arg(long)]
    room: Option<String>,
    /// Display name; stored in the settings file.
    #[arg(long, env = "CONFAB_NAME")]
    name: Option<String>,
    /// Use this token instead of asking the token service.
    #[arg(long, env = "CONFAB_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// JSON session configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory holding `settings.json`.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

/// Prints session events for the terminal user.
struct ConsoleListener;

impl SessionListener for ConsoleListener {
    fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged(state) => println!("* {state}"),
            SessionEvent::PeerJoined(peer) => println!("* {} joined", peer.display_name),
            SessionEvent::PeerLeft(peer_id) => println!("* {peer_id} left"),
            SessionEvent::BroadcastReceived(message) => {
                let from = message.from_peer.as_deref().unwrap_or("?");
                println!("<{from}> {}", serde_json::Value::Object(message.payload));
            }
            SessionEvent::Error(e) => eprintln!("! {e}"),
            other => tracing::debug!("session event: {other:?}"),
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("confab_core=info,confab_cli=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("confab: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), SessionError> {
    let config = match &args.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };

    let data_dir = args
        .data_dir
        .clone()
        .or_else(|| dirs::data_dir().map(|d| d.join("confab")))
        .unwrap_or_else(|| PathBuf::from("."));
    let settings = SettingsStore::new(&data_dir);
    if let Some(name) = &args.name {
        settings.set_display_name(Some(name.clone()));
    }

    let room_id = match (&args.link, &args.room) {
        (Some(link), _) => {
            let link = DeepLink::parse(link)?;
            tracing::info!("deep link opened: room={} host={}", link.room_id, link.host);
            link.room_id
        }
        (None, Some(room)) => room.clone(),
        (None, None) => {
            return Err(SessionError::Config(
                "a deep link or --room is required".into(),
            ));
        }
    };
    let display_name = settings
        .get()
        .display_name
        .unwrap_or_else(|| "guest".to_string());

    let (engine, events) = LoopbackEngine::new();
    let session = SessionOrchestrator::spawn(
        Arc::new(engine),
        events,
        room_id,
        config.clone(),
        settings.get().constraints(),
    );
    session.add_listener(Arc::new(ConsoleListener));

    match &args.token {
        Some(token) => {
            session
                .connect(Identity::new(display_name.clone(), token.clone()))
                .await?
        }
        None => {
            let tokens = TokenClient::new(config.token_timeout())?;
            session.setup(&tokens, &display_name).await?;
        }
    }

    let forwarder = tokio::spawn(forward_settings(settings.subscribe(), session.clone()));

    tokio::select! {
        result = read_commands(&session, &settings) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    forwarder.abort();
    session.leave().await?;
    Ok(())
}

/// Push every settings change into the running session.
async fn forward_settings(
    mut changes: watch::Receiver<MediaSettings>,
    session: SessionHandle,
) {
    while changes.changed().await.is_ok() {
        let constraints = changes.borrow_and_update().constraints();
        if let Err(e) = session.reconfigure(constraints).await {
            tracing::warn!("settings not applied: {e}");
        }
    }
}

async fn read_commands(session: &SessionHandle, settings: &SettingsStore) -> Result<(), SessionError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let channel = session.broadcast_channel();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| SessionError::Config(format!("stdin: {e}")))?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut words = line.split_whitespace();
        match words.next() {
            Some("/leave") | Some("/quit") => break,
            Some("/camera") => match words.next() {
                Some("front") => settings.set_camera_facing(CameraFacing::Front),
                Some("back") => settings.set_camera_facing(CameraFacing::Back),
                _ => eprintln!("usage: /camera front|back"),
            },
            Some("/bitrate") => match words.next().and_then(|w| w.parse().ok()) {
                Some(kbps) => settings.set_bitrate_kbps(kbps),
                None => eprintln!("usage: /bitrate <kbps>"),
            },
            Some("/peers") => {
                for peer in session.participants().await? {
                    println!("  {} ({})", peer.display_name, peer.peer_id);
                }
            }
            _ => {
                let mut payload = serde_json::Map::new();
                payload.insert("text".into(), line.into());
                if let Err(e) = channel.send(payload).await {
                    eprintln!("! not sent: {e}");
                }
            }
        }
    }
    Ok(())
}
