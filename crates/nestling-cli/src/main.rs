use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Local, NaiveDate, TimeZone};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use nestling_core::{format_duration, AudioClip, Recorder, RecordingController, RecordingState};
use nestling_gateway::Gateway;
use nestling_memory::TimelineCache;
use nestling_platform::{Platform, PlatformConfig};
use nestling_schema::{Session, TimelineEvent};

#[derive(Parser)]
#[command(name = "nestling", version, about = "Voice-first baby care logging")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.nestling",
        help = "Config root directory (contains config/ and data/)"
    )]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Sign in and persist the session")]
    Login {
        #[arg(help = "Account email")]
        email: String,
        #[arg(long, help = "Account password; omit to request a magic link")]
        password: Option<String>,
        #[arg(long, help = "Create the account first (requires --password)")]
        signup: bool,
        #[arg(
            long,
            value_name = "PROVIDER",
            help = "Print an OAuth sign-in link (google, apple) instead"
        )]
        oauth: Option<String>,
    },
    #[command(about = "Sign out and discard the persisted session")]
    Logout,
    #[command(about = "Process a recorded audio file into timeline events")]
    Record {
        #[arg(help = "Path to the audio file (webm)")]
        audio_file: PathBuf,
        #[arg(long, default_value = "0", help = "Clip length in seconds")]
        duration: u64,
    },
    #[command(about = "Show the day's timeline, newest first")]
    Timeline {
        #[arg(long, help = "Day to show (YYYY-MM-DD, default today)")]
        date: Option<NaiveDate>,
    },
    #[command(about = "Invite another caregiver")]
    Invite {
        #[arg(help = "Invitee email (omit with --list)")]
        email: Option<String>,
        #[arg(long, default_value = "parent", help = "Caregiver role")]
        role: String,
        #[arg(long, help = "List existing invitations instead of sending one")]
        list: bool,
    },
    #[command(subcommand, about = "Baby profiles")]
    Baby(BabyCommands),
    #[command(about = "Show session and configuration status")]
    Status,
}

#[derive(Subcommand)]
enum BabyCommands {
    #[command(about = "List the tenant's babies")]
    List,
    #[command(about = "Add a baby profile")]
    Add {
        #[arg(help = "Name")]
        name: String,
        #[arg(long, help = "Birthdate (YYYY-MM-DD)")]
        birthdate: Option<NaiveDate>,
    },
}

/// Recorder over an already-captured audio file. `start` only checks the
/// file is readable; `stop` loads it as the clip.
struct FileRecorder {
    path: PathBuf,
    bytes: Option<Bytes>,
}

impl FileRecorder {
    fn new(path: PathBuf) -> Self {
        Self { path, bytes: None }
    }
}

#[async_trait]
impl Recorder for FileRecorder {
    async fn start(&mut self) -> Result<()> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        if bytes.is_empty() {
            bail!("audio file {} is empty", self.path.display());
        }
        self.bytes = Some(Bytes::from(bytes));
        Ok(())
    }

    async fn stop(&mut self) -> Result<AudioClip> {
        match self.bytes.take() {
            Some(bytes) => Ok(AudioClip::webm(bytes)),
            None => bail!("recorder was not started"),
        }
    }

    fn release(&mut self) {
        self.bytes = None;
    }
}

fn load_config(config_dir: &Path) -> Result<PlatformConfig> {
    let path = config_dir.join("main.yaml");
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: PlatformConfig =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

/// First-run skeleton, written once so `status` can point at what to fill in.
fn ensure_skeleton_config(config_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(config_dir)?;
    let path = config_dir.join("main.yaml");
    if path.exists() {
        return Ok(());
    }
    std::fs::write(
        &path,
        "# Hosted platform connection.\n\
         base_url: \"https://YOUR-PROJECT.example.co\"\n\
         anon_key: \"YOUR-ANON-KEY\"\n\
         recordings_bucket: \"voice-recordings\"\n",
    )?;
    println!("Wrote starter config at {}", path.display());
    Ok(())
}

fn session_path(data_dir: &Path) -> PathBuf {
    data_dir.join("session.json")
}

fn load_session(data_dir: &Path) -> Option<Session> {
    let raw = std::fs::read_to_string(session_path(data_dir)).ok()?;
    match serde_json::from_str::<Session>(&raw) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable session file");
            None
        }
    }
}

fn save_session(data_dir: &Path, session: &Session) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let json = serde_json::to_string_pretty(session)?;
    std::fs::write(session_path(data_dir), json)?;
    Ok(())
}

fn clear_session(data_dir: &Path) {
    let _ = std::fs::remove_file(session_path(data_dir));
}

struct App {
    platform: Platform,
    gateway: Gateway,
    data_dir: PathBuf,
}

fn build_app(config_root: &Path) -> Result<App> {
    let config = load_config(&config_root.join("config"))?;
    let data_dir = config_root.join("data");
    let platform = Platform::new(&config);

    if let Some(session) = load_session(&data_dir) {
        if session.is_expired(chrono::Utc::now()) {
            tracing::info!("persisted session expired, sign in again");
        } else {
            platform.sessions.set(Some(session));
        }
    }

    let gateway = Gateway::new(
        platform.clone(),
        TimelineCache::open(&data_dir),
        config.recordings_bucket.clone(),
    );
    Ok(App {
        platform,
        gateway,
        data_dir,
    })
}

/// Cap on the clip length the state machine is fed; the machine itself
/// imposes no maximum.
const MAX_RECORD_SECS: u64 = 300;

async fn run_record(app: &App, audio_file: PathBuf, mut duration: u64) -> Result<()> {
    if duration > MAX_RECORD_SECS {
        tracing::warn!(duration, cap = MAX_RECORD_SECS, "clip length capped");
        duration = MAX_RECORD_SECS;
    }

    let controller = RecordingController::new(
        Box::new(FileRecorder::new(audio_file)),
        Arc::new(app.gateway.clone()),
    );

    controller.start().await?;
    if controller.state().await != RecordingState::Recording {
        if let Some(error) = controller.processing_error().await {
            bail!(error);
        }
        bail!("recorder did not start");
    }
    controller.set_duration_secs(duration).await;
    println!("Processing {} of audio...", format_duration(duration));
    controller.stop().await?;

    match controller.state().await {
        RecordingState::Completion => {
            let events = controller.last_events().await;
            println!("Logged {} event(s):", events.len());
            for event in &events {
                println!("  {}  {}  {}", event.time, event.kind, event.description);
            }
        }
        _ => {
            let error = controller
                .processing_error()
                .await
                .unwrap_or_else(|| "Failed to process recording".to_string());
            bail!(error);
        }
    }
    Ok(())
}

/// Narrative line shown under a timeline row. Only kinds with a dedicated
/// card render their narrative; everything else stays a one-line generic
/// card.
fn card_narrative(event: &TimelineEvent) -> Option<&str> {
    if event.kind.is_renderable() && event.has_details {
        event.full_narrative.as_deref()
    } else {
        None
    }
}

async fn run_timeline(app: &App, date: Option<NaiveDate>) -> Result<()> {
    let day = date.unwrap_or_else(|| Local::now().date_naive());
    let day_start = Local
        .from_local_datetime(&day.and_hms_opt(0, 0, 0).unwrap())
        .single()
        .context("ambiguous local midnight")?;

    let events = app.gateway.timeline_for_day(day_start).await?;
    if events.is_empty() {
        println!("No events for {day}.");
        return Ok(());
    }
    println!("Timeline for {day}:");
    for event in &events {
        let marker = if event.is_new { "*" } else { " " };
        println!(
            "{marker} {:>8}  {:<10} {}",
            event.time, event.kind, event.description
        );
        if let Some(narrative) = card_narrative(event) {
            println!("            \"{narrative}\"");
        }
    }
    // Shown once; the next render treats them as settled.
    app.gateway.clear_new_flags();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Expand ~ to home directory
    if cli.config_root.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.config_root = PathBuf::from(home).join(
                cli.config_root
                    .strip_prefix("~")
                    .unwrap_or(&cli.config_root),
            );
        }
    }

    let log_dir = cli.config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "nestling.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    ensure_skeleton_config(&cli.config_root.join("config"))?;

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Login {
            email,
            password,
            signup,
            oauth,
        } => {
            let app = build_app(&cli.config_root)?;
            if let Some(provider) = oauth {
                let url = app.platform.auth.oauth_authorize_url(&provider, None);
                println!("Open this link in a browser to finish signing in:\n{url}");
            } else {
                match password {
                    Some(password) => {
                        let session = if signup {
                            app.platform.auth.sign_up(&email, &password).await?
                        } else {
                            app.platform
                                .auth
                                .sign_in_with_password(&email, &password)
                                .await?
                        };
                        save_session(&app.data_dir, &session)?;
                        println!(
                            "Signed in as {}.",
                            session.user.email.as_deref().unwrap_or(&email)
                        );
                        if !session.user.user_metadata.onboarding_completed {
                            println!(
                                "Onboarding incomplete: add a baby with `nestling baby add`."
                            );
                        }
                    }
                    None if signup => bail!("--signup requires --password"),
                    None => {
                        app.platform.auth.request_magic_link(&email).await?;
                        println!("Magic link sent to {email}. Finish sign-in there.");
                    }
                }
            }
        }
        Commands::Logout => {
            let app = build_app(&cli.config_root)?;
            if let Err(e) = app.platform.auth.sign_out().await {
                tracing::warn!(error = %e, "remote sign-out failed, clearing local session");
            }
            clear_session(&app.data_dir);
            println!("Signed out.");
        }
        Commands::Record {
            audio_file,
            duration,
        } => {
            let app = build_app(&cli.config_root)?;
            run_record(&app, audio_file, duration).await?;
        }
        Commands::Timeline { date } => {
            let app = build_app(&cli.config_root)?;
            run_timeline(&app, date).await?;
        }
        Commands::Invite { email, role, list } => {
            let app = build_app(&cli.config_root)?;
            if list {
                let invitations = app.gateway.invitations().await?;
                if invitations.is_empty() {
                    println!("No invitations yet.");
                }
                for invitation in &invitations {
                    println!(
                        "{}  {}  {}  expires {}",
                        invitation.code, invitation.email, invitation.role, invitation.expires_at
                    );
                }
            } else {
                let Some(email) = email else {
                    bail!("invitee email required (or use --list)");
                };
                let resp = app.gateway.invite(&email, &role).await?;
                match resp.code {
                    Some(code) => println!("Invitation code for {email}: {code} (valid 7 days)"),
                    None => println!(
                        "{}",
                        resp.message.unwrap_or_else(|| "Invitation sent.".to_string())
                    ),
                }
            }
        }
        Commands::Baby(BabyCommands::List) => {
            let app = build_app(&cli.config_root)?;
            let babies = app.gateway.babies().await?;
            if babies.is_empty() {
                println!("No babies yet. Add one with `nestling baby add`.");
            }
            for baby in &babies {
                match baby.birthdate {
                    Some(birthdate) => println!("{}  (born {birthdate})", baby.name),
                    None => println!("{}", baby.name),
                }
            }
        }
        Commands::Baby(BabyCommands::Add { name, birthdate }) => {
            let app = build_app(&cli.config_root)?;
            let baby = app.gateway.add_baby(&name, birthdate).await?;
            println!("Added {}.", baby.name);
        }
        Commands::Status => {
            let app = build_app(&cli.config_root)?;
            match app.platform.sessions.current() {
                Some(session) => {
                    println!(
                        "Signed in as {}.",
                        session.user.email.as_deref().unwrap_or("(no email)")
                    );
                    println!(
                        "Onboarding: {}",
                        if session.user.user_metadata.onboarding_completed {
                            "complete"
                        } else {
                            "incomplete"
                        }
                    );
                }
                None => println!("Not signed in. Run `nestling login <email>`."),
            }
            let cached = app.gateway.cache().load();
            println!("Cached timeline events: {}", cached.len());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_parses_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("main.yaml"),
            "base_url: \"https://x.test\"\nanon_key: \"anon\"\n",
        )
        .unwrap();

        let config = load_config(&config_dir).unwrap();
        assert_eq!(config.base_url, "https://x.test");
        assert_eq!(config.recordings_bucket, "voice-recordings");
    }

    #[test]
    fn skeleton_config_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config");
        ensure_skeleton_config(&config_dir).unwrap();
        let first = std::fs::read_to_string(config_dir.join("main.yaml")).unwrap();
        std::fs::write(config_dir.join("main.yaml"), "base_url: \"kept\"\nanon_key: \"k\"\n")
            .unwrap();
        ensure_skeleton_config(&config_dir).unwrap();
        let second = std::fs::read_to_string(config_dir.join("main.yaml")).unwrap();
        assert_ne!(first, second);
        assert!(second.contains("kept"));
    }

    #[test]
    fn session_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let session: Session = serde_json::from_str(
            r#"{
                "access_token": "tok",
                "user": { "id": "u1", "email": "parent@example.com" }
            }"#,
        )
        .unwrap();

        save_session(dir.path(), &session).unwrap();
        let loaded = load_session(dir.path()).unwrap();
        assert_eq!(loaded.access_token, "tok");

        clear_session(dir.path());
        assert!(load_session(dir.path()).is_none());
    }

    #[test]
    fn corrupt_session_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(session_path(dir.path()), "not json").unwrap();
        assert!(load_session(dir.path()).is_none());
    }

    #[test]
    fn card_narrative_only_for_dedicated_cards() {
        use nestling_schema::EventType;

        let mut event = TimelineEvent {
            id: "e1".into(),
            kind: EventType::Feeding,
            time: "10:00 AM".into(),
            timestamp: None,
            description: "Feeding time".into(),
            full_narrative: Some("gave her a bottle".into()),
            related_patterns: vec![],
            has_details: true,
            is_new: false,
        };
        assert_eq!(card_narrative(&event), Some("gave her a bottle"));

        // Kinds without a dedicated card stay one-line.
        event.kind = EventType::Note;
        assert_eq!(card_narrative(&event), None);

        event.kind = EventType::Feeding;
        event.has_details = false;
        assert_eq!(card_narrative(&event), None);
    }

    #[tokio::test]
    async fn file_recorder_loads_the_clip_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("clip.webm");
        std::fs::write(&audio, b"RIFFdata").unwrap();

        let mut recorder = FileRecorder::new(audio);
        recorder.start().await.unwrap();
        let clip = recorder.stop().await.unwrap();
        assert_eq!(&clip.bytes[..], b"RIFFdata");
        assert_eq!(clip.content_type, "audio/webm");
    }

    #[tokio::test]
    async fn file_recorder_rejects_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();

        let mut missing = FileRecorder::new(dir.path().join("nope.webm"));
        assert!(missing.start().await.is_err());

        let empty_path = dir.path().join("empty.webm");
        std::fs::write(&empty_path, b"").unwrap();
        let mut empty = FileRecorder::new(empty_path);
        assert!(empty.start().await.is_err());

        let mut stopped_without_start = FileRecorder::new(dir.path().join("x.webm"));
        assert!(stopped_without_start.stop().await.is_err());
    }
}
