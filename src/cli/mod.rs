pub mod dates;
pub mod history;
pub mod output;
pub mod records;
pub mod shutdown;
pub mod timer;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use history::{process_history_command, HistoryCommand};
use records::{EditCommand, SegmentCommand};
use tokio::sync::Mutex;
use tracing::{debug, level_filters::LevelFilter, warn};

use crate::{
    recovery::RecoveryStore,
    settings::SettingsStore,
    storage::FileSlots,
    sync::{HttpRecordStore, PersistenceSync, RefreshChannel},
    tracker::Tracker,
    utils::{
        clock::{Clock, DefaultClock},
        dir::{create_application_default_path, ensure_dir},
        logging::{enable_logging, CLI_PREFIX},
        runtime::single_thread_runtime,
    },
};

#[derive(Parser, Debug)]
#[command(name = "timerecorder", version, long_about = None)]
#[command(about = "Record timed activity sessions and keep them in a record store", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, global = true, help = "Record store address. Overrides settings and TIMERECORDER_SERVER")]
    server: Option<String>,
    #[arg(long, global = true, help = "Act as this user for this command only")]
    user: Option<String>,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Start the timer and show a live clock. Ctrl-C leaves it running")]
    Start {
        activity: String,
        #[arg(long, short, help = "Category of the activity. Looked up in the registry if omitted")]
        category: Option<String>,
        #[arg(long, short, help = "Start and exit without showing the clock")]
        detach: bool,
    },
    #[command(about = "Show the live clock of a timer started earlier")]
    Resume {},
    #[command(about = "Stop the running timer and save the segment")]
    Stop {},
    #[command(about = "Show the timer and today's totals")]
    Status {},
    #[command(about = "Drop the running timer without saving anything")]
    Abandon {},
    #[command(about = "Continue an existing record with a new segment")]
    Continue {
        id: String,
        #[arg(long, help = "Only fetch the record and check it can be continued")]
        no_start: bool,
    },
    #[command(about = "List today's records")]
    Records {},
    #[command(about = "Browse all records with filters")]
    History {
        #[command(flatten)]
        command: HistoryCommand,
    },
    #[command(about = "Show a record with its segments")]
    Show { id: String },
    #[command(about = "Delete a record")]
    Delete { id: String },
    #[command(about = "Add, remove or change segments of a record")]
    Segment {
        #[command(subcommand)]
        command: SegmentCommand,
    },
    #[command(about = "Change activity, category, remark, emotion or pause count of a record")]
    Edit {
        #[command(flatten)]
        command: EditCommand,
    },
    #[command(about = "Switch to another user, taking the current records along")]
    User { name: String },
    #[command(about = "Reprint the records whenever another instance changes them")]
    Watch {},
    #[command(about = "Show activity categories")]
    Categories {},
}

pub type SharedTracker = Arc<Mutex<Tracker>>;

/// Everything a command needs.
pub struct App {
    pub tracker: SharedTracker,
    pub settings: SettingsStore,
    pub clock: Arc<dyn Clock>,
}

pub fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = args.dir.clone().map_or_else(create_application_default_path, ensure_dir)?;

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir.join("logs"), logging_level, args.log)?;

    single_thread_runtime()?.block_on(async move { run_command(args, app_dir).await })
}

async fn open_app(args: &Args, app_dir: PathBuf) -> Result<App> {
    let settings = SettingsStore::new(app_dir.clone())?;
    let resolved = settings.resolved(args.server.clone(), args.user.clone());
    debug!("Using record store {}", resolved.server_url);

    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let slots = Arc::new(FileSlots::new(app_dir.join("slots"))?);
    let refresh = RefreshChannel::new(
        slots.clone(),
        clock.clone(),
        &resolved.origin(),
        resolved.refresh_poll_interval(),
    );
    if let Err(e) = refresh.sweep_expired().await {
        warn!("Failed to clear expired refresh marker {e:?}");
    }
    let store = Arc::new(HttpRecordStore::new(&resolved.server_url)?);
    let sync = PersistenceSync::new(store, refresh);
    let recovery = RecoveryStore::new(slots, clock.clone());

    let tracker = Tracker::open(sync, recovery, clock.clone(), &resolved.username).await;

    Ok(App {
        tracker: Arc::new(Mutex::new(tracker)),
        settings,
        clock,
    })
}

async fn run_command(args: Args, app_dir: PathBuf) -> Result<()> {
    let mut app = open_app(&args, app_dir).await?;
    match args.commands {
        Commands::Start {
            activity,
            category,
            detach,
        } => timer::start(&app, &activity, category.as_deref(), detach).await,
        Commands::Resume {} => timer::resume(&app).await,
        Commands::Stop {} => timer::stop(&app).await,
        Commands::Status {} => timer::status(&app).await,
        Commands::Abandon {} => timer::abandon(&app).await,
        Commands::Continue { id, no_start } => timer::continue_record(&app, id.into(), !no_start).await,
        Commands::Records {} => records::list(&app).await,
        Commands::History { command } => process_history_command(&app, command).await,
        Commands::Show { id } => records::show(&app, id.into()).await,
        Commands::Delete { id } => records::delete(&app, id.into()).await,
        Commands::Segment { command } => records::process_segment_command(&app, command).await,
        Commands::Edit { command } => records::edit(&app, command).await,
        Commands::User { name } => records::set_username(&mut app, &name).await,
        Commands::Watch {} => records::watch(&app).await,
        Commands::Categories {} => records::categories(&app).await,
    }
}
