use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod config;
mod database;
mod error;
mod filesystem;
mod models;
mod services;

use config::BoothConfig;
use database::LocalStore;
use error::AppError;
use models::queue_item::Payload;
use models::QueueItemType;
use photo_upload::{PhotoStatus, PhotoTarget};
use services::api_client::HttpReplayHandler;
use services::{auth_service, photo_service, NotificationStore, OfflineQueue, ReplayService};

#[derive(Parser)]
#[command(name = "optitour-booth")]
#[command(about = "OptiTour Booth driver client: offline queue and photo uploads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML)
    #[arg(short, long, env = "OPTITOUR_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or edit the offline queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Send queued actions to the backend
    Replay {
        /// Keep replaying in the background until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Upload photos for a tour stop
    Upload {
        #[arg(long)]
        tour: String,
        #[arg(long)]
        point: String,
        /// Queue failed photos for a later replay
        #[arg(long)]
        queue_failed: bool,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Push notification read state
    Notifications {
        #[command(subcommand)]
        action: NotificationAction,
    },
    /// Store the auth token used for backend requests
    Login { token: String },
    /// Forget the auth token and drop the offline queue
    Logout,
}

#[derive(Subcommand)]
enum QueueAction {
    List {
        /// gps-position, photo-upload or point-completion
        #[arg(long = "type")]
        item_type: Option<QueueItemType>,
    },
    Add {
        item_type: QueueItemType,
        /// JSON object
        payload: String,
    },
    Remove { id: String },
    Clear,
}

#[derive(Subcommand)]
enum NotificationAction {
    List,
    /// Record a received notification
    Add { title: String, body: String },
    Read { id: String },
    ReadAll,
    Remove { id: String },
    Clear,
}

fn init_logging() {
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag("optitour-booth"),
    );

    #[cfg(not(target_os = "android"))]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        log::error!("{}", e);
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = BoothConfig::load(cli.config.as_deref())?;
    let store = LocalStore::open(&config.database_path())?;

    match cli.command {
        Commands::Queue { action } => run_queue(&store, action),
        Commands::Replay { watch } => run_replay(&config, &store, watch).await,
        Commands::Upload {
            tour,
            point,
            queue_failed,
            files,
        } => run_upload(&config, &store, PhotoTarget::new(tour, point), files, queue_failed).await,
        Commands::Notifications { action } => run_notifications(&store, action),
        Commands::Login { token } => {
            auth_service::save_token(&store, &token)?;
            println!("Token stored");
            Ok(())
        }
        Commands::Logout => {
            auth_service::clear_token(&store)?;
            OfflineQueue::load(store.clone()).clear();
            println!("Logged out, offline queue cleared");
            Ok(())
        }
    }
}

fn run_queue(store: &LocalStore, action: QueueAction) -> Result<(), AppError> {
    let mut queue = OfflineQueue::load(store.clone());

    match action {
        QueueAction::List { item_type } => {
            let items = match item_type {
                Some(t) => queue.list_by_type(t),
                None => queue.items().to_vec(),
            };
            for item in &items {
                println!(
                    "{}\t{}\tretries={}\t{}",
                    item.id,
                    item.item_type,
                    item.retries,
                    serde_json::Value::Object(item.payload.clone())
                );
            }
            println!("{} item(s)", items.len());
            if item_type.is_none() {
                for t in QueueItemType::all() {
                    println!("  {}: {}", t, queue.list_by_type(t).len());
                }
            }
        }
        QueueAction::Add { item_type, payload } => {
            let payload: Payload = match serde_json::from_str(&payload)? {
                serde_json::Value::Object(map) => map,
                _ => return Err(AppError::Validation("Payload must be a JSON object".into())),
            };
            println!("{}", queue.enqueue(item_type, payload));
        }
        QueueAction::Remove { id } => {
            if queue.get(&id).is_none() {
                log::warn!("No queued item {}", id);
            }
            queue.remove(&id);
        }
        QueueAction::Clear => {
            let count = queue.len();
            queue.clear();
            println!("Removed {} item(s)", count);
        }
    }

    Ok(())
}

async fn run_replay(config: &BoothConfig, store: &LocalStore, watch: bool) -> Result<(), AppError> {
    let queue = OfflineQueue::load(store.clone()).into_shared();
    let handler = HttpReplayHandler::new(&config.api_base_url, store, config.request_timeout())?;
    let service = Arc::new(ReplayService::new(queue, handler, config.replay));

    if !watch {
        let report = service.run_once().await;
        println!(
            "sent={} coalesced={} failed={} skipped={} parked={}",
            report.sent, report.coalesced, report.failed, report.skipped, report.parked
        );
        return Ok(());
    }

    let mut reports = service.subscribe_reports();
    service.start();
    println!(
        "Replaying every {}s, Ctrl-C to stop",
        service.policy().interval_secs.max(1)
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = reports.changed() => {
                if changed.is_err() {
                    break;
                }
                let report = reports.borrow_and_update().clone();
                println!(
                    "sent={} failed={} parked={}",
                    report.sent, report.failed, report.parked
                );
            }
        }
    }

    service.stop();
    Ok(())
}

async fn run_upload(
    config: &BoothConfig,
    store: &LocalStore,
    target: PhotoTarget,
    paths: Vec<PathBuf>,
    queue_failed: bool,
) -> Result<(), AppError> {
    let files = photo_service::read_photo_files(&paths);
    if files.is_empty() {
        return Err(AppError::Validation("No readable photos given".into()));
    }

    let pipeline = photo_service::http_pipeline(config, store, target.clone())?;
    pipeline.subscribe(|photos| {
        for photo in photos.iter().filter(|p| p.status == PhotoStatus::Uploading) {
            log::debug!("{}: {}%", photo.id, photo.progress);
        }
    });

    let (sources, files): (Vec<PathBuf>, Vec<_>) = files.into_iter().unzip();
    let ids = pipeline.add_photos(files).await;
    let photos = photo_service::wait_until_settled(&pipeline, Duration::from_millis(100)).await;

    for photo in &photos {
        match photo.status {
            PhotoStatus::Done => println!(
                "{}\tdone\t{}",
                photo.id,
                photo.server_path.as_deref().unwrap_or_default()
            ),
            _ => println!(
                "{}\t{:?}\t{}",
                photo.id,
                photo.status,
                photo.error.as_deref().unwrap_or_default()
            ),
        }
    }

    if queue_failed {
        let sources: Vec<_> = ids.into_iter().zip(sources).collect();
        let mut queue = OfflineQueue::load(store.clone());
        let queued = photo_service::queue_failed_photos(&mut queue, &target, &photos, &sources);
        if !queued.is_empty() {
            println!("Queued {} failed photo(s) for replay", queued.len());
        }
    }

    Ok(())
}

fn run_notifications(store: &LocalStore, action: NotificationAction) -> Result<(), AppError> {
    let mut notifications = NotificationStore::load(store.clone());

    match action {
        NotificationAction::List => {
            for n in notifications.items() {
                let marker = if n.read { " " } else { "*" };
                println!("{} {}\t{}\t{}", marker, n.id, n.title, n.body);
            }
            println!("{} unread", notifications.unread_count());
        }
        NotificationAction::Read { id } => {
            if !notifications.mark_read(&id) {
                return Err(AppError::NotFound(format!("Notification {}", id)));
            }
        }
        NotificationAction::Add { title, body } => println!("{}", notifications.add(&title, &body)),
        NotificationAction::ReadAll => notifications.mark_all_read(),
        NotificationAction::Remove { id } => notifications.remove(&id),
        NotificationAction::Clear => notifications.clear(),
    }

    Ok(())
}
