//! Warden - session lifecycle manager and input watchdog with an HTTP bridge.
//!
//! Usage:
//!   warden serve [--port 8080] [--store warden-store.json]   # Start HTTP server
//!   warden check [--store warden-store.json]                 # Print the stored session's status (read-only)

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use warden::config::{hours, WardenConfig};
use warden::control::FormDocument;
use warden::host::{HttpMirror, NoMirror, RecordingNavigator, SessionMirror};
use warden::lifecycle::inspect;
use warden::state::AppState;
use warden::store::{FileStore, SessionStore};

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Session lifecycle manager and input watchdog")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Idle timeout in hours, overriding the configuration file
    #[arg(long, global = true)]
    timeout_hours: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Session store file
        #[arg(long, default_value = "warden-store.json")]
        store: PathBuf,

        /// Host process to mirror the session into
        #[arg(long)]
        mirror_url: Option<String>,

        /// Serve the login surface (session checks are skipped)
        #[arg(long)]
        login_surface: bool,
    },
    /// Print the stored session's status without modifying the store
    Check {
        /// Session store file
        #[arg(long, default_value = "warden-store.json")]
        store: PathBuf,
    },
}

fn load_config(args: &Args) -> Result<WardenConfig, String> {
    let mut config = match &args.config {
        Some(path) => WardenConfig::load(path).map_err(|e| e.to_string())?,
        None => WardenConfig::default(),
    };
    if let Some(value) = args.timeout_hours {
        if hours(value).is_none() {
            return Err(format!("--timeout-hours must be a positive number, got {}", value));
        }
        config.session.timeout_hours = value;
    }
    Ok(config)
}

fn open_store(path: &Path) -> Arc<dyn SessionStore> {
    match FileStore::open(path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Error: cannot open store {}: {}", path.display(), e);
            exit(1);
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };

    match args.command {
        Commands::Serve {
            port,
            store,
            mirror_url,
            login_surface,
        } => {
            let store = open_store(&store);
            let mirror: Arc<dyn SessionMirror> = match mirror_url {
                Some(url) => Arc::new(HttpMirror::new(&url)),
                None => Arc::new(NoMirror),
            };
            let state = AppState::start(
                &config,
                store,
                Arc::new(RecordingNavigator::new(login_surface)),
                mirror,
                FormDocument::new(),
            );
            if let Err(e) = state.session.check_authentication().await {
                eprintln!("Error: {}", e);
                exit(1);
            }
            if let Err(e) = warden::http_server::run_server(port, state).await {
                eprintln!("Error: server failed: {}", e);
                exit(1);
            }
        }
        Commands::Check { store } => {
            let store = open_store(&store);
            let status = inspect(store.as_ref(), &config.session, Utc::now());
            match serde_json::to_string_pretty(&status) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit(1);
                }
            }
        }
    }
}
