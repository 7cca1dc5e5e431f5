use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::{self, BackendKind, Config};
use crate::data::{
    BlobStore, DocumentStore, MemoryBlobStore, MemoryDocumentStore, SystemClipboard,
};
use crate::gallery::{Gallery, Services};
use crate::media;
use crate::notify::ToastLog;
use crate::session::{Identity, Session};
use crate::storage;
use crate::ui;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

pub fn run(config_file: Option<PathBuf>) -> Result<()> {
    let explicit = config_file.clone();
    let cfg = config::load(config::LoadOptions {
        config_file,
        ..Default::default()
    })
    .context("load config")?;
    init_logging(&cfg).context("initialise logging")?;

    let config_path = explicit.or_else(config::default_path);
    tracing::info!(
        version = crate::VERSION,
        config = %friendly_path(config_path.as_ref()),
        backend = ?cfg.backend.kind,
        "starting"
    );

    let (store, blobs) = open_backend(&cfg)?;
    let toasts = Arc::new(ToastLog::new());
    let session = Arc::new(Session::new(Identity::new(
        cfg.identity.user_id.clone(),
        cfg.identity.display_name.clone(),
        cfg.identity.avatar_url.clone(),
    )));
    let services = Services {
        store,
        blobs,
        notifier: toasts.clone(),
        clipboard: Arc::new(SystemClipboard::new()),
        identity: session,
    };

    let gallery = Gallery::new(services, cfg.gallery.clone());
    let mut model = ui::Model::new(ui::Options {
        gallery,
        toasts,
        theme: ui::Theme::from_name(&cfg.ui.theme),
        tick_rate: cfg.ui.tick_rate,
    });
    model.run()?;

    let mut gallery = model.into_gallery();
    if !gallery.settle(SHUTDOWN_GRACE) {
        tracing::warn!(
            pending = gallery.in_flight(),
            "exiting with calls still in flight"
        );
    }
    gallery.unmount();
    tracing::info!("stopped");
    Ok(())
}

fn open_backend(cfg: &Config) -> Result<(Arc<dyn DocumentStore>, Arc<dyn BlobStore>)> {
    match cfg.backend.kind {
        BackendKind::Sqlite => {
            let store = storage::Store::open(storage::Options {
                path: cfg.backend.database_path.clone(),
            })
            .context("open storage")?;
            let blobs = media::LocalBlobStore::open(media::Config {
                root: cfg.backend.blob_dir.clone(),
            })
            .context("open blob store")?;
            let store: Arc<dyn DocumentStore> = Arc::new(store);
            let blobs: Arc<dyn BlobStore> = Arc::new(blobs);
            Ok((store, blobs))
        }
        BackendKind::Memory => {
            let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
            let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
            Ok((store, blobs))
        }
    }
}

/// Logs go to a file; the terminal belongs to the UI.
fn init_logging(cfg: &Config) -> Result<()> {
    let Some(path) = cfg.log.file.clone().or_else(default_log_path) else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cfg.log.level)
            .with_context(|| format!("invalid log level {:?}", cfg.log.level))?,
    };

    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
    Ok(())
}

fn default_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("med-gallery").join("gallery.log"))
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/med-gallery/config.yaml".to_string()
    }
}
