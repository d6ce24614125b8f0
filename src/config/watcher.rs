//! Hot reload of the gateway configuration file.
//!
//! The parent directory is watched rather than the file itself: editors and
//! config management tools usually replace the file by rename, which drops a
//! watch placed on the old inode.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::GatewayConfig;

/// Turns file system events for one config file into validated reloads.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<GatewayConfig>,
    /// Raw text of the last configuration handed out; repeated events for
    /// an unchanged file are dropped.
    last_applied: Mutex<Option<String>>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end of the reload channel.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let last_applied = std::fs::read_to_string(path).ok();

        (
            Self {
                path: path.to_path_buf(),
                updates,
                last_applied: Mutex::new(last_applied),
            },
            rx,
        )
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => self.handle(&event),
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Config watcher started");
        Ok(watcher)
    }

    fn handle(&self, event: &Event) {
        if !self.concerns_config(event) {
            return;
        }

        match self.reload() {
            Ok(Some(config)) => {
                tracing::info!(path = %self.path.display(), "Config file changed, reloading");
                let _ = self.updates.send(config);
            }
            Ok(None) => {}
            Err(e) => tracing::error!(
                path = %self.path.display(),
                error = %e,
                "Config reload rejected, keeping current configuration"
            ),
        }
    }

    fn concerns_config(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == self.path.file_name())
    }

    /// Load the file if its content differs from the last accepted version.
    fn reload(&self) -> Result<Option<GatewayConfig>, ConfigError> {
        let content = std::fs::read_to_string(&self.path).map_err(ConfigError::Io)?;

        let mut last = self
            .last_applied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if last.as_deref() == Some(content.as_str()) {
            return Ok(None);
        }

        let config = load_config(&self.path)?;
        *last = Some(content);
        Ok(Some(config))
    }
}
