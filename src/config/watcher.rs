//! Hot reload of the YAML configuration
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by renaming a temp file over the original keep working. Bursts of
//! filesystem events collapse into one reload, and a reload that parses to the
//! configuration already in effect is not forwarded.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Quiet period after the last event before the file is re-read
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Owns the filesystem watch and yields validated configurations
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load `config_path` and start watching it
    ///
    /// Fails if the initial load fails. Later parse or validation errors are
    /// logged and the previous configuration stays in effect.
    pub async fn new(config_path: String) -> Result<(Self, Arc<AppConfig>)> {
        let initial = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;
        let initial = Arc::new(initial);

        let path = PathBuf::from(&config_path);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .with_context(|| format!("Config path has no file name: {}", config_path))?;

        // The notify callback runs on its own thread; it only pokes the
        // reload task
        let (event_tx, event_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if relevant {
                        debug!("Config file event: {:?}", event.kind);
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => error!("Watch error: {}", e),
            })?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(reload_task(path, (*initial).clone(), event_rx, tx));

        info!("Config file watcher started for: {}", config_path);

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            initial,
        ))
    }

    /// Wait for the next changed configuration
    ///
    /// Returns None once the watcher has shut down.
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

async fn reload_task(
    path: PathBuf,
    mut current: AppConfig,
    mut events: mpsc::UnboundedReceiver<()>,
    tx: mpsc::Sender<AppConfig>,
) {
    while events.recv().await.is_some() {
        // Swallow the rest of the burst
        loop {
            match tokio::time::timeout(RELOAD_DEBOUNCE, events.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        match load(&path).await {
            Ok(config) if config == current => debug!("Config unchanged, skipping reload"),
            Ok(config) => {
                info!("🔄 Configuration reloaded");
                current = config.clone();
                if tx.send(config).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!("Failed to reload config (keeping old config): {:#}", e),
        }
    }
}

async fn load(path: &Path) -> Result<AppConfig> {
    AppConfig::load(&path.to_string_lossy()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const INITIAL: &str = "console:\n  host: \"192.168.1.70\"\n  base_midi_channel: 12\n";

    #[tokio::test]
    async fn test_reload_delivers_changed_config() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, INITIAL)?;

        let (mut watcher, config) =
            ConfigWatcher::new(config_path.to_string_lossy().to_string()).await?;
        assert_eq!(config.console.host, "192.168.1.70");
        assert_eq!(config.console.base_midi_channel, 12);

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(
            &config_path,
            "console:\n  host: \"192.168.1.71\"\n  base_midi_channel: 4\n",
        )?;

        let next = tokio::time::timeout(Duration::from_secs(2), watcher.next_config()).await;

        // Some platforms deliver the event late or not at all inside temp dirs
        if let Ok(Some(new_config)) = next {
            assert_eq!(new_config.console.host, "192.168.1.71");
            assert_eq!(new_config.console.base_midi_channel, 4);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_edit_and_unrelated_files_are_ignored() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, INITIAL)?;

        let (mut watcher, _) =
            ConfigWatcher::new(config_path.to_string_lossy().to_string()).await?;

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(temp_dir.path().join("notes.txt"), "unrelated")?;
        fs::write(&config_path, "console:\n  host: \"\"\n")?;

        let next =
            tokio::time::timeout(Duration::from_millis(500), watcher.next_config()).await;
        assert!(next.is_err(), "nothing valid changed, got {:?}", next);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.yaml");
        assert!(ConfigWatcher::new(path.to_string_lossy().to_string())
            .await
            .is_err());
    }
}
