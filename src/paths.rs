//! Application path management for portable and installed modes.
//!
//! ## Mode Detection
//!
//! - **Portable mode**: a `.portable` marker file next to the executable
//!   keeps `config.yaml` and `logs/` in that same directory.
//! - **Installed mode** (default): files live under the platform config
//!   directory, e.g. `~/.config/Avantis Bridge` or `%APPDATA%\Avantis Bridge`.
//!
//! The cache is memory-only, so there is no state directory.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Application name used for directories in installed mode
const APP_NAME: &str = "Avantis Bridge";

const CONFIG_FILE: &str = "config.yaml";
const EXAMPLE_CONFIG_FILE: &str = "config.example.yaml";

/// Application paths for config and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config: PathBuf,
    pub logs_dir: PathBuf,
    /// Whether running in portable mode (config next to exe)
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// In debug builds a `config.yaml` in the current directory wins, so
    /// `cargo run` uses the project's own file.
    ///
    /// Note: This is called before logging is initialized, so we use eprintln
    /// for early diagnostic output.
    pub fn detect() -> Self {
        let exe_dir = exe_dir();

        #[cfg(debug_assertions)]
        {
            eprintln!("[paths] Executable directory: {}", exe_dir.display());
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join(CONFIG_FILE).exists() {
                eprintln!(
                    "[paths] Running in DEV mode (config.yaml found in cwd: {})",
                    cwd.display()
                );
                return Self::portable(&cwd);
            }
        }

        let config_root = dirs::config_dir().unwrap_or_else(|| {
            eprintln!("[paths] WARNING: dirs::config_dir() returned None, falling back to exe dir");
            exe_dir.clone()
        });
        Self::resolve(&exe_dir, &config_root)
    }

    /// Pick portable or installed layout for a given executable directory
    pub fn resolve(exe_dir: &Path, config_root: &Path) -> Self {
        if exe_dir.join(".portable").exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Running in PORTABLE mode (.portable marker found)");
            return Self::portable(exe_dir);
        }

        let app_dir = config_root.join(APP_NAME);
        #[cfg(debug_assertions)]
        eprintln!(
            "[paths] Running in INSTALLED mode (config dir: {})",
            app_dir.display()
        );
        Self {
            config: app_dir.join(CONFIG_FILE),
            logs_dir: app_dir.join("logs"),
            is_portable: false,
        }
    }

    fn portable(dir: &Path) -> Self {
        Self {
            config: dir.join(CONFIG_FILE),
            logs_dir: dir.join("logs"),
            is_portable: true,
        }
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Ensure all required directories exist.
    ///
    /// In installed mode, also seeds the config from `config.example.yaml`
    /// when no config file exists yet.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir).with_context(|| {
                format!("Failed to create logs directory {}", self.logs_dir.display())
            })?;
        }

        if !self.is_portable {
            if let Some(config_parent) = self.config.parent() {
                if !config_parent.exists() {
                    debug!("Creating config directory: {}", config_parent.display());
                    std::fs::create_dir_all(config_parent)?;
                }
            }

            if !self.config.exists() {
                self.copy_example_config(&[exe_dir(), PathBuf::from(".")])?;
            }
        }

        Ok(())
    }

    /// Copy the first example config found in `search_dirs`
    fn copy_example_config(&self, search_dirs: &[PathBuf]) -> anyhow::Result<()> {
        for dir in search_dirs {
            let example = dir.join(EXAMPLE_CONFIG_FILE);
            if example.exists() {
                info!(
                    "Copying example config from {} to {}",
                    example.display(),
                    self.config.display()
                );
                std::fs::copy(&example, &self.config).with_context(|| {
                    format!(
                        "Failed to copy example config from {} to {}",
                        example.display(),
                        self.config.display()
                    )
                })?;
                return Ok(());
            }
        }

        info!("No config found, please create {}", self.config.display());
        Ok(())
    }
}

fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}
