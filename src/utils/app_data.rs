use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "irrfind";
const CONFIG_FILE: &str = "config.json";
const INDEX_FILE: &str = "irrfind.sqlite";

/// Application configuration stored in the app data directory.
///
/// Every component receives the values it needs from here at construction
/// time; nothing reads configuration globally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Digits kept in memory per stream for the prefix tier
    #[serde(default = "default_prefix_size")]
    pub prefix_size: usize,

    /// Bytes searched per window inside a full-scan sector
    #[serde(default = "default_scan_chunk_size")]
    pub scan_chunk_size: usize,

    /// Full-scan workers. If 0, uses the number of CPU cores
    #[serde(default)]
    pub scan_workers: usize,

    /// Pattern index location. If None, lives in the app data directory
    #[serde(default)]
    pub index_path: Option<PathBuf>,

    /// Leading digits of each stream covered by the index builder
    #[serde(default = "default_build_window")]
    pub build_window: u64,

    /// Longest substring the index builder records
    #[serde(default = "default_build_max_length")]
    pub build_max_length: usize,

    /// Start positions per bulk insert transaction
    #[serde(default = "default_build_chunk_size")]
    pub build_chunk_size: usize,

    /// Streams indexed concurrently
    #[serde(default = "default_build_workers")]
    pub build_workers: usize,

    /// Progress reporter polling interval
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Directory scanned for digit files by `build`
    #[serde(default = "default_digits_dir")]
    pub digits_dir: PathBuf,
}

fn default_prefix_size() -> usize {
    1_000_000
}

fn default_scan_chunk_size() -> usize {
    8 * 1024 * 1024
}

fn default_build_window() -> u64 {
    1_000_000
}

fn default_build_max_length() -> usize {
    10
}

fn default_build_chunk_size() -> usize {
    100_000
}

fn default_build_workers() -> usize {
    4
}

fn default_progress_interval_ms() -> u64 {
    200
}

fn default_digits_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            prefix_size: default_prefix_size(),
            scan_chunk_size: default_scan_chunk_size(),
            scan_workers: 0,
            index_path: None,
            build_window: default_build_window(),
            build_max_length: default_build_max_length(),
            build_chunk_size: default_build_chunk_size(),
            build_workers: default_build_workers(),
            progress_interval_ms: default_progress_interval_ms(),
            digits_dir: default_digits_dir(),
        }
    }
}

impl AppConfig {
    /// Load config from the app data directory. The first run writes the
    /// defaults there so they can be edited.
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_path()?)
    }

    /// Load config from `config_path`, creating it with defaults if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .context("Failed to read config file")?;
            let config: AppConfig = serde_json::from_str(&content)
                .context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    /// Save config to the app data directory
    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        fs::write(config_path, content)
            .context("Failed to write config file")?;
        Ok(())
    }

    /// Get the effective full-scan worker count (resolves 0 to CPU count)
    pub fn effective_scan_workers(&self) -> usize {
        if self.scan_workers == 0 {
            num_cpus()
        } else {
            self.scan_workers
        }
    }

    /// Get the pattern index path, falling back to the app data directory
    pub fn resolved_index_path(&self) -> Result<PathBuf> {
        match &self.index_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_app_data_dir()?.join(INDEX_FILE)),
        }
    }
}

/// Get the number of CPUs available
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Virtual memory page size, used to align scan sectors
pub fn page_size() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as u64;
        }
    }
    4096
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let app_dir = get_app_data_dir()?;
    Ok(app_dir.join(CONFIG_FILE))
}

/// Get the application data directory
pub fn get_app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir()
            .map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.context("Could not determine app data directory")?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.prefix_size, 1_000_000);
        assert_eq!(config.scan_workers, 0);
        assert_eq!(config.build_max_length, 10);
        assert!(config.index_path.is_none());
    }

    #[test]
    fn test_app_config_effective_scan_workers() {
        let mut config = AppConfig::default();

        // 0 should resolve to CPU count
        assert!(config.effective_scan_workers() >= 1);

        // Explicit value should be used as-is
        config.scan_workers = 3;
        assert_eq!(config.effective_scan_workers(), 3);
    }

    #[test]
    fn test_explicit_index_path() {
        let config = AppConfig {
            index_path: Some(PathBuf::from("/tmp/custom.sqlite")),
            ..AppConfig::default()
        };
        assert_eq!(
            config.resolved_index_path().unwrap(),
            PathBuf::from("/tmp/custom.sqlite")
        );
    }

    #[test]
    fn test_app_config_partial_json() {
        // Should use defaults for missing fields
        let json = r#"{"prefix_size": 4096, "build_workers": 2}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.prefix_size, 4096);
        assert_eq!(config.build_workers, 2);
        assert_eq!(config.build_window, 1_000_000); // default
        assert_eq!(config.scan_chunk_size, 8 * 1024 * 1024);
    }

    #[test]
    fn test_app_config_empty_json() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.progress_interval_ms, 200);
        assert_eq!(config.digits_dir, PathBuf::from("."));
    }

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let config = AppConfig::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.prefix_size, 1_000_000);

        // Edits survive the next load
        let edited = AppConfig {
            prefix_size: 64,
            ..config
        };
        edited.save_to(&path).unwrap();
        assert_eq!(AppConfig::load_from(&path).unwrap().prefix_size, 64);
    }

    #[test]
    fn test_page_size_is_power_of_two() {
        let size = page_size();
        assert!(size >= 512);
        assert!(size.is_power_of_two());
    }
}
