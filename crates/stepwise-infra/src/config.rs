//! Global configuration loader for stepwise.
//!
//! Reads `config.toml` from the data directory (`~/.stepwise/` in production)
//! and deserializes it into [`GlobalConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use stepwise_types::config::GlobalConfig;

/// Resolve the data directory.
///
/// Priority:
/// 1. An explicit directory (`--data-dir` or `STEPWISE_DATA_DIR`)
/// 2. `~/.stepwise`
/// 3. `.stepwise` in the current directory
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir;
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".stepwise");
    }
    PathBuf::from(".stepwise")
}

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

/// Absolute workflows directory: `workflows_dir` as-is when absolute,
/// otherwise joined onto `data_dir`.
pub fn resolve_workflows_dir(data_dir: &Path, config: &GlobalConfig) -> PathBuf {
    if config.workflows_dir.is_absolute() {
        config.workflows_dir.clone()
    } else {
        data_dir.join(&config.workflows_dir)
    }
}

/// Directory holding persisted run records.
pub fn runs_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("runs")
}

/// Per-action dispatch timeout; `None` when disabled (`0`).
pub fn dispatch_timeout(config: &GlobalConfig) -> Option<Duration> {
    (config.dispatch_timeout_secs > 0).then(|| Duration::from_secs(config.dispatch_timeout_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_types::config::LogFormat;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_global_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_global_config(tmp.path()).await;
        assert_eq!(config, GlobalConfig::default());
    }

    #[tokio::test]
    async fn load_global_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
workflows_dir = "/srv/flows"
max_concurrent_runs = 4
log_format = "json"

[subjects.Inventory]
base_url = "http://inventory.internal/api"
headers = { authorization = "Bearer t" }
"#,
        )
        .await
        .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.max_concurrent_runs, 4);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.event_bus_capacity, 1024);
        assert_eq!(
            config.subjects["Inventory"].headers["authorization"],
            "Bearer t"
        );
        assert_eq!(resolve_workflows_dir(tmp.path(), &config), PathBuf::from("/srv/flows"));
    }

    #[tokio::test]
    async fn load_global_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn explicit_data_dir_wins() {
        assert_eq!(
            resolve_data_dir(Some(PathBuf::from("/tmp/sw"))),
            PathBuf::from("/tmp/sw")
        );
        assert!(resolve_data_dir(None).ends_with(".stepwise"));
    }

    #[test]
    fn relative_workflows_dir_joins_data_dir() {
        let config = GlobalConfig::default();
        assert_eq!(
            resolve_workflows_dir(Path::new("/data"), &config),
            PathBuf::from("/data/workflows")
        );
        assert_eq!(runs_dir(Path::new("/data")), PathBuf::from("/data/runs"));
    }

    #[test]
    fn zero_timeout_disables() {
        let mut config = GlobalConfig::default();
        assert_eq!(dispatch_timeout(&config), Some(Duration::from_secs(30)));
        config.dispatch_timeout_secs = 0;
        assert_eq!(dispatch_timeout(&config), None);
    }
}
