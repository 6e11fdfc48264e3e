use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use replica_sync::{ComparisonMethod, SyncOptions, TreeRoot};

use crate::telemetry::TelemetryConfig;

/// Contents of the optional TOML settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub comparison: ComparisonMethod,
    #[serde(default)]
    pub dry_run: bool,
}

/// Command-line values that take precedence over the settings file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub comparison: Option<ComparisonMethod>,
    pub dry_run: bool,
}

/// Fully resolved and validated daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub source: TreeRoot,
    pub replica: TreeRoot,
    pub interval: Duration,
    pub log_file: PathBuf,
    pub sync: SyncSettings,
    pub telemetry: TelemetryConfig,
}

impl Settings {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        Ok(settings)
    }
}

impl DaemonConfig {
    /// Merge the positional arguments, settings and overrides, then validate
    pub fn build(
        source: &Path,
        replica: &Path,
        interval_secs: u64,
        log_file: PathBuf,
        settings: Settings,
        overrides: Overrides,
    ) -> Result<Self> {
        let Settings {
            mut sync,
            mut telemetry,
        } = settings;

        if let Some(level) = overrides.log_level {
            telemetry.log_level = level;
        }
        if let Some(comparison) = overrides.comparison {
            sync.comparison = comparison;
        }
        sync.dry_run |= overrides.dry_run;

        let config = Self {
            source: TreeRoot::new(source)?,
            replica: TreeRoot::new(replica)?,
            interval: Duration::from_secs(interval_secs),
            log_file,
            sync,
            telemetry,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            bail!("Interval must be a positive number of seconds");
        }

        if !self.source.as_path().is_dir() {
            bail!("Source path is not a directory: {}", self.source);
        }

        if self.source == self.replica {
            bail!("Source and replica are the same path: {}", self.source);
        }

        if self.source.overlaps(&self.replica) {
            bail!(
                "Source {} and replica {} must not be nested inside each other",
                self.source,
                self.replica
            );
        }

        let replica = self.replica.as_path();
        if replica.exists() && !replica.is_dir() {
            bail!("Replica path exists but is not a directory: {}", self.replica);
        }

        Ok(())
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            comparison_method: self.sync.comparison,
            dry_run: self.sync.dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build(source: &Path, replica: &Path, interval: u64) -> Result<DaemonConfig> {
        DaemonConfig::build(
            source,
            replica,
            interval,
            PathBuf::from("sync.log"),
            Settings::default(),
            Overrides::default(),
        )
    }

    #[test]
    fn test_valid_config() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        std::fs::create_dir(&source).unwrap();

        let config = build(&source, &temp_dir.path().join("dst"), 30).unwrap();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.sync_options(), SyncOptions::default());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let temp_dir = TempDir::new().unwrap();
        let err = build(temp_dir.path(), &temp_dir.path().with_extension("copy"), 0).unwrap_err();
        assert!(err.to_string().contains("Interval"));
    }

    #[test]
    fn test_rejects_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let err = build(&temp_dir.path().join("nope"), &temp_dir.path().join("dst"), 5).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_rejects_same_and_nested_roots() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        std::fs::create_dir(&source).unwrap();

        // trailing separator does not hide identical roots
        let same = PathBuf::from(format!("{}/", source.display()));
        assert!(build(&source, &same, 5).is_err());
        assert!(build(&source, &source.join("mirror"), 5).is_err());
        assert!(build(&source, temp_dir.path(), 5).is_err());
    }

    #[test]
    fn test_rejects_file_as_replica() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        std::fs::create_dir(&source).unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        assert!(build(&source, &file, 5).is_err());
    }

    #[test]
    fn test_overrides_win_over_settings() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        std::fs::create_dir(&source).unwrap();

        let settings: Settings = toml::from_str(
            r#"
            [sync]
            comparison = "sha256"

            [telemetry]
            log_level = "warn"
            "#,
        )
        .unwrap();

        let config = DaemonConfig::build(
            &source,
            &temp_dir.path().join("dst"),
            5,
            PathBuf::from("sync.log"),
            settings.clone(),
            Overrides {
                log_level: Some("debug".to_string()),
                comparison: Some(ComparisonMethod::Blake3),
                dry_run: true,
            },
        )
        .unwrap();
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.sync.comparison, ComparisonMethod::Blake3);
        assert!(config.sync.dry_run);

        let config = DaemonConfig::build(
            &source,
            &temp_dir.path().join("dst"),
            5,
            PathBuf::from("sync.log"),
            settings,
            Overrides::default(),
        )
        .unwrap();
        assert_eq!(config.telemetry.log_level, "warn");
        assert_eq!(config.sync.comparison, ComparisonMethod::Sha256);
        assert!(!config.sync.dry_run);
    }

    #[tokio::test]
    async fn test_load_settings_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("replicad.toml");
        tokio::fs::write(&path, "[sync]\ndry_run = true\n").await.unwrap();

        let settings = Settings::load(&path).await.unwrap();
        assert!(settings.sync.dry_run);
        assert_eq!(settings.sync.comparison, ComparisonMethod::SizeMtime);
        assert_eq!(settings.telemetry, TelemetryConfig::default());

        assert!(Settings::load(temp_dir.path().join("missing.toml")).await.is_err());

        tokio::fs::write(&path, "[sync]\ncomparison = \"crc32\"\n").await.unwrap();
        assert!(Settings::load(&path).await.is_err());
    }
}
