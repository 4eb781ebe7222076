//! Database configuration via `shoal.toml`
//!
//! On first open a commented default `shoal.toml` is written into the
//! database directory. To change settings, edit the file and reopen.

use serde::{Deserialize, Serialize};
use shoal_core::{Error, Result};
use shoal_storage::DatafileOptions;
use std::path::Path;
use std::time::Duration;

/// Config file name placed in the database directory.
pub const CONFIG_FILE_NAME: &str = "shoal.toml";

/// Smallest accepted journal size (64 KiB).
pub const MIN_JOURNAL_SIZE: u64 = 64 * 1024;

/// Database configuration loaded from `shoal.toml`.
///
/// # Example
///
/// ```toml
/// journal_size = 33554432
/// wait_for_sync = false
/// sync_interval_ms = 100
/// compaction_dead_ratio = 0.1
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShoalConfig {
    /// Size at which a journal is sealed and a new one started.
    pub journal_size: u64,
    /// Sync the journal after every write.
    pub wait_for_sync: bool,
    /// Period of the background journal sync.
    pub sync_interval_ms: u64,
    /// Delete collection directories after a drop.
    pub remove_on_drop: bool,
    /// Delete compacted datafiles from disk.
    pub remove_on_compacted: bool,
    /// Minimum dead fraction of a sealed datafile before it is compacted.
    pub compaction_dead_ratio: f64,
    /// Period of background maintenance; 0 disables the maintenance thread.
    pub maintenance_interval_ms: u64,
}

impl Default for ShoalConfig {
    fn default() -> Self {
        Self {
            journal_size: 32 * 1024 * 1024,
            wait_for_sync: false,
            sync_interval_ms: 100,
            remove_on_drop: true,
            remove_on_compacted: true,
            compaction_dead_ratio: 0.1,
            maintenance_interval_ms: 1000,
        }
    }
}

impl ShoalConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# shoal database configuration

# Journal size in bytes (default 32 MiB, minimum 64 KiB).
# A full journal is sealed into a read-only datafile.
journal_size = 33554432

# Sync the journal after every write (default: false).
# When false, journals are synced by the background thread.
wait_for_sync = false

# Background journal sync period in milliseconds (default: 100)
sync_interval_ms = 100

# Delete the directory of a dropped collection (default: true)
remove_on_drop = true

# Delete datafiles once compaction has replaced them (default: true)
remove_on_compacted = true

# Fraction of dead data that makes a sealed datafile eligible for compaction
compaction_dead_ratio = 0.1

# Maintenance period in milliseconds: compaction, deferred unloads and
# cleanup of dropped collections. 0 disables the maintenance thread.
maintenance_interval_ms = 1000
"#
    }

    /// Check that every value is in range.
    ///
    /// # Errors
    ///
    /// `BadParameter` naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.journal_size < MIN_JOURNAL_SIZE {
            return Err(Error::bad_parameter(format!(
                "journal_size {} is below the minimum of {} bytes",
                self.journal_size, MIN_JOURNAL_SIZE
            )));
        }
        if !(self.compaction_dead_ratio > 0.0 && self.compaction_dead_ratio <= 1.0) {
            return Err(Error::bad_parameter(format!(
                "compaction_dead_ratio {} must be in (0, 1]",
                self.compaction_dead_ratio
            )));
        }
        if self.sync_interval_ms == 0 {
            return Err(Error::bad_parameter("sync_interval_ms must be positive"));
        }
        Ok(())
    }

    /// Journal options for collections created with this config.
    pub fn datafile_options(&self) -> DatafileOptions {
        DatafileOptions {
            journal_size: self.journal_size,
            wait_for_sync: self.wait_for_sync,
        }
    }

    /// Period of the background sync.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Period of background maintenance, if enabled.
    pub fn maintenance_interval(&self) -> Option<Duration> {
        (self.maintenance_interval_ms > 0).then(|| Duration::from_millis(self.maintenance_interval_ms))
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ShoalConfig = toml::from_str(&content).map_err(|e| {
            Error::bad_parameter(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_toml_matches_default() {
        let parsed: ShoalConfig = toml::from_str(ShoalConfig::default_toml()).unwrap();
        assert_eq!(parsed, ShoalConfig::default());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        ShoalConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());
        assert_eq!(ShoalConfig::from_file(&path).unwrap(), ShoalConfig::default());
    }

    #[test]
    fn test_write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "wait_for_sync = true\n").unwrap();

        ShoalConfig::write_default_if_missing(&path).unwrap();
        assert!(ShoalConfig::from_file(&path).unwrap().wait_for_sync);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "").unwrap();
        assert_eq!(ShoalConfig::from_file(&path).unwrap(), ShoalConfig::default());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let small = ShoalConfig {
            journal_size: 4096,
            ..Default::default()
        };
        assert!(matches!(small.validate(), Err(Error::BadParameter(_))));

        let ratio = ShoalConfig {
            compaction_dead_ratio: 0.0,
            ..Default::default()
        };
        assert!(ratio.validate().is_err());

        let sync = ShoalConfig {
            sync_interval_ms: 0,
            ..Default::default()
        };
        assert!(sync.validate().is_err());
    }

    #[test]
    fn test_parse_error_is_bad_parameter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "journal_size = \"big\"\n").unwrap();
        assert!(matches!(
            ShoalConfig::from_file(&path),
            Err(Error::BadParameter(_))
        ));
    }

    #[test]
    fn test_write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = ShoalConfig {
            wait_for_sync: true,
            maintenance_interval_ms: 0,
            ..Default::default()
        };
        config.write_to_file(&path).unwrap();
        let loaded = ShoalConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.maintenance_interval().is_none());
    }
}
