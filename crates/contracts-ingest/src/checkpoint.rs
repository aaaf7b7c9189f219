//! Persisted sync progress
//!
//! A single JSON object, `{"last_update": <unix seconds as float>}`, holding
//! the creation time of the last snapshot that was fully loaded.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct CheckpointRecord {
    last_update: f64,
}

impl CheckpointRecord {
    fn from_datetime(ts: DateTime<Utc>) -> Self {
        Self {
            last_update: ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_micros()) / 1e6,
        }
    }

    fn to_datetime(self) -> Option<DateTime<Utc>> {
        if !self.last_update.is_finite() {
            return None;
        }
        let secs = self.last_update.floor();
        let micros = ((self.last_update - secs) * 1e6).round() as i64;
        DateTime::from_timestamp(secs as i64, 0)?.checked_add_signed(TimeDelta::microseconds(micros))
    }
}

/// Checkpoint file on local disk
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
    default_age: TimeDelta,
    /// A stored value this far back must still be a valid timestamp
    lookback: TimeDelta,
}

impl CheckpointFile {
    /// `default_age` is how far before "now" a run starts when no usable
    /// checkpoint exists.
    pub fn new(path: impl Into<PathBuf>, default_age: TimeDelta) -> Self {
        Self {
            path: path.into(),
            default_age,
            lookback: TimeDelta::zero(),
        }
    }

    /// Checkpoint file as a sync run with `config` uses it
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.checkpoint_path.clone(), config.default_checkpoint_age())
            .with_lookback(config.lookback())
    }

    /// Treat stored values that cannot be moved back by `lookback` as corrupt.
    pub fn with_lookback(mut self, lookback: TimeDelta) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored checkpoint, or `now - default_age` when the file is missing or
    /// unreadable. Never fails.
    pub fn read_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let fallback = now - self.default_age;
        match self.load() {
            Ok(Some(ts)) => {
                debug!(path = %self.path.display(), checkpoint = %ts, "Loaded checkpoint");
                ts
            },
            Ok(None) => {
                info!(
                    path = %self.path.display(),
                    checkpoint = %fallback,
                    "No checkpoint file, starting from default"
                );
                fallback
            },
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    checkpoint = %fallback,
                    "Unreadable checkpoint file, starting from default"
                );
                fallback
            },
        }
    }

    pub fn read(&self) -> DateTime<Utc> {
        self.read_at(Utc::now())
    }

    /// Replace the stored checkpoint. The file is written next to its final
    /// location and renamed over it, so readers see the old or the new value.
    pub fn write(&self, ts: DateTime<Utc>) -> Result<()> {
        let bytes = serde_json::to_vec(&CheckpointRecord::from_datetime(ts))
            .map_err(|e| SyncError::Checkpoint(format!("failed to serialize checkpoint: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                SyncError::Checkpoint(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|e| {
            SyncError::Checkpoint(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            SyncError::Checkpoint(format!(
                "failed to move {} to {}: {}",
                tmp.display(),
                self.path.display(),
                e
            ))
        })?;

        debug!(path = %self.path.display(), checkpoint = %ts, "Wrote checkpoint");
        Ok(())
    }

    fn load(&self) -> Result<Option<DateTime<Utc>>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SyncError::Checkpoint(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            },
        };

        let record: CheckpointRecord = serde_json::from_slice(&bytes)
            .map_err(|e| SyncError::Checkpoint(format!("invalid checkpoint json: {}", e)))?;
        record
            .to_datetime()
            .filter(|ts| ts.checked_sub_signed(self.lookback).is_some())
            .map(Some)
            .ok_or_else(|| SyncError::Checkpoint(format!("{} is out of range", record.last_update)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 15, 12, 0, 0).unwrap()
    }

    fn checkpoint_in(dir: &TempDir) -> CheckpointFile {
        CheckpointFile::new(dir.path().join("update_contracts.json"), TimeDelta::days(30))
    }

    #[test]
    fn test_missing_file_falls_back_to_default_age() {
        let dir = TempDir::new().unwrap();
        let checkpoint = checkpoint_in(&dir);
        assert_eq!(checkpoint.read_at(now()), now() - TimeDelta::days(30));
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let checkpoint = checkpoint_in(&dir);
        let ts = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap();

        checkpoint.write(ts).unwrap();
        assert_eq!(checkpoint.read_at(now()), ts);
        assert!(!dir.path().join("update_contracts.tmp").exists());
    }

    #[test]
    fn test_file_format() {
        let dir = TempDir::new().unwrap();
        let checkpoint = checkpoint_in(&dir);
        checkpoint
            .write(Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap())
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&fs::read(checkpoint.path()).unwrap()).unwrap();
        assert_eq!(json["last_update"].as_f64(), Some(1_682_899_200.0));
    }

    #[test]
    fn test_reads_fractional_seconds() {
        let dir = TempDir::new().unwrap();
        let checkpoint = checkpoint_in(&dir);
        fs::write(checkpoint.path(), r#"{"last_update": 1682899200.5}"#).unwrap();

        assert_eq!(
            checkpoint.read_at(now()),
            Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap() + TimeDelta::milliseconds(500)
        );
    }

    #[test]
    fn test_corrupt_file_falls_back_to_default_age() {
        let dir = TempDir::new().unwrap();
        let checkpoint = checkpoint_in(&dir);

        fs::write(checkpoint.path(), "{not json").unwrap();
        assert_eq!(checkpoint.read_at(now()), now() - TimeDelta::days(30));

        fs::write(checkpoint.path(), r#"{"something_else": 1}"#).unwrap();
        assert_eq!(checkpoint.read_at(now()), now() - TimeDelta::days(30));
    }

    #[test]
    fn test_out_of_range_value_falls_back_to_default_age() {
        let dir = TempDir::new().unwrap();
        let checkpoint = checkpoint_in(&dir).with_lookback(TimeDelta::days(1));
        let earliest = DateTime::<Utc>::MIN_UTC.timestamp();

        fs::write(checkpoint.path(), format!(r#"{{"last_update": {}.0}}"#, earliest)).unwrap();
        assert_eq!(checkpoint.read_at(now()), now() - TimeDelta::days(30));

        fs::write(checkpoint.path(), r#"{"last_update": 1e300}"#).unwrap();
        assert_eq!(checkpoint.read_at(now()), now() - TimeDelta::days(30));
    }

    #[test]
    fn test_earliest_value_is_kept_without_lookback() {
        let dir = TempDir::new().unwrap();
        let checkpoint = checkpoint_in(&dir);
        let earliest = DateTime::<Utc>::MIN_UTC.timestamp();

        fs::write(checkpoint.path(), format!(r#"{{"last_update": {}.0}}"#, earliest)).unwrap();
        assert_eq!(checkpoint.read_at(now()).timestamp(), earliest);
    }

    #[test]
    fn test_from_config() {
        let dir = TempDir::new().unwrap();
        let config = SyncConfig::new().with_checkpoint_path(dir.path().join("state.json"));
        let checkpoint = CheckpointFile::from_config(&config);

        assert_eq!(checkpoint.path(), dir.path().join("state.json").as_path());
        assert_eq!(checkpoint.read_at(now()), now() - config.default_checkpoint_age());
    }

    #[test]
    fn test_write_replaces_previous_value() {
        let dir = TempDir::new().unwrap();
        let checkpoint = checkpoint_in(&dir);
        let first = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2023, 5, 1, 0, 30, 0).unwrap();

        checkpoint.write(first).unwrap();
        checkpoint.write(second).unwrap();
        assert_eq!(checkpoint.read_at(now()), second);
    }

    #[test]
    fn test_write_failure_is_an_error() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes the rename fail
        let path = dir.path().join("update_contracts.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();

        let checkpoint = CheckpointFile::new(&path, TimeDelta::days(30));
        let err = checkpoint
            .write(Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap())
            .unwrap_err();
        assert!(matches!(err, SyncError::Checkpoint(_)));
    }
}
