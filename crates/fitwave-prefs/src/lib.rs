//! # FitWave Preferences
//!
//! Durable local state for the FitWave fitness tracker:
//!
//! - **Weight unit**: kg/lbs preference with fixed-factor conversion and
//!   single-decimal rounding (round trips are lossy by design)
//! - **Onboarding tips**: a set of already-shown tip identifiers, so each
//!   tip is shown at most once unless the set is explicitly cleared
//!
//! Both are idempotent read/write operations over a JSON document on disk.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

// ==================== Errors ====================

/// Preference storage errors.
#[derive(Error, Debug)]
pub enum PrefsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ==================== Units ====================

/// Pounds per kilogram.
pub const LBS_PER_KG: f64 = 2.20462;

/// Kilograms per pound.
pub const KG_PER_LB: f64 = 0.453592;

/// Weight display unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    #[default]
    Kg,
    Lbs,
}

impl WeightUnit {
    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            WeightUnit::Kg => "kg",
            WeightUnit::Lbs => "lbs",
        }
    }
}

/// Round to a single decimal place.
fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Convert kilograms to pounds, rounded to one decimal.
pub fn kg_to_lbs(kg: f64) -> f64 {
    round_tenth(kg * LBS_PER_KG)
}

/// Convert pounds to kilograms, rounded to one decimal.
pub fn lbs_to_kg(lbs: f64) -> f64 {
    round_tenth(lbs * KG_PER_LB)
}

// ==================== Preference Store ====================

/// The persisted document shape.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PrefsDocument {
    #[serde(default)]
    unit: WeightUnit,

    #[serde(default)]
    seen_tips: HashSet<String>,
}

/// Preferences persisted as JSON at a fixed path. Every mutation saves
/// through to disk.
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    doc: PrefsDocument,
}

impl PreferenceStore {
    /// Open the store at `path`. A missing file yields defaults; a corrupt
    /// file yields defaults and is overwritten on the next save.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();
        let doc = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(doc) => doc,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "corrupt preferences, using defaults");
                    PrefsDocument::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no preferences file, using defaults");
                PrefsDocument::default()
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, doc })
    }

    /// Open the store at the platform default location.
    pub fn open_default() -> Result<Self, PrefsError> {
        Self::open(Self::default_path())
    }

    /// The platform default preferences path.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fitwave")
            .join("preferences.json")
    }

    /// The path this store persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current weight unit.
    pub fn unit(&self) -> WeightUnit {
        self.doc.unit
    }

    /// Set the weight unit. Idempotent.
    pub fn set_unit(&mut self, unit: WeightUnit) -> Result<(), PrefsError> {
        self.doc.unit = unit;
        self.save()
    }

    /// Whether a tip was already shown.
    pub fn tip_seen(&self, id: &str) -> bool {
        self.doc.seen_tips.contains(id)
    }

    /// Mark a tip as shown. Set semantics: marking twice leaves the set
    /// unchanged after the first call. Returns whether the id was new.
    pub fn mark_tip_seen(&mut self, id: &str) -> Result<bool, PrefsError> {
        let inserted = self.doc.seen_tips.insert(id.to_string());
        if inserted {
            self.save()?;
        }
        Ok(inserted)
    }

    /// Forget every shown tip.
    pub fn clear_seen_tips(&mut self) -> Result<(), PrefsError> {
        self.doc.seen_tips.clear();
        self.save()
    }

    /// The set of shown tip identifiers.
    pub fn seen_tips(&self) -> &HashSet<String> {
        &self.doc.seen_tips
    }

    fn save(&self) -> Result<(), PrefsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.doc)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

// Helper to get directories
mod dirs {
    use std::path::PathBuf;

    pub fn data_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var_os("APPDATA").map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            home_dir().map(|h| h.join("Library").join("Application Support"))
        } else {
            std::env::var_os("XDG_DATA_HOME")
                .map(PathBuf::from)
                .or_else(|| home_dir().map(|h| h.join(".local").join("share")))
        }
    }

    fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, PreferenceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::open(dir.path().join("preferences.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_kg_to_lbs_known_values() {
        assert_eq!(kg_to_lbs(100.0), 220.5);
        assert_eq!(kg_to_lbs(60.0), 132.3);
        assert_eq!(lbs_to_kg(220.5), 100.0);
    }

    #[test]
    fn test_unit_round_trip_within_tolerance() {
        // Lossy by design: single-decimal rounding, not exact equality.
        for &kg in &[0.5, 1.0, 2.5, 20.0, 60.0, 82.3, 120.7, 500.0] {
            let round_trip = lbs_to_kg(kg_to_lbs(kg));
            assert!(
                (round_trip - kg).abs() <= 0.1,
                "round trip of {kg} drifted to {round_trip}"
            );
        }
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let (_dir, store) = temp_store();
        assert_eq!(store.unit(), WeightUnit::Kg);
        assert!(store.seen_tips().is_empty());
    }

    #[test]
    fn test_unit_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");

        let mut store = PreferenceStore::open(&path).unwrap();
        store.set_unit(WeightUnit::Lbs).unwrap();
        drop(store);

        let reopened = PreferenceStore::open(&path).unwrap();
        assert_eq!(reopened.unit(), WeightUnit::Lbs);
    }

    #[test]
    fn test_tip_gating_idempotent() {
        let (_dir, mut store) = temp_store();

        assert!(store.mark_tip_seen("log-first-set").unwrap());
        // Second call leaves the set unchanged.
        assert!(!store.mark_tip_seen("log-first-set").unwrap());
        assert_eq!(store.seen_tips().len(), 1);
        assert!(store.tip_seen("log-first-set"));
        assert!(!store.tip_seen("rest-timer"));
    }

    #[test]
    fn test_clear_seen_tips() {
        let (_dir, mut store) = temp_store();
        store.mark_tip_seen("log-first-set").unwrap();
        store.mark_tip_seen("rest-timer").unwrap();

        store.clear_seen_tips().unwrap();
        assert!(store.seen_tips().is_empty());
        // A cleared tip may be shown again.
        assert!(store.mark_tip_seen("rest-timer").unwrap());
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, "not json{").unwrap();

        let mut store = PreferenceStore::open(&path).unwrap();
        assert_eq!(store.unit(), WeightUnit::Kg);

        // The next save repairs the file.
        store.set_unit(WeightUnit::Lbs).unwrap();
        let reopened = PreferenceStore::open(&path).unwrap();
        assert_eq!(reopened.unit(), WeightUnit::Lbs);
    }
}
