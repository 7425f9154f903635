//! JSON-file persistence for calibration profiles.
//!
//! One file per domain under the calibration directory. The engine is the
//! single writer; readers get a consistent snapshot because each profile is
//! written atomically via a temp-file rename.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use super::engine::CalibrationProfile;

/// Durable keyed store for [`CalibrationProfile`] records.
pub struct CalibrationStore {
    dir: PathBuf,
}

impl CalibrationStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, domain: &str) -> PathBuf {
        // Domain names become file names; keep only safe characters.
        let safe: String = domain
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// Load one domain's profile, if present.
    pub fn load(&self, domain: &str) -> Result<Option<CalibrationProfile>> {
        let path = self.path_for(domain);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let profile = serde_json::from_str(&raw)
            .map_err(|e| Error::Storage(format!("corrupt calibration file {:?}: {}", path, e)))?;
        Ok(Some(profile))
    }

    /// Persist a profile atomically.
    pub fn save(&self, profile: &CalibrationProfile) -> Result<()> {
        let path = self.path_for(&profile.domain);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(profile)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load every stored profile.
    pub fn load_all(&self) -> Result<Vec<CalibrationProfile>> {
        let mut profiles = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|raw| serde_json::from_str(&raw).map_err(Error::from))
            {
                Ok(profile) => profiles.push(profile),
                Err(e) => {
                    tracing::warn!(target: "membria::calibration", path = ?path, error = %e,
                        "skipping unreadable calibration file");
                }
            }
        }
        profiles.sort_by(|a: &CalibrationProfile, b: &CalibrationProfile| {
            a.domain.cmp(&b.domain)
        });
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::engine::CalibrationProfile;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::open(dir.path()).unwrap();

        let mut profile = CalibrationProfile::new("database");
        profile.record(true);
        profile.record(false);
        store.save(&profile).unwrap();

        let loaded = store.load("database").unwrap().unwrap();
        assert_eq!(loaded.alpha, profile.alpha);
        assert_eq!(loaded.beta, profile.beta);
        assert_eq!(loaded.recent, profile.recent);
    }

    #[test]
    fn test_missing_domain() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::open(dir.path()).unwrap();
        assert!(store.load("ghost").unwrap().is_none());
    }

    #[test]
    fn test_load_all_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::open(dir.path()).unwrap();
        store.save(&CalibrationProfile::new("zeta")).unwrap();
        store.save(&CalibrationProfile::new("auth")).unwrap();

        let all = store.load_all().unwrap();
        let domains: Vec<&str> = all.iter().map(|p| p.domain.as_str()).collect();
        assert_eq!(domains, vec!["auth", "zeta"]);
    }

    #[test]
    fn test_unsafe_domain_name_is_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let store = CalibrationStore::open(dir.path()).unwrap();
        store.save(&CalibrationProfile::new("../escape")).unwrap();
        // File stays inside the store directory.
        assert!(store.load("../escape").unwrap().is_some());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
