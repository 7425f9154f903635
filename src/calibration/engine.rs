//! Per-domain Bayesian calibration.
//!
//! Each domain keeps a Beta posterior over decision success, updated from
//! finalized outcomes, plus a bounded rolling window of recent results for
//! trend detection. Guidance compares a caller's stated confidence against
//! the posterior mean.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::calibration::beta::beta_ppf;
use crate::calibration::store::CalibrationStore;
use crate::error::Result;
use crate::graph::now_ts;

/// Outcomes kept in the rolling trend window.
const TREND_WINDOW: usize = 20;

/// Minimum window size before a trend is reported.
const TREND_MIN_SAMPLES: usize = 4;

/// Half-window mean delta that counts as a trend.
const TREND_DELTA: f64 = 0.1;

/// Gap beyond which confidence counts as over/underconfident.
const GAP_THRESHOLD: f64 = 0.15;

/// Rolling trend direction for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
    Unknown,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Improving => write!(f, "improving"),
            Self::Stable => write!(f, "stable"),
            Self::Declining => write!(f, "declining"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Per-domain Beta posterior with trend window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub domain: String,
    pub alpha: f64,
    pub beta: f64,
    pub mean_success_rate: f64,
    pub variance: f64,
    pub sample_size: i64,
    pub trend: Trend,
    pub last_updated: i64,
    /// Most recent outcomes, oldest first, bounded to [`TREND_WINDOW`].
    pub recent: Vec<bool>,
}

impl CalibrationProfile {
    /// Fresh profile with the uniform prior (alpha=1, beta=1).
    pub fn new(domain: impl Into<String>) -> Self {
        let mut profile = Self {
            domain: domain.into(),
            alpha: 1.0,
            beta: 1.0,
            mean_success_rate: 0.5,
            variance: 0.0,
            sample_size: 0,
            trend: Trend::Unknown,
            last_updated: now_ts(),
            recent: Vec::new(),
        };
        profile.refresh_derived();
        profile
    }

    /// Record one finalized outcome.
    pub fn record(&mut self, success: bool) {
        if success {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
        self.recent.push(success);
        if self.recent.len() > TREND_WINDOW {
            let excess = self.recent.len() - TREND_WINDOW;
            self.recent.drain(0..excess);
        }
        self.last_updated = now_ts();
        self.refresh_derived();
    }

    fn refresh_derived(&mut self) {
        let total = self.alpha + self.beta;
        self.mean_success_rate = self.alpha / total;
        self.variance = (self.alpha * self.beta) / (total * total * (total + 1.0));
        self.sample_size = (total - 2.0) as i64;
        self.trend = self.compute_trend();
    }

    fn compute_trend(&self) -> Trend {
        if self.recent.len() < TREND_MIN_SAMPLES {
            return Trend::Unknown;
        }
        let mid = self.recent.len() / 2;
        let mean = |slice: &[bool]| {
            slice.iter().filter(|s| **s).count() as f64 / slice.len() as f64
        };
        let delta = mean(&self.recent[mid..]) - mean(&self.recent[..mid]);
        if delta >= TREND_DELTA {
            Trend::Improving
        } else if delta <= -TREND_DELTA {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    /// 95% credible interval of the posterior.
    pub fn credible_interval_95(&self) -> (f64, f64) {
        (
            beta_ppf(self.alpha, self.beta, 0.025),
            beta_ppf(self.alpha, self.beta, 0.975),
        )
    }
}

/// Guidance produced for a caller-supplied confidence.
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceGuidance {
    pub domain: String,
    pub sample_size: i64,
    pub mean_success_rate: f64,
    pub your_confidence: f64,
    pub confidence_gap: f64,
    pub adjustment: f64,
    pub credible_interval_95: (f64, f64),
    pub trend: Trend,
    pub recommendation: String,
}

/// Calibration engine: the single writer of calibration profiles.
pub struct CalibrationEngine {
    store: CalibrationStore,
    cache: Mutex<HashMap<String, CalibrationProfile>>,
}

impl CalibrationEngine {
    /// Open the engine over a calibration directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let store = CalibrationStore::open(dir)?;
        let mut cache = HashMap::new();
        for profile in store.load_all()? {
            cache.insert(profile.domain.clone(), profile);
        }
        Ok(Self {
            store,
            cache: Mutex::new(cache),
        })
    }

    /// Update the domain posterior from a finalized outcome.
    /// `success` is `final_status == "success"`.
    pub fn update_from_outcome(&self, domain: &str, final_status: &str) -> Result<CalibrationProfile> {
        let success = final_status == "success";
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| crate::error::Error::Storage("calibration cache poisoned".into()))?;
        let profile = cache
            .entry(domain.to_string())
            .or_insert_with(|| CalibrationProfile::new(domain));
        profile.record(success);
        self.store.save(profile)?;
        tracing::info!(
            target: "membria::calibration",
            domain,
            alpha = profile.alpha,
            beta = profile.beta,
            mean = profile.mean_success_rate,
            "calibration updated"
        );
        Ok(profile.clone())
    }

    /// Snapshot of one domain's profile.
    pub fn get_profile(&self, domain: &str) -> Option<CalibrationProfile> {
        self.cache.lock().ok()?.get(domain).cloned()
    }

    /// Snapshot of every known profile, sorted by domain.
    pub fn all_profiles(&self) -> Vec<CalibrationProfile> {
        let Ok(cache) = self.cache.lock() else {
            return Vec::new();
        };
        let mut profiles: Vec<CalibrationProfile> = cache.values().cloned().collect();
        profiles.sort_by(|a, b| a.domain.cmp(&b.domain));
        profiles
    }

    /// Compare a stated confidence against the domain posterior.
    ///
    /// With no profile for the domain the guidance reports the uniform prior
    /// and never fails the caller.
    pub fn confidence_guidance(&self, domain: &str, confidence: f64) -> ConfidenceGuidance {
        let profile = self
            .get_profile(domain)
            .unwrap_or_else(|| CalibrationProfile::new(domain));
        let gap = confidence - profile.mean_success_rate;
        let recommendation = if gap > GAP_THRESHOLD {
            format!(
                "overconfident: stated confidence exceeds the domain success rate by {:.0}%",
                gap * 100.0
            )
        } else if gap < -GAP_THRESHOLD {
            format!(
                "underconfident: stated confidence is {:.0}% below the domain success rate",
                -gap * 100.0
            )
        } else {
            "well-calibrated".to_string()
        };
        ConfidenceGuidance {
            domain: profile.domain.clone(),
            sample_size: profile.sample_size,
            mean_success_rate: profile.mean_success_rate,
            your_confidence: confidence,
            confidence_gap: gap,
            adjustment: -gap,
            credible_interval_95: profile.credible_interval_95(),
            trend: profile.trend,
            recommendation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn engine() -> (tempfile::TempDir, CalibrationEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = CalibrationEngine::open(dir.path()).unwrap();
        (dir, engine)
    }

    #[test]
    fn test_first_success_updates_posterior() {
        let (_dir, engine) = engine();
        let profile = engine.update_from_outcome("database", "success").unwrap();
        assert_eq!(profile.alpha, 2.0);
        assert_eq!(profile.beta, 1.0);
        assert!((profile.mean_success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(profile.sample_size, 1);
    }

    #[test]
    fn test_failure_and_partial_count_as_failure() {
        let (_dir, engine) = engine();
        engine.update_from_outcome("auth", "failure").unwrap();
        let profile = engine.update_from_outcome("auth", "partial").unwrap();
        assert_eq!(profile.alpha, 1.0);
        assert_eq!(profile.beta, 3.0);
    }

    #[test]
    fn test_mean_matches_alpha_over_total() {
        let (_dir, engine) = engine();
        for status in ["success", "success", "failure", "success"] {
            engine.update_from_outcome("api", status).unwrap();
        }
        let p = engine.get_profile("api").unwrap();
        assert!((p.mean_success_rate - p.alpha / (p.alpha + p.beta)).abs() < 1e-12);
        assert!(p.alpha >= 1.0 && p.beta >= 1.0);
    }

    #[test]
    fn test_trend_unknown_below_four() {
        let (_dir, engine) = engine();
        for status in ["success", "failure", "success"] {
            engine.update_from_outcome("infra", status).unwrap();
        }
        assert_eq!(engine.get_profile("infra").unwrap().trend, Trend::Unknown);
    }

    #[test]
    fn test_trend_improving_and_declining() {
        let (_dir, engine) = engine();
        for status in ["failure", "failure", "success", "success"] {
            engine.update_from_outcome("up", status).unwrap();
        }
        assert_eq!(engine.get_profile("up").unwrap().trend, Trend::Improving);

        for status in ["success", "success", "failure", "failure"] {
            engine.update_from_outcome("down", status).unwrap();
        }
        assert_eq!(engine.get_profile("down").unwrap().trend, Trend::Declining);
    }

    #[test]
    fn test_window_bounded() {
        let (_dir, engine) = engine();
        for _ in 0..30 {
            engine.update_from_outcome("busy", "success").unwrap();
        }
        let p = engine.get_profile("busy").unwrap();
        assert_eq!(p.recent.len(), 20);
        assert_eq!(p.trend, Trend::Stable);
    }

    #[test]
    fn test_guidance_overconfident() {
        let (_dir, engine) = engine();
        // alpha=9, beta=3 -> mean 0.75
        for _ in 0..8 {
            engine.update_from_outcome("database", "success").unwrap();
        }
        for _ in 0..2 {
            engine.update_from_outcome("database", "failure").unwrap();
        }
        let g = engine.confidence_guidance("database", 0.95);
        assert!((g.mean_success_rate - 0.75).abs() < 1e-9);
        assert!((g.confidence_gap - 0.20).abs() < 1e-9);
        assert!((g.adjustment + 0.20).abs() < 1e-9);
        assert!(g.recommendation.starts_with("overconfident"));
        let (lo, hi) = g.credible_interval_95;
        assert!(lo < g.mean_success_rate && g.mean_success_rate < hi);
    }

    #[test]
    fn test_guidance_unknown_domain_degrades() {
        let (_dir, engine) = engine();
        let g = engine.confidence_guidance("ghost", 0.5);
        assert_eq!(g.sample_size, 0);
        assert_eq!(g.recommendation, "well-calibrated");
        assert_eq!(g.trend, Trend::Unknown);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = CalibrationEngine::open(dir.path()).unwrap();
            engine.update_from_outcome("database", "success").unwrap();
        }
        let engine = CalibrationEngine::open(dir.path()).unwrap();
        let p = engine.get_profile("database").unwrap();
        assert_eq!(p.alpha, 2.0);
    }

    proptest! {
        #[test]
        fn posterior_invariants(outcomes in prop::collection::vec(any::<bool>(), 0..60)) {
            let mut profile = CalibrationProfile::new("prop");
            for success in &outcomes {
                profile.record(*success);
            }
            prop_assert!(profile.alpha >= 1.0);
            prop_assert!(profile.beta >= 1.0);
            let expected_mean = profile.alpha / (profile.alpha + profile.beta);
            prop_assert!((profile.mean_success_rate - expected_mean).abs() < 1e-12);
            prop_assert_eq!(profile.sample_size as usize, outcomes.len());
            prop_assert!(profile.recent.len() <= 20);
        }
    }
}
