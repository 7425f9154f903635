//! Background workers for daemon mode: the batch processor that turns
//! pending signals into decisions, the graph health monitor, and the TTL
//! sweep scheduler.
//!
//! Workers are plain OS threads sharing one shutdown flag. They communicate
//! with the dispatch path only through the graph store and the engram
//! storage. `stop()` waits up to five seconds per worker before detaching.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::calibration::CalibrationEngine;
use crate::graph::{now_ts, Decision, GraphStore};
use crate::skills::SkillGenerator;
use crate::storage::{EngramStorage, PendingSignal};

/// Signals drained per extraction batch.
const EXTRACTION_BATCH: usize = 100;

/// How long `stop()` waits for each worker.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A decision extracted from a queued signal.
#[derive(Debug, Clone)]
pub struct ExtractedDecision {
    pub statement: String,
    pub alternatives: Vec<String>,
    pub confidence: f64,
    pub module: String,
}

/// Turns pending text artifacts into decision records. The production
/// extractor calls an external model and lives outside the core; the
/// keyword extractor ships as the default and for tests.
pub trait SignalExtractor: Send + Sync {
    fn extract(&self, signals: &[PendingSignal]) -> Vec<ExtractedDecision>;
}

/// Minimal extractor: any line announcing a decision becomes one.
pub struct KeywordExtractor;

impl SignalExtractor for KeywordExtractor {
    fn extract(&self, signals: &[PendingSignal]) -> Vec<ExtractedDecision> {
        let mut extracted = Vec::new();
        for signal in signals {
            for line in signal.content.lines() {
                let lower = line.to_lowercase();
                let statement = if let Some(rest) =
                    lower.find("decided to").and_then(|i| line.get(i..))
                {
                    rest.trim()
                } else if let Some(rest) = lower
                    .find("decision:")
                    .and_then(|i| line.get(i + "decision:".len()..))
                {
                    rest.trim()
                } else {
                    continue;
                };
                if statement.is_empty() {
                    continue;
                }
                extracted.push(ExtractedDecision {
                    statement: statement.to_string(),
                    alternatives: vec!["unspecified".to_string()],
                    confidence: 0.5,
                    module: "general".to_string(),
                });
            }
        }
        extracted
    }
}

/// Intervals driving the worker loops. Defaults match daemon behavior;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct WorkerIntervals {
    /// Batch processor wake-up tick.
    pub batch_tick: Duration,
    /// Minimum gap between extraction runs.
    pub extraction_interval: Duration,
    /// Graph health poll interval.
    pub health_interval: Duration,
    /// TTL sweep interval.
    pub sweep_interval: Duration,
}

impl Default for WorkerIntervals {
    fn default() -> Self {
        Self {
            batch_tick: Duration::from_secs(5),
            extraction_interval: Duration::from_secs(3600),
            health_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// Handle over the running background threads.
pub struct BackgroundWorkers {
    shutdown: Arc<AtomicBool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundWorkers {
    /// Spawn the batch processor, health monitor, and TTL scheduler.
    pub fn start(
        graph: Arc<GraphStore>,
        calibration: Arc<CalibrationEngine>,
        storage: Arc<EngramStorage>,
        extractor: Arc<dyn SignalExtractor>,
        intervals: WorkerIntervals,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        {
            let shutdown = shutdown.clone();
            let graph = graph.clone();
            let storage = storage.clone();
            let intervals = intervals.clone();
            handles.push((
                "batch-processor",
                std::thread::spawn(move || {
                    batch_processor_loop(graph, calibration, storage, extractor, intervals, shutdown)
                }),
            ));
        }
        {
            let shutdown = shutdown.clone();
            let graph = graph.clone();
            let interval = intervals.health_interval;
            handles.push((
                "health-monitor",
                std::thread::spawn(move || health_monitor_loop(graph, interval, shutdown)),
            ));
        }
        {
            let shutdown = shutdown.clone();
            let interval = intervals.sweep_interval;
            handles.push((
                "ttl-scheduler",
                std::thread::spawn(move || ttl_scheduler_loop(graph, interval, shutdown)),
            ));
        }

        Self { shutdown, handles }
    }

    /// Request shutdown and wait up to five seconds per worker.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for (name, handle) in self.handles.drain(..) {
            let deadline = Instant::now() + JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            if handle.is_finished() {
                let _ = handle.join();
                tracing::info!(target: "membria::workers", worker = name, "stopped");
            } else {
                tracing::warn!(target: "membria::workers", worker = name, "did not stop in time");
            }
        }
    }
}

/// Sleep in small slices so the shutdown flag is honored promptly.
fn interruptible_sleep(total: Duration, shutdown: &AtomicBool) {
    let slice = Duration::from_millis(25);
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep(slice.min(deadline - Instant::now()));
    }
}

fn batch_processor_loop(
    graph: Arc<GraphStore>,
    calibration: Arc<CalibrationEngine>,
    storage: Arc<EngramStorage>,
    extractor: Arc<dyn SignalExtractor>,
    intervals: WorkerIntervals,
    shutdown: Arc<AtomicBool>,
) {
    tracing::info!(target: "membria::workers", "batch processor started");
    let generator = SkillGenerator::new(graph.clone(), calibration.clone());
    let mut last_extraction = Instant::now() - intervals.extraction_interval;
    while !shutdown.load(Ordering::SeqCst) {
        let over_soft_cap = storage.over_soft_cap().unwrap_or(false);
        let due = last_extraction.elapsed() >= intervals.extraction_interval;
        if due || over_soft_cap {
            match process_pending_signals(&graph, &storage, extractor.as_ref()) {
                Ok(saved) if saved > 0 => {
                    tracing::info!(target: "membria::workers", saved, "extracted decisions")
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(target: "membria::workers", error = %e, "batch extraction failed")
                }
            }
            refresh_skills(&graph, &calibration, &generator);
            last_extraction = Instant::now();
        }
        interruptible_sleep(intervals.batch_tick, &shutdown);
    }
}

/// Regenerate skills for domains whose current skill is missing or past its
/// review date. Unready domains are skipped by the generator itself.
fn refresh_skills(graph: &GraphStore, calibration: &CalibrationEngine, generator: &SkillGenerator) {
    let now = now_ts();
    for profile in calibration.all_profiles() {
        let due = match graph.list_skills(Some(&profile.domain), 1) {
            Ok(skills) => skills.first().map(|s| s.next_review < now).unwrap_or(true),
            Err(e) => {
                tracing::error!(target: "membria::workers", error = %e, "skill lookup failed");
                continue;
            }
        };
        if !due {
            continue;
        }
        match generator.generate_skill_for_domain(&profile.domain, 3) {
            Ok(Some(skill)) => {
                tracing::info!(target: "membria::workers", skill_id = %skill.id, "skill refreshed")
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(target: "membria::workers", domain = %profile.domain, error = %e,
                    "skill generation failed")
            }
        }
    }
}

fn process_pending_signals(
    graph: &GraphStore,
    storage: &EngramStorage,
    extractor: &dyn SignalExtractor,
) -> crate::error::Result<usize> {
    let pending = storage.drain_signals(EXTRACTION_BATCH)?;
    if pending.is_empty() {
        return Ok(0);
    }
    let extracted = extractor.extract(&pending);
    let mut saved = 0;
    for item in extracted {
        let decision = Decision::new(item.statement, item.alternatives, item.confidence)
            .with_module(item.module)
            .with_source("batch_extraction");
        match graph.add_decision(&decision) {
            Ok(()) => saved += 1,
            Err(e) => {
                tracing::error!(target: "membria::workers", error = %e, "failed to save extracted decision")
            }
        }
    }
    Ok(saved)
}

fn health_monitor_loop(graph: Arc<GraphStore>, interval: Duration, shutdown: Arc<AtomicBool>) {
    tracing::info!(target: "membria::workers", "health monitor started");
    while !shutdown.load(Ordering::SeqCst) {
        let health = graph.health_check();
        if health.status != "healthy" {
            tracing::warn!(target: "membria::workers", status = %health.status, "graph unhealthy");
        }
        interruptible_sleep(interval, &shutdown);
    }
}

fn ttl_scheduler_loop(graph: Arc<GraphStore>, interval: Duration, shutdown: Arc<AtomicBool>) {
    tracing::info!(target: "membria::workers", "ttl scheduler started");
    while !shutdown.load(Ordering::SeqCst) {
        run_ttl_sweep(&graph);
        interruptible_sleep(interval, &shutdown);
    }
}

/// One sweep over every TTL-carrying label. Idempotent; a missed tick loses
/// nothing.
pub fn run_ttl_sweep(graph: &GraphStore) {
    let now = now_ts();
    let sweeps: [(&str, crate::error::Result<u64>); 5] = [
        ("decisions", graph.deactivate_expired_decisions(now)),
        ("outcomes", graph.deactivate_expired_outcomes(now)),
        (
            "negative_knowledge",
            graph.deactivate_expired_negative_knowledge(now),
        ),
        ("skills", graph.deactivate_expired_skills(now)),
        (
            "session_contexts",
            graph.deactivate_expired_session_contexts(now),
        ),
    ];
    for (label, result) in sweeps {
        match result {
            Ok(0) => {}
            Ok(count) => {
                tracing::info!(target: "membria::workers", label, count, "ttl sweep deactivated")
            }
            Err(e) => tracing::error!(target: "membria::workers", label, error = %e, "ttl sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Namespace;
    use crate::graph::SessionContext;

    fn fast_intervals() -> WorkerIntervals {
        WorkerIntervals {
            batch_tick: Duration::from_millis(30),
            extraction_interval: Duration::from_millis(30),
            health_interval: Duration::from_millis(30),
            sweep_interval: Duration::from_millis(30),
        }
    }

    fn setup() -> (
        tempfile::TempDir,
        Arc<GraphStore>,
        Arc<CalibrationEngine>,
        Arc<EngramStorage>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(GraphStore::in_memory(Namespace::default()).unwrap());
        let calibration = Arc::new(CalibrationEngine::open(dir.path().join("cal")).unwrap());
        let storage = Arc::new(EngramStorage::open(dir.path().join("engrams"), 1000, 5000).unwrap());
        (dir, graph, calibration, storage)
    }

    #[test]
    fn test_keyword_extractor() {
        let signals = vec![
            PendingSignal::new("we decided to use sqlite for the index\nother line", "test"),
            PendingSignal::new("Decision: cache invalidation via TTL", "test"),
            PendingSignal::new("nothing relevant here", "test"),
        ];
        let extracted = KeywordExtractor.extract(&signals);
        assert_eq!(extracted.len(), 2);
        assert!(extracted[0].statement.starts_with("decided to use sqlite"));
        assert_eq!(extracted[1].statement, "cache invalidation via TTL");
    }

    #[test]
    fn test_process_pending_signals_writes_decisions() {
        let (_dir, graph, _calibration, storage) = setup();
        storage
            .enqueue_signal(&PendingSignal::new("Decision: adopt feature flags", "test"))
            .unwrap();

        let saved = process_pending_signals(&graph, &storage, &KeywordExtractor).unwrap();
        assert_eq!(saved, 1);
        assert_eq!(storage.pending_count().unwrap(), 0);
        let decisions = graph.get_decisions(10, None).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].source.as_deref(), Some("batch_extraction"));
    }

    #[test]
    fn test_workers_extract_and_stop() {
        let (_dir, graph, calibration, storage) = setup();
        storage
            .enqueue_signal(&PendingSignal::new("Decision: shard by tenant", "test"))
            .unwrap();

        let workers = BackgroundWorkers::start(
            graph.clone(),
            calibration,
            storage.clone(),
            Arc::new(KeywordExtractor),
            fast_intervals(),
        );
        // Give the batch processor a few ticks.
        std::thread::sleep(Duration::from_millis(200));
        workers.stop();

        assert_eq!(storage.pending_count().unwrap(), 0);
        assert_eq!(graph.get_decisions(10, None).unwrap().len(), 1);
    }

    #[test]
    fn test_ttl_scheduler_sweeps() {
        let (_dir, graph, calibration, storage) = setup();
        let mut expired = SessionContext::new("sess-old", "task", 1);
        expired.created_at = now_ts() - 3 * 86_400;
        expired.expires_at = expired.created_at + 86_400;
        graph.upsert_session_context(&expired).unwrap();

        let workers = BackgroundWorkers::start(
            graph.clone(),
            calibration,
            storage,
            Arc::new(KeywordExtractor),
            fast_intervals(),
        );
        std::thread::sleep(Duration::from_millis(150));
        workers.stop();

        let swept = graph.get_session_context("sess-old").unwrap().unwrap();
        assert!(!swept.is_active);
    }

    #[test]
    fn test_refresh_skills_generates_once_until_review() {
        let (_dir, graph, calibration, _storage) = setup();
        // Three resolved pattern groups plus a calibration profile make the
        // database domain ready.
        for (stmt, outcome) in [
            ("use postgres", "success"),
            ("use postgres", "success"),
            ("use postgres", "success"),
            ("cache in redis", "success"),
            ("cache in redis", "success"),
            ("cache in redis", "failure"),
            ("hand-rolled ddl", "failure"),
            ("hand-rolled ddl", "failure"),
            ("hand-rolled ddl", "failure"),
        ] {
            let mut d =
                crate::graph::Decision::new(stmt, vec!["alt".into()], 0.7).with_module("database");
            d.outcome = Some(outcome.to_string());
            graph.add_decision(&d).unwrap();
        }
        for _ in 0..5 {
            calibration.update_from_outcome("database", "success").unwrap();
        }

        let generator = SkillGenerator::new(graph.clone(), calibration.clone());
        refresh_skills(&graph, &calibration, &generator);
        assert_eq!(graph.max_skill_version("database").unwrap(), 1);

        // Fresh skill is not due for review; nothing regenerates.
        refresh_skills(&graph, &calibration, &generator);
        assert_eq!(graph.max_skill_version("database").unwrap(), 1);
    }

    #[test]
    fn test_run_ttl_sweep_idempotent() {
        let (_dir, graph, _calibration, _storage) = setup();
        let mut expired = SessionContext::new("sess-x", "task", 1);
        expired.created_at = now_ts() - 3 * 86_400;
        expired.expires_at = expired.created_at + 86_400;
        graph.upsert_session_context(&expired).unwrap();

        run_ttl_sweep(&graph);
        assert!(!graph.get_session_context("sess-x").unwrap().unwrap().is_active);
        // Second sweep deactivates nothing further.
        assert_eq!(graph.deactivate_expired_session_contexts(now_ts()).unwrap(), 0);
    }
}
