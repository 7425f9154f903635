//! The membria-mcp daemon: JSON-RPC tool server on stdio plus background
//! workers and TTL sweeps.
//!
//! Exits non-zero when the graph connection cannot be acquired at startup.

use std::io::{stdin, stdout, BufReader};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use membria_core::calibration::CalibrationEngine;
use membria_core::config::MembriaConfig;
use membria_core::graph::GraphStore;
use membria_core::outcome::OutcomeTracker;
use membria_core::server::{
    BackgroundWorkers, ExternalToolRegistry, KeywordExtractor, MembriaServer, ToolHandler,
    WorkerIntervals,
};
use membria_core::storage::EngramStorage;

fn main() {
    let exit_code = run();
    std::process::exit(exit_code);
}

fn run() -> i32 {
    let config = match MembriaConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("membria-mcp: configuration error: {}", e);
            return 1;
        }
    };

    if let Err(e) = init_logging(&config) {
        eprintln!("membria-mcp: logging setup failed: {}", e);
        return 1;
    }
    tracing::info!(target: "membria::daemon", "membria-mcp starting");

    let graph = Arc::new(GraphStore::new(
        &config.graph_db_path,
        config.namespace.clone(),
    ));
    if let Err(e) = graph.connect() {
        tracing::error!(target: "membria::daemon", error = %e, "failed to connect to graph");
        return 1;
    }

    let calibration = match CalibrationEngine::open(config.calibration_dir()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!(target: "membria::daemon", error = %e, "calibration store unavailable");
            return 1;
        }
    };
    let storage = match EngramStorage::open(
        config.engram_dir(),
        config.pending_soft_cap,
        config.pending_hard_cap,
    ) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            tracing::error!(target: "membria::daemon", error = %e, "engram storage unavailable");
            return 1;
        }
    };
    let tracker = Arc::new(OutcomeTracker::new(graph.clone(), calibration.clone()));

    let federation = match &config.discovery_allowlist {
        Some(path) => match ExternalToolRegistry::open(
            path.clone(),
            config.provider_timeout,
            config.discovery_refresh,
        ) {
            Ok(registry) => Some(registry),
            Err(e) => {
                tracing::warn!(target: "membria::daemon", error = %e, "federation disabled");
                None
            }
        },
        None => None,
    };

    let workers = BackgroundWorkers::start(
        graph.clone(),
        calibration.clone(),
        storage.clone(),
        Arc::new(KeywordExtractor),
        WorkerIntervals {
            sweep_interval: config.ttl_sweep_interval,
            ..WorkerIntervals::default()
        },
    );

    // Normal shutdown is EOF on stdin; SIGINT/SIGTERM exit cleanly too.
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!(target: "membria::daemon", "termination signal received");
        std::process::exit(0);
    }) {
        tracing::warn!(target: "membria::daemon", error = %e, "signal handler not installed");
    }

    let handler = ToolHandler::new(graph.clone(), calibration, tracker, storage, config);
    let server = MembriaServer::new(handler, federation);
    tracing::info!(target: "membria::daemon", "listening on stdio");

    let result = server.run(BufReader::new(stdin()), stdout());

    workers.stop();
    graph.disconnect();
    match result {
        Ok(()) => {
            tracing::info!(target: "membria::daemon", "clean shutdown");
            0
        }
        Err(e) => {
            tracing::error!(target: "membria::daemon", error = %e, "stdio loop failed");
            1
        }
    }
}

/// Log to `<data_dir>/logs/daemon.log`; stdout stays reserved for the
/// JSON-RPC protocol.
fn init_logging(config: &MembriaConfig) -> std::io::Result<()> {
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("daemon.log"))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(move || -> Box<dyn std::io::Write> {
            match log_file.try_clone() {
                Ok(file) => Box::new(file),
                Err(_) => Box::new(std::io::stderr()),
            }
        })
        .with_ansi(false)
        .init();
    Ok(())
}
