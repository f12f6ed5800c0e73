use anyhow::Context;
use config::Config;
use sentinel::{
    register_signals, ClamdScanner, ControlServer, EngineCommands, EventKind, EventSink,
    GateDecision, Monitor, QuarantineEngine, ScanPipeline, ShutdownFlag, SubmitGate, WorkerPool,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Composition root: wire the subsystems together, run the control-plane
/// service loop until a termination signal, then tear everything down in
/// reverse order.
pub fn run(config: Config) -> anyhow::Result<()> {
    info!(
        workers = config.pool.workers,
        capacity = config.pool.capacity,
        socket = %config.control.socket_path.display(),
        "sentinel endpoint security daemon starting"
    );

    let shutdown = ShutdownFlag::new();
    let signals =
        register_signals(&shutdown).context("failed to install signal handlers")?;

    let engine = Arc::new(
        QuarantineEngine::open(&config.quarantine.root)
            .context("failed to initialise quarantine store")?,
    );

    let scanner = ClamdScanner::new(&config.scanner.clamd_socket);
    if scanner.ping() {
        info!("clamd is alive and ready");
    } else {
        warn!("clamd is not responding; scans will fail until it starts");
    }

    let mut server = ControlServer::bind(&config.control.socket_path, config.control.max_clients)
        .context("failed to start control socket")?;
    let events = server.broadcaster();

    let pipeline = Arc::new(ScanPipeline::new(
        Box::new(scanner),
        Arc::clone(&engine),
        Arc::new(events.clone()) as Arc<dyn EventSink>,
        config.scanner.max_retries,
        config.scanner.retry_delay,
    ));
    let pool = Arc::new(
        WorkerPool::new(config.pool.workers, config.pool.capacity, {
            let pipeline = Arc::clone(&pipeline);
            move |path: PathBuf| pipeline.process(&path)
        })
        .context("failed to start scan worker pool")?,
    );

    // Monitor-event glue: gate, then hand over to the pool. Submission
    // blocks under back-pressure and only fails once shutdown has begun.
    let gate = SubmitGate::new(&config);
    let submitter = Arc::clone(&pool);
    let monitor_glue = move |path: PathBuf| match gate.evaluate(&path) {
        GateDecision::Admit => {
            if let Err(err) = submitter.submit(path) {
                debug!(%err, "submission refused during shutdown");
            }
        }
        GateDecision::Reject(reason) => {
            trace!(?reason, path = %path.display(), "candidate filtered");
        }
    };

    let mut monitor = Monitor::new(&config.monitor.roots, monitor_glue)
        .context("failed to initialise file monitor")?;
    let monitor_handle = monitor.handle();
    let monitor_thread = std::thread::Builder::new()
        .name("sentinel-monitor".into())
        .spawn(move || {
            if let Err(err) = monitor.run() {
                error!(%err, "monitor loop failed");
            }
        })
        .context("failed to launch monitor thread")?;

    let mut handler = EngineCommands::new(Arc::clone(&engine), events.clone());

    info!("all subsystems initialised, entering service loop");
    events.broadcast(EventKind::Status, "sentinel", "", "Daemon started");

    while !shutdown.is_set() {
        if let Err(err) = server.service(config.control.service_timeout, &mut handler) {
            warn!(%err, "control service tick failed");
        }
    }

    info!("shutting down");
    monitor_handle.stop();
    if monitor_thread.join().is_err() {
        warn!("monitor thread panicked");
    }

    pool.shutdown();

    events.broadcast(EventKind::Status, "sentinel", "", "Daemon stopping");
    let _ = server.service(Duration::from_millis(100), &mut handler);
    server.shutdown();

    if let Err(err) = engine.flush() {
        warn!(%err, "final manifest flush failed");
    }
    signals.stop();

    info!("sentinel daemon stopped");
    Ok(())
}
