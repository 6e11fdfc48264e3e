use anyhow::Result;
use tokio::sync::oneshot;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use replica_sync::{CycleReport, LogFileReporter, OutcomeReporter, SyncEngine, SyncEvent};

use crate::config::DaemonConfig;
use crate::scheduler::CycleScheduler;

/// Mirrors one source tree into one replica tree on a fixed interval
pub struct MirrorDaemon {
    config: DaemonConfig,
    engine: SyncEngine,
    reporter: LogFileReporter,
    session_id: Uuid,
}

impl MirrorDaemon {
    pub fn new(config: DaemonConfig) -> Self {
        let engine = SyncEngine::new(config.sync_options());
        let reporter = LogFileReporter::new(&config.log_file);
        Self {
            config,
            engine,
            reporter,
            session_id: Uuid::new_v4(),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Run cycles until Ctrl-C
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn run(self) -> Result<()> {
        info!(
            interval_secs = self.config.interval.as_secs(),
            comparison = %self.config.sync.comparison,
            dry_run = self.config.sync.dry_run,
            "Starting replica daemon"
        );
        self.announce();

        let daemon = &self;
        let scheduler = CycleScheduler::new(self.config.interval);
        let completed = scheduler
            .run(move |cycle| daemon.run_cycle(cycle), shutdown_signal())
            .await;

        info!(completed, "Replica daemon stopped");
        Ok(())
    }

    /// Run a single cycle and return its report
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn run_once(&self) -> Result<CycleReport> {
        self.announce();
        let report = self
            .engine
            .reconcile(&self.config.source, &self.config.replica, &self.reporter)
            .await?;
        info!("{}", report.summary());
        Ok(report)
    }

    fn announce(&self) {
        self.reporter.record(&SyncEvent::Started {
            source: self.config.source.as_path().to_path_buf(),
            replica: self.config.replica.as_path().to_path_buf(),
        });
    }

    async fn run_cycle(&self, cycle: u64) {
        match self
            .engine
            .reconcile(&self.config.source, &self.config.replica, &self.reporter)
            .await
        {
            Ok(report) => {
                if report.is_successful() {
                    info!(cycle, "{}", report.summary());
                } else {
                    warn!(cycle, errors = report.errors().count(), "{}", report.summary());
                }
            }
            Err(e) => error!(cycle, "Cycle failed: {}", e),
        }
    }
}

/// Resolves on the first Ctrl-C.
///
/// The listener is installed right away so an interrupt that arrives while a
/// cycle is running is still seen when the cycle ends.
fn shutdown_signal() -> impl std::future::Future<Output = ()> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    async move {
        let _ = rx.await;
    }
}
