use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

/// Runs a job repeatedly with a fixed pause between the end of one run and
/// the start of the next. Runs never overlap.
#[derive(Debug, Clone)]
pub struct CycleScheduler {
    interval: Duration,
}

impl CycleScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Run `job` until `shutdown` resolves.
    ///
    /// The first run starts immediately. `shutdown` is only observed between
    /// runs, so a run in progress always completes. Returns the number of
    /// completed runs.
    pub async fn run<F, Fut, S>(&self, mut job: F, shutdown: S) -> u64
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = ()>,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut completed = 0u64;

        loop {
            job(completed + 1).await;
            completed += 1;

            debug!(next_in = ?self.interval, "Waiting for next cycle");
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(completed, "Shutdown requested, stopping scheduler");
                    break;
                }
                _ = sleep(self.interval) => {}
            }
        }

        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_every_interval() {
        let start = Instant::now();
        let started_at = RefCell::new(Vec::new());

        let scheduler = CycleScheduler::new(Duration::from_secs(60));
        let completed = scheduler
            .run(
                |_| {
                    started_at.borrow_mut().push(start.elapsed());
                    async {}
                },
                sleep(Duration::from_secs(130)),
            )
            .await;

        assert_eq!(completed, 3);
        assert_eq!(
            *started_at.borrow(),
            vec![
                Duration::from_secs(0),
                Duration::from_secs(60),
                Duration::from_secs(120)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_counts_from_end_of_cycle() {
        let start = Instant::now();
        let started_at = RefCell::new(Vec::new());

        let scheduler = CycleScheduler::new(Duration::from_secs(10));
        scheduler
            .run(
                |_| {
                    started_at.borrow_mut().push(start.elapsed());
                    // a cycle that takes 5 seconds
                    sleep(Duration::from_secs(5))
                },
                sleep(Duration::from_secs(17)),
            )
            .await;

        assert_eq!(
            *started_at.borrow(),
            vec![Duration::from_secs(0), Duration::from_secs(15)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_between_cycles() {
        let scheduler = CycleScheduler::new(Duration::from_secs(10));
        let completed = scheduler
            .run(|_| async {}, sleep(Duration::from_secs(25)))
            .await;

        // runs at 0s, 10s and 20s
        assert_eq!(completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_cycle_finishes_before_shutdown() {
        let counter = RefCell::new(0u64);
        let finished = &counter;

        let scheduler = CycleScheduler::new(Duration::from_secs(10));
        let completed = scheduler
            .run(
                move |_| async move {
                    sleep(Duration::from_secs(5)).await;
                    *finished.borrow_mut() += 1;
                },
                sleep(Duration::from_secs(2)),
            )
            .await;

        assert_eq!(completed, 1);
        assert_eq!(*finished.borrow(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_receives_cycle_numbers() {
        let seen = RefCell::new(Vec::new());

        CycleScheduler::new(Duration::from_secs(1))
            .run(
                |cycle| {
                    seen.borrow_mut().push(cycle);
                    async {}
                },
                sleep(Duration::from_millis(3500)),
            )
            .await;

        assert_eq!(*seen.borrow(), vec![1, 2, 3, 4]);
    }
}
