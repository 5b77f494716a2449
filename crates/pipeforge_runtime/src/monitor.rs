//! Progress monitor for running analyses.
//!
//! Polls both ratios on a fixed interval from a background task and
//! publishes the latest readings over a watch channel.

use crate::analysis::Analysis;
use crate::ratio::{self, RatioReading};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Latest progress readings
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Sink targets
    pub target: RatioReading,
    /// Targets plus module outputs
    pub intermediate: RatioReading,
    /// Time since the monitor started
    pub elapsed: Duration,
    /// Polls completed
    pub polls: u64,
}

impl ProgressSnapshot {
    fn initial() -> Self {
        Self {
            target: RatioReading::Unknown("not polled yet".to_string()),
            intermediate: RatioReading::Unknown("not polled yet".to_string()),
            elapsed: Duration::ZERO,
            polls: 0,
        }
    }

    /// Both ratios known and complete
    #[must_use]
    pub fn is_complete(&self) -> bool {
        ratio::is_complete(&self.target, &self.intermediate)
    }

    /// Progress of the intermediate ratio, which covers every artifact
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        self.intermediate.ratio().map(|r| r.fraction())
    }
}

/// Background ratio poller
#[derive(Debug)]
pub struct ProgressMonitor {
    receiver: watch::Receiver<ProgressSnapshot>,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressMonitor {
    /// Start polling `analysis` every `interval`
    ///
    /// The first poll happens immediately. Each query is bounded by the
    /// analysis' poll timeout, so a stalled query only delays the next tick.
    #[must_use]
    pub fn spawn(analysis: Arc<Analysis>, interval: Duration) -> Self {
        let (sender, receiver) = watch::channel(ProgressSnapshot::initial());
        let stop = CancellationToken::new();
        let token = stop.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut polls = 0;
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let (target, intermediate) =
                    tokio::join!(analysis.target_ratio(), analysis.intermediate_ratio());
                polls += 1;
                debug!(polls, target = %target, intermediate = %intermediate, "Progress");
                let snapshot = ProgressSnapshot {
                    target,
                    intermediate,
                    elapsed: started.elapsed(),
                    polls,
                };
                if sender.send(snapshot).is_err() {
                    break;
                }
            }
        });

        Self {
            receiver,
            stop,
            handle,
        }
    }

    /// A receiver notified on every poll
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.receiver.clone()
    }

    /// Most recent snapshot
    #[must_use]
    pub fn latest(&self) -> ProgressSnapshot {
        self.receiver.borrow().clone()
    }

    /// Stop polling and return the last snapshot
    pub async fn stop(self) -> ProgressSnapshot {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            debug!(error = %e, "Progress task ended abnormally");
        }
        self.receiver.borrow().clone()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::driver::DriverConfig;
    use pipeforge_plan::SCRIPT_FILE_NAME;
    use std::os::unix::fs::PermissionsExt;

    fn analysis_with(cases: &str, timeout: Duration) -> (tempfile::TempDir, Arc<Analysis>) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(SCRIPT_FILE_NAME), "all:\n").unwrap();
        let make = tmp.path().join("fake-make.sh");
        std::fs::write(
            &make,
            format!("#!/bin/sh\nfor last; do :; done\ncase \"$last\" in\n{cases}\nesac\n"),
        )
        .unwrap();
        std::fs::set_permissions(&make, std::fs::Permissions::from_mode(0o755)).unwrap();
        let config = DriverConfig::new()
            .with_make_program(make.display().to_string())
            .with_poll_timeout(timeout);
        let analysis = Analysis::open("watch", tmp.path(), config).unwrap();
        (tmp, Arc::new(analysis))
    }

    #[test]
    fn test_initial_snapshot() {
        let snapshot = ProgressSnapshot::initial();
        assert!(!snapshot.is_complete());
        assert_eq!(snapshot.fraction(), None);
        assert_eq!(snapshot.polls, 0);
    }

    #[tokio::test]
    async fn test_publishes_polls() {
        let (_tmp, analysis) = analysis_with(
            "target_ratio) echo '1 / 2' ;;\nintermediate_ratio) echo '3 / 4' ;;",
            Duration::from_secs(5),
        );
        let monitor = ProgressMonitor::spawn(analysis, Duration::from_millis(20));
        let mut updates = monitor.subscribe();
        updates.changed().await.unwrap();

        let snapshot = monitor.latest();
        assert!(snapshot.polls >= 1);
        assert_eq!(snapshot.target.to_string(), "1 / 2");
        assert_eq!(snapshot.fraction(), Some(0.75));
        assert!(!snapshot.is_complete());

        let last = monitor.stop().await;
        assert!(last.polls >= snapshot.polls);
    }

    #[tokio::test]
    async fn test_stalled_poll_reports_unknown() {
        let (_tmp, analysis) = analysis_with(
            "target_ratio) sleep 5 ;;\nintermediate_ratio) echo '1 / 1' ;;",
            Duration::from_millis(100),
        );
        let monitor = ProgressMonitor::spawn(analysis, Duration::from_millis(20));
        let mut updates = monitor.subscribe();
        updates.changed().await.unwrap();

        let snapshot = monitor.stop().await;
        assert!(matches!(snapshot.target, RatioReading::Unknown(_)));
        assert!(snapshot.intermediate.is_complete());
    }
}
