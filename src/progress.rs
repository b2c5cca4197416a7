//! Query progress reporting.
//!
//! A caller installs a [`ProgressUpdater`] sink plus a minimum reporting
//! period through [`QueryOptions`](crate::QueryOptions). The first response
//! after submission is always reported; later snapshots are dropped while
//! the period has not elapsed and the query state string is unchanged.
//! Emission never blocks the paging loop: if the sink is behind, the
//! snapshot is discarded.

use crate::cancel::CancelToken;
use crate::models::QueryStats;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// A progress snapshot for one query.
#[derive(Debug, Clone)]
pub struct QueryProgressInfo {
    pub query_id: String,
    pub stats: QueryStats,
}

/// Sink for query progress snapshots.
///
/// Called immediately when the query starts, while receiving data (at most
/// once per configured period unless the query state changes), and when the
/// query finishes.
pub trait ProgressUpdater: Send + Sync {
    fn update(&self, info: QueryProgressInfo);
}

struct CallbackState {
    last_callback: Instant,
    last_state: String,
}

/// Per-statement progress bookkeeping and the forwarder task feeding the
/// caller's sink.
pub(crate) struct ProgressTracker {
    period: Duration,
    tx: mpsc::Sender<QueryProgressInfo>,
    state: Mutex<CallbackState>,
}

impl ProgressTracker {
    pub fn start(
        updater: Arc<dyn ProgressUpdater>,
        period: Duration,
        done: CancelToken,
    ) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<QueryProgressInfo>(1);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    info = rx.recv() => {
                        let Some(info) = info else { return };
                        updater.update(info);
                    }
                    _ = done.cancelled() => return,
                }
            }
        });
        Arc::new(Self {
            period,
            tx,
            state: Mutex::new(CallbackState {
                last_callback: Instant::now(),
                last_state: String::new(),
            }),
        })
    }

    /// Report the first snapshot unconditionally.
    pub fn report_initial(&self, query_id: &str, stats: &QueryStats) {
        self.emit(query_id, stats);
    }

    /// Report a follow-up snapshot, unless the period has not elapsed and
    /// the query state is unchanged.
    pub fn schedule(&self, query_id: &str, stats: &QueryStats) {
        {
            let state = self.state.lock().expect("progress state lock poisoned");
            if state.last_callback.elapsed() < self.period && state.last_state == stats.state {
                return;
            }
        }
        self.emit(query_id, stats);
    }

    fn emit(&self, query_id: &str, stats: &QueryStats) {
        let info = QueryProgressInfo {
            query_id: query_id.to_string(),
            stats: stats.clone(),
        };
        // Non-blocking: drop the snapshot when the sink is not keeping up.
        let _ = self.tx.try_send(info);
        let mut state = self.state.lock().expect("progress state lock poisoned");
        state.last_callback = Instant::now();
        state.last_state = stats.state.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingUpdater {
        calls: AtomicUsize,
    }

    impl ProgressUpdater for Arc<CountingUpdater> {
        fn update(&self, _info: QueryProgressInfo) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stats(state: &str) -> QueryStats {
        QueryStats {
            state: state.to_string(),
            ..QueryStats::default()
        }
    }

    #[tokio::test]
    async fn test_period_suppression_and_state_change() {
        let counter = Arc::new(CountingUpdater {
            calls: AtomicUsize::new(0),
        });
        let done = CancelToken::new();
        let tracker = ProgressTracker::start(
            Arc::new(counter.clone()),
            Duration::from_secs(3600),
            done.clone(),
        );

        tracker.report_initial("q1", &stats("QUEUED"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);

        // same state within the period: suppressed
        tracker.schedule("q1", &stats("QUEUED"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);

        // state change bypasses the period
        tracker.schedule("q1", &stats("RUNNING"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.calls.load(Ordering::SeqCst), 2);

        done.cancel();
    }
}
