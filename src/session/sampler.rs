// Background progress sampling
//
// A sampler only reads backend state and reports it over a channel. The
// coordinator applies reports on its own task, so a sampler never mutates a
// session.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// One sampled reading, tagged with the generation of its session
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Report {
    pub generation: u64,
    pub kind: ReportKind,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReportKind {
    Recording { elapsed: Duration, power_db: f32 },
    RecordingFailed(String),
    /// `epoch` counts the seeks of the session when the reading was taken
    Playback { elapsed: Duration, epoch: u64 },
    PlaybackFinished { epoch: u64 },
}

impl ReportKind {
    /// Terminal readings end the sampling loop
    fn is_final(&self) -> bool {
        matches!(self, ReportKind::RecordingFailed(_) | ReportKind::PlaybackFinished { .. })
    }
}

pub(crate) type ReportSender = mpsc::UnboundedSender<Report>;

/// Handle of a running sampling loop
pub(crate) struct Sampler {
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Sampler {
    /// Sample with `read` every `interval` until stopped or a final reading
    pub fn spawn<P, Fut>(generation: u64, interval: Duration, reports: ReportSender, mut read: P) -> Self
    where
        P: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ReportKind> + Send,
    {
        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the first reading is one interval in
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !flag.load(Ordering::SeqCst) {
                    break;
                }

                let kind = read().await;

                // Stopped while reading: the value may already be stale
                if !flag.load(Ordering::SeqCst) {
                    break;
                }

                let last = kind.is_final();
                if reports.send(Report { generation, kind }).is_err() {
                    break;
                }
                if last {
                    break;
                }
            }

            debug!("Sampler for session {} exited", generation);
        });

        Self { alive, task }
    }

    pub fn stop(self) {
        // Drop does the work
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}
