//! Progress accounting and display.
//!
//! Workers update a shared [`ProgressTracker`]; a [`ProgressReporter`] samples it at a fixed
//! cadence and hands [`ProgressState`] snapshots to a caller supplied [`ProgressSink`].
//! Progress is purely observational: running without a sink changes nothing about the transfer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{Level, event, instrument};

use crate::options::ProgressSettings;

/// A consistent view of the transfer progress.
///
/// `transferred_bytes <= total_bytes` and `completed_files <= total_files` always hold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProgressState {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub total_files: u64,
    pub completed_files: u64,
}

/// Counters shared by all workers of one run.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total_bytes: AtomicU64,
    transferred_bytes: AtomicU64,
    total_files: AtomicU64,
    completed_files: AtomicU64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the totals; counters never go down.
    pub fn set_totals(&self, files: u64, bytes: u64) {
        self.total_files.fetch_max(files, Ordering::Relaxed);
        self.total_bytes.fetch_max(bytes, Ordering::Relaxed);
    }

    pub fn record(&self, bytes: u64) {
        self.transferred_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_file_complete(&self) {
        self.completed_files.fetch_add(1, Ordering::Relaxed);
    }

    #[instrument(level = "trace", skip(self))]
    pub fn snapshot(&self) -> ProgressState {
        // read the progress counters before the totals so that a concurrent set_totals can only
        // make the totals look larger
        let transferred_bytes = self.transferred_bytes.load(Ordering::Acquire);
        let completed_files = self.completed_files.load(Ordering::Acquire);
        let mut state = ProgressState {
            total_bytes: self.total_bytes.load(Ordering::Acquire),
            transferred_bytes,
            total_files: self.total_files.load(Ordering::Acquire),
            completed_files,
        };
        if state.transferred_bytes > state.total_bytes {
            event!(
                Level::DEBUG,
                "Progress inversion - total bytes: {}, transferred bytes: {}",
                state.total_bytes,
                state.transferred_bytes
            );
            state.total_bytes = state.transferred_bytes;
        }
        if state.completed_files > state.total_files {
            event!(
                Level::DEBUG,
                "Progress inversion - total files: {}, completed files: {}",
                state.total_files,
                state.completed_files
            );
            state.total_files = state.completed_files;
        }
        state
    }
}

/// Consumer of progress snapshots.
pub trait ProgressSink: Send + Sync {
    fn update(&self, state: &ProgressState);

    /// Called exactly once with the final snapshot.
    fn finish(&self, state: &ProgressState) {
        self.update(state);
    }
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressState) + Send + Sync,
{
    fn update(&self, state: &ProgressState) {
        self(state)
    }
}

/// Terminal progress bar.
pub struct BarSink {
    bar: indicatif::ProgressBar,
}

impl BarSink {
    pub fn new() -> Self {
        let style = indicatif::ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
            )
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("=>-");
        let bar = indicatif::ProgressBar::new(0);
        bar.set_style(style);
        Self { bar }
    }

    /// Bar drawing to a hidden target, for embedding where no terminal is attached.
    pub fn hidden() -> Self {
        Self {
            bar: indicatif::ProgressBar::hidden(),
        }
    }
}

impl Default for BarSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarSink {
    fn update(&self, state: &ProgressState) {
        self.bar.set_length(state.total_bytes);
        self.bar.set_position(state.transferred_bytes);
        self.bar.set_message(format!(
            "{}/{} files",
            state.completed_files, state.total_files
        ));
    }

    fn finish(&self, state: &ProgressState) {
        self.update(state);
        self.bar.finish();
    }
}

/// Periodic text updates through `tracing`, for non-interactive sessions.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    fn line(state: &ProgressState) -> String {
        format!(
            "copied {} / {}, files {} / {}",
            bytesize::ByteSize(state.transferred_bytes),
            bytesize::ByteSize(state.total_bytes),
            state.completed_files,
            state.total_files
        )
    }
}

impl ProgressSink for LogSink {
    fn update(&self, state: &ProgressState) {
        tracing::info!("progress: {}", Self::line(state));
    }

    fn finish(&self, state: &ProgressState) {
        tracing::info!("done: {}", Self::line(state));
    }
}

/// Scoped handle driving a sink for the lifetime of one run.
///
/// [`ProgressReporter::finish`] stops sampling and delivers the final snapshot. Dropping the
/// handle without calling `finish` only stops the sampling task.
pub struct ProgressReporter {
    tracker: Arc<ProgressTracker>,
    sink: Option<Arc<dyn ProgressSink>>,
    stop: tokio_util::sync::CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn start(tracker: Arc<ProgressTracker>, settings: Option<&ProgressSettings>) -> Self {
        let stop = tokio_util::sync::CancellationToken::new();
        let Some(settings) = settings else {
            return Self {
                tracker,
                sink: None,
                stop,
                handle: None,
            };
        };
        let sink = settings.sink.clone();
        let handle = tokio::spawn({
            let tracker = tracker.clone();
            let sink = sink.clone();
            let stop = stop.clone();
            let delay = settings.delay;
            async move {
                let mut interval = tokio::time::interval(delay);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = interval.tick() => sink.update(&tracker.snapshot()),
                    }
                }
            }
        });
        Self {
            tracker,
            sink: Some(sink),
            stop,
            handle: Some(handle),
        }
    }

    pub async fn finish(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(error) = handle.await
        {
            tracing::warn!("progress reporting task failed: {error}");
        }
        if let Some(sink) = self.sink.take() {
            sink.finish(&self.tracker.snapshot());
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
