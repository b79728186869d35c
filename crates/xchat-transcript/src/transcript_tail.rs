//! Watch-driven tail task for one transcript file.
//!
//! File-change notifications from `notify` are forwarded into a channel and
//! consumed by a single tokio task per transcript, so lines of one file are
//! handled strictly in order while separate transcripts progress
//! independently. An optional poll tick covers platforms where change events
//! are coalesced or dropped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::tail_cursor::TailCursor;

#[async_trait]
/// Receives every complete transcript line, in file order.
pub trait TranscriptLineHandler: Send + 'static {
    async fn handle_line(&mut self, line: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailOptions {
    pub from_end: bool,
    pub poll_interval: Option<Duration>,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            from_end: true,
            poll_interval: Some(Duration::from_millis(1_000)),
        }
    }
}

/// Handle to a running transcript tail. Dropping it without `stop` leaves the
/// task running until the runtime shuts down.
pub struct TranscriptTail {
    path: PathBuf,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl TranscriptTail {
    /// Seeds the cursor, installs the file watch and spawns the tail task.
    /// Open/stat/watch failures are returned to the caller; once running,
    /// read and handler failures are logged and the tail continues.
    pub fn start<H>(path: &Path, options: TailOptions, handler: H) -> Result<Self>
    where
        H: TranscriptLineHandler,
    {
        let cursor = TailCursor::seed(path, options.from_end)?;

        let (change_tx, change_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| match result {
                Ok(event) if !matches!(event.kind, EventKind::Access(_)) => {
                    let _ = change_tx.send(());
                }
                Ok(_) => {}
                Err(error) => warn!(error = %error, "transcript watch reported an error"),
            })
            .context("failed to create transcript watcher")?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch transcript {}", path.display()))?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_tail_loop(
            path.to_path_buf(),
            cursor,
            watcher,
            change_rx,
            stop_rx,
            options.poll_interval,
            handler,
        ));

        info!(
            path = %path.display(),
            from_end = options.from_end,
            "tailing transcript"
        );
        Ok(Self {
            path: path.to_path_buf(),
            stop_tx: Some(stop_tx),
            task: Some(task),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Releases the file watch and ends the tail task. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
            debug!(path = %self.path.display(), "transcript tail stop requested");
        }
    }

    /// Stops the tail and waits for the task to wind down.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn run_tail_loop<H>(
    path: PathBuf,
    mut cursor: TailCursor,
    watcher: RecommendedWatcher,
    mut change_rx: mpsc::UnboundedReceiver<()>,
    mut stop_rx: watch::Receiver<bool>,
    poll_interval: Option<Duration>,
    mut handler: H,
) where
    H: TranscriptLineHandler,
{
    // Keeps the OS watch registered for the lifetime of the loop.
    let _watcher = watcher;
    let poll_enabled = poll_interval.is_some();
    let mut poll = tokio::time::interval(poll_interval.unwrap_or(Duration::from_secs(3_600)));
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            notification = change_rx.recv() => {
                if notification.is_none() {
                    break;
                }
                while change_rx.try_recv().is_ok() {}
                drain_appended_lines(&path, &mut cursor, &mut handler).await;
            }
            _ = poll.tick(), if poll_enabled => {
                drain_appended_lines(&path, &mut cursor, &mut handler).await;
            }
        }
    }
    info!(path = %path.display(), "transcript tail stopped");
}

async fn drain_appended_lines<H>(path: &Path, cursor: &mut TailCursor, handler: &mut H)
where
    H: TranscriptLineHandler,
{
    let read = match cursor.read_appended(path) {
        Ok(read) => read,
        Err(error) => {
            warn!(path = %path.display(), error = %format!("{error:#}"), "transcript read failed");
            return;
        }
    };
    if read.truncated {
        info!(path = %path.display(), "transcript truncated; cursor reset to start");
    }
    for line in read.lines {
        if let Err(error) = handler.handle_line(&line).await {
            warn!(
                path = %path.display(),
                error = %format!("{error:#}"),
                "transcript line handler failed"
            );
        }
    }
}
