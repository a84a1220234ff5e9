use std::{
    collections::HashSet,
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Window notify-debouncer-mini uses to collapse bursts on a single path.
const EVENT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Collects changed note paths until the vault has been quiet for a while,
/// then hands them over as one batch.
#[derive(Debug)]
pub struct ChangeBatcher {
    quiet: Duration,
    pending: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
}

impl ChangeBatcher {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Queues a path. Non-Markdown paths and paths already queued are
    /// ignored; returns whether the path was added.
    pub fn push(&mut self, path: PathBuf) -> bool {
        let is_note = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("md"));
        if !is_note || !self.seen.insert(path.clone()) {
            return false;
        }
        self.pending.push(path);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drains the queued paths in arrival order.
    pub fn take(&mut self) -> Vec<PathBuf> {
        self.seen.clear();
        std::mem::take(&mut self.pending)
    }

    /// Feeds `events` through the batcher until the channel closes, calling
    /// `on_batch` once per quiet window. Whatever is pending at close is
    /// flushed.
    pub async fn run<F, Fut>(mut self, mut events: mpsc::Receiver<PathBuf>, mut on_batch: F)
    where
        F: FnMut(Vec<PathBuf>) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            let next = if self.is_empty() {
                events.recv().await
            } else {
                match tokio::time::timeout(self.quiet, events.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        on_batch(self.take()).await;
                        continue;
                    }
                }
            };

            match next {
                Some(path) => {
                    if self.push(path.clone()) {
                        debug!("Change queued: {}", path.display());
                    }
                }
                None => {
                    if !self.is_empty() {
                        on_batch(self.take()).await;
                    }
                    break;
                }
            }
        }
    }
}

/// Watches a vault and reports batches of changed notes.
pub struct VaultWatcher {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    batcher: tokio::task::JoinHandle<()>,
}

impl VaultWatcher {
    /// Starts watching `root` recursively. `on_batch` runs on the Tokio
    /// runtime once the vault has been quiet for `quiet`.
    pub fn start<F, Fut>(root: &Path, quiet: Duration, on_batch: F) -> Result<Self>
    where
        F: FnMut(Vec<PathBuf>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(1024);

        // The batcher has to be listening before events arrive.
        let batcher = tokio::spawn(ChangeBatcher::new(quiet).run(events_rx, on_batch));

        let mut debouncer = notify_debouncer_mini::new_debouncer(
            EVENT_DEBOUNCE,
            move |res: notify_debouncer_mini::DebounceEventResult| match res {
                Ok(events) => {
                    for ev in events {
                        // Runs on the notifier's own thread, outside the runtime.
                        if events_tx.blocking_send(ev.path).is_err() {
                            warn!("Change batcher stopped, dropping file event");
                            return;
                        }
                    }
                }
                Err(e) => warn!("File watch error: {e}"),
            },
        )?;

        debouncer
            .watcher()
            .watch(root, notify::RecursiveMode::Recursive)?;
        info!(
            "Watching {} for changes (quiet window {:.1}s)",
            root.display(),
            quiet.as_secs_f64()
        );

        Ok(Self {
            _debouncer: debouncer,
            batcher,
        })
    }

    /// Stops watching and waits for the last batch to finish.
    pub async fn stop(self) -> Result<()> {
        let Self {
            _debouncer,
            batcher,
        } = self;
        drop(_debouncer);
        batcher.await?;
        Ok(())
    }
}
