use std::collections::HashMap;
use std::future::poll_fn;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, info, warn};

use super::{
    DebounceConfig, RootDescriptor, WatchEvent, WatchEventKind, WatchSource, WatchTarget, classify,
    dashboard_targets, relative_file,
};
use crate::errors::{WatchError, is_not_found};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DebounceKey {
    source: WatchSource,
    root: String,
    file: String,
}

#[derive(Debug)]
struct RawChange {
    key: DebounceKey,
    kind: WatchEventKind,
}

/// Watches a set of directories and emits debounced [`WatchEvent`]s.
///
/// Dropping the debouncer stops it without waiting; call [`stop`](Self::stop)
/// to be sure nothing is emitted afterwards.
pub struct WatchDebouncer {
    watchers: Vec<RecommendedWatcher>,
    watched: Vec<WatchTarget>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatchDebouncer {
    /// Watch the artifact roots and, when given, the inbox subdirectories.
    pub fn start(
        roots: &[RootDescriptor],
        inbox: Option<&Path>,
        config: DebounceConfig,
        out: mpsc::UnboundedSender<WatchEvent>,
    ) -> Self {
        Self::start_targets(dashboard_targets(roots, inbox), config, out)
    }

    /// Watch arbitrary targets. Directories that are missing or cannot be
    /// watched are logged and skipped.
    pub fn start_targets(
        targets: Vec<WatchTarget>,
        config: DebounceConfig,
        out: mpsc::UnboundedSender<WatchEvent>,
    ) -> Self {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watchers = Vec::new();
        let mut watched = Vec::new();

        for target in targets {
            match watch_target(&target, config.max_depth, raw_tx.clone()) {
                Ok(watcher) => {
                    debug!(event = "watch_started", source = %target.source, root = %target.alias, path = %target.path.display());
                    watchers.push(watcher);
                    watched.push(target);
                }
                Err(e) if e.is_not_found() => {
                    warn!(event = "watch_dir_missing", source = %target.source, path = %target.path.display());
                }
                Err(e) => {
                    warn!(event = "watch_failed", source = %target.source, path = %target.path.display(), error = %e);
                }
            }
        }
        info!(event = "watcher_ready", watched = watched.len());

        let cancel = CancellationToken::new();
        let task = spawn_debounce_loop(raw_rx, out, config.delay, cancel.clone());
        Self {
            watchers,
            watched,
            cancel,
            task: Some(task),
        }
    }

    /// Targets that are actually being watched.
    pub fn watched(&self) -> &[WatchTarget] {
        &self.watched
    }

    /// Close every watcher, cancel pending timers and wait for the debounce
    /// task to finish. Nothing is emitted after this returns.
    pub async fn stop(&mut self) {
        self.watchers.clear();
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(event = "debounce_task_failed", error = %e);
            }
        }
    }
}

impl Drop for WatchDebouncer {
    fn drop(&mut self) {
        self.watchers.clear();
        self.cancel.cancel();
    }
}

fn watch_target(
    target: &WatchTarget,
    max_depth: usize,
    raw_tx: mpsc::UnboundedSender<RawChange>,
) -> Result<RecommendedWatcher, WatchError> {
    if !target.path.is_dir() {
        return Err(WatchError::MissingDirectory(target.path.clone()));
    }

    // Backends may report canonical paths (e.g. /private/var on macOS).
    let mut roots: Vec<PathBuf> = vec![target.path.clone()];
    if let Ok(canonical) = target.path.canonicalize() {
        if canonical != target.path {
            roots.push(canonical);
        }
    }
    let source = target.source;
    let alias = target.alias.clone();
    let only_file = target.only_file.clone();
    let (max_depth, mode) = match only_file {
        Some(_) => (0, RecursiveMode::NonRecursive),
        None => (max_depth, RecursiveMode::Recursive),
    };

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for (path, kind) in classify(&event.kind, &event.paths) {
                let Some(file) = roots
                    .iter()
                    .find_map(|root| relative_file(root, &path, max_depth))
                else {
                    continue;
                };
                if only_file.as_ref().is_some_and(|only| *only != file) {
                    continue;
                }
                let key = DebounceKey {
                    source,
                    root: alias.clone(),
                    file,
                };
                // Receiver gone means the debouncer is stopping.
                let _ = raw_tx.send(RawChange { key, kind });
            }
        }
        Err(e) if is_not_found(&e) => {}
        Err(e) => warn!(event = "watcher_error", source = %source, error = %e),
    })?;

    watcher
        .watch(&target.path, mode)
        .map_err(|source| WatchError::WatchPath {
            path: target.path.clone(),
            source,
        })?;
    Ok(watcher)
}

/// Collapse raw changes per key: each change (re)arms that key's timer, and
/// the last observed kind is emitted when the timer fires.
fn spawn_debounce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<RawChange>,
    out: mpsc::UnboundedSender<WatchEvent>,
    delay: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timers: DelayQueue<DebounceKey> = DelayQueue::new();
        let mut pending: HashMap<DebounceKey, (delay_queue::Key, WatchEventKind)> = HashMap::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                raw = raw_rx.recv() => {
                    let Some(RawChange { key, kind }) = raw else { break };
                    match pending.get_mut(&key) {
                        Some((timer, last)) => {
                            timers.reset(timer, delay);
                            *last = kind;
                        }
                        None => {
                            let timer = timers.insert(key.clone(), delay);
                            pending.insert(key, (timer, kind));
                        }
                    }
                }
                Some(expired) = poll_fn(|cx| timers.poll_expired(cx)), if !timers.is_empty() => {
                    let key = expired.into_inner();
                    let Some((_, kind)) = pending.remove(&key) else { continue };
                    let event = WatchEvent {
                        source: key.source,
                        root: key.root,
                        kind,
                        file: key.file,
                        timestamp: Utc::now(),
                    };
                    if out.send(event).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(file: &str, kind: WatchEventKind) -> RawChange {
        RawChange {
            key: DebounceKey {
                source: WatchSource::Artifact,
                root: "docs".to_string(),
                file: file.to_string(),
            },
            kind,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_trailing_event() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = spawn_debounce_loop(raw_rx, out_tx, Duration::from_millis(200), cancel.clone());

        raw_tx.send(raw("a.md", WatchEventKind::Add)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        raw_tx.send(raw("a.md", WatchEventKind::Change)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        raw_tx.send(raw("a.md", WatchEventKind::Change)).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(out_rx.try_recv().is_err(), "timer was re-armed by later writes");

        let event = out_rx.recv().await.unwrap();
        assert_eq!(event.file, "a.md");
        assert_eq!(event.root, "docs");
        assert_eq!(event.source, WatchSource::Artifact);
        assert_eq!(event.kind, WatchEventKind::Change);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(out_rx.try_recv().is_err(), "exactly one emission");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_files_debounce_independently() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let _task = spawn_debounce_loop(raw_rx, out_tx, Duration::from_millis(100), cancel);

        raw_tx.send(raw("a.md", WatchEventKind::Add)).unwrap();
        raw_tx.send(raw("b.md", WatchEventKind::Unlink)).unwrap();

        let mut files = vec![
            out_rx.recv().await.unwrap().file,
            out_rx.recv().await.unwrap().file,
        ];
        files.sort();
        assert_eq!(files, vec!["a.md", "b.md"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending_timers() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = spawn_debounce_loop(raw_rx, out_tx, Duration::from_millis(200), cancel.clone());

        raw_tx.send(raw("a.md", WatchEventKind::Change)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();

        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let targets = vec![
            WatchTarget::new(WatchSource::Artifact, "gone", dir.path().join("gone")),
            WatchTarget::new(WatchSource::Artifact, "here", dir.path()),
        ];
        let mut debouncer = WatchDebouncer::start_targets(targets, DebounceConfig::default(), out_tx);
        assert_eq!(debouncer.watched().len(), 1);
        assert_eq!(debouncer.watched()[0].alias, "here");
        debouncer.stop().await;
    }

    #[tokio::test]
    async fn test_real_writes_produce_one_artifact_event() {
        let dir = tempfile::tempdir().unwrap();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let roots = vec![RootDescriptor {
            alias: "docs".to_string(),
            path: dir.path().to_path_buf(),
        }];
        let config = DebounceConfig {
            delay: Duration::from_millis(200),
            max_depth: 4,
        };
        let mut debouncer = WatchDebouncer::start(&roots, None, config, out_tx);

        let file = dir.path().join("notes.md");
        for i in 0..3 {
            std::fs::write(&file, format!("rev {}", i)).unwrap();
            tokio::time::sleep(Duration::from_millis(15)).await;
        }

        let event = tokio::time::timeout(Duration::from_secs(5), out_rx.recv())
            .await
            .expect("debounced event")
            .unwrap();
        assert_eq!(event.source, WatchSource::Artifact);
        assert_eq!(event.root, "docs");
        assert_eq!(event.file, "notes.md");

        let extra = tokio::time::timeout(Duration::from_millis(600), out_rx.recv()).await;
        assert!(extra.is_err(), "burst must collapse to one event");

        debouncer.stop().await;
    }

    #[tokio::test]
    async fn test_single_file_target_ignores_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let log = dir.path().join("runs.jsonl");
        let targets = vec![WatchTarget::file(WatchSource::Runs, "runs", &log).unwrap()];
        let config = DebounceConfig {
            delay: Duration::from_millis(100),
            max_depth: 4,
        };
        let mut debouncer = WatchDebouncer::start_targets(targets, config, out_tx);

        std::fs::write(dir.path().join("opsboard.toml"), "x").unwrap();
        std::fs::write(&log, "{}\n").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), out_rx.recv())
            .await
            .expect("debounced event")
            .unwrap();
        assert_eq!(event.source, WatchSource::Runs);
        assert_eq!(event.file, "runs.jsonl");
        let extra = tokio::time::timeout(Duration::from_millis(400), out_rx.recv()).await;
        assert!(extra.is_err(), "sibling file must not be reported");

        debouncer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_prevents_later_emissions() {
        let dir = tempfile::tempdir().unwrap();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let targets = vec![WatchTarget::new(WatchSource::Artifact, "docs", dir.path())];
        let config = DebounceConfig {
            delay: Duration::from_millis(300),
            max_depth: 4,
        };
        let mut debouncer = WatchDebouncer::start_targets(targets, config, out_tx);

        std::fs::write(dir.path().join("late.md"), "x").unwrap();
        debouncer.stop().await;

        assert!(out_rx.recv().await.is_none());
    }
}
