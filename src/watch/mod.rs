//! Debounced filesystem watching.
//!
//! Raw notify events are classified into `add` / `change` / `unlink`, made
//! relative to the watched root, and collapsed per `(source, root, file)` so a
//! burst of writes to one file yields a single trailing [`WatchEvent`].

mod debouncer;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::event::{ModifyKind, RenameMode};
use serde::{Deserialize, Serialize};

pub use debouncer::WatchDebouncer;

/// Default quiet period before a burst of changes is reported.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Default number of directory levels watched below each root.
pub const DEFAULT_MAX_DEPTH: usize = 4;

/// Fixed subdirectories of the inbox, each watched as its own root.
pub const INBOX_SUBDIRS: [&str; 3] = ["pending", "processed", "archived"];

/// What a watched directory feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchSource {
    Artifact,
    Inbox,
    Beads,
    Runs,
    Progress,
}

impl std::fmt::Display for WatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WatchSource::Artifact => "artifact",
            WatchSource::Inbox => "inbox",
            WatchSource::Beads => "beads",
            WatchSource::Runs => "runs",
            WatchSource::Progress => "progress",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    Add,
    Change,
    Unlink,
}

impl std::fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WatchEventKind::Add => "add",
            WatchEventKind::Change => "change",
            WatchEventKind::Unlink => "unlink",
        };
        f.write_str(s)
    }
}

/// An artifact directory shown on the dashboard under `alias`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDescriptor {
    pub alias: String,
    pub path: PathBuf,
}

/// One directory to watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub source: WatchSource,
    pub alias: String,
    pub path: PathBuf,
    /// When set, only this file directly inside `path` is reported and the
    /// directory is watched non-recursively.
    pub only_file: Option<String>,
}

impl WatchTarget {
    pub fn new(source: WatchSource, alias: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            alias: alias.into(),
            path: path.into(),
            only_file: None,
        }
    }

    /// Watch a single file through its parent directory.
    pub fn file(source: WatchSource, alias: impl Into<String>, file: &Path) -> Option<Self> {
        let name = file.file_name()?.to_string_lossy().into_owned();
        let dir = match file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Some(Self {
            source,
            alias: alias.into(),
            path: dir,
            only_file: Some(name),
        })
    }
}

/// Debouncer settings.
#[derive(Debug, Clone, Copy)]
pub struct DebounceConfig {
    pub delay: Duration,
    /// Directory levels below a root that are still reported.
    pub max_depth: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DEBOUNCE,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// A debounced change to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub source: WatchSource,
    pub root: String,
    pub kind: WatchEventKind,
    /// Path relative to the root, `/`-separated.
    pub file: String,
    pub timestamp: DateTime<Utc>,
}

/// Targets for the dashboard's artifact roots and inbox subdirectories.
pub fn dashboard_targets(roots: &[RootDescriptor], inbox: Option<&Path>) -> Vec<WatchTarget> {
    let mut targets: Vec<WatchTarget> = roots
        .iter()
        .map(|root| WatchTarget::new(WatchSource::Artifact, &root.alias, &root.path))
        .collect();
    if let Some(inbox) = inbox {
        targets.extend(
            INBOX_SUBDIRS
                .iter()
                .map(|sub| WatchTarget::new(WatchSource::Inbox, *sub, inbox.join(sub))),
        );
    }
    targets
}

/// Map a notify event onto per-path change kinds.
///
/// Renames become `unlink` of the old path plus `add` of the new one.
/// Access events carry no change and are dropped.
pub(crate) fn classify(
    kind: &notify::EventKind,
    paths: &[PathBuf],
) -> Vec<(PathBuf, WatchEventKind)> {
    use notify::EventKind as K;

    let all = |k: WatchEventKind| paths.iter().map(|p| (p.clone(), k)).collect::<Vec<_>>();
    match kind {
        K::Create(_) => all(WatchEventKind::Add),
        K::Remove(_) => all(WatchEventKind::Unlink),
        K::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::with_capacity(2);
            if let Some(from) = paths.first() {
                out.push((from.clone(), WatchEventKind::Unlink));
            }
            if let Some(to) = paths.get(1) {
                out.push((to.clone(), WatchEventKind::Add));
            }
            out
        }
        K::Modify(ModifyKind::Name(RenameMode::From)) => all(WatchEventKind::Unlink),
        K::Modify(ModifyKind::Name(RenameMode::To)) => all(WatchEventKind::Add),
        K::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .map(|p| {
                let kind = if p.exists() {
                    WatchEventKind::Add
                } else {
                    WatchEventKind::Unlink
                };
                (p.clone(), kind)
            })
            .collect(),
        K::Modify(_) | K::Any => all(WatchEventKind::Change),
        K::Access(_) | K::Other => Vec::new(),
    }
}

/// `path` relative to `root` with `/` separators, or `None` when it is the
/// root itself, outside it, or deeper than `max_depth` directory levels.
pub(crate) fn relative_file(root: &Path, path: &Path, max_depth: usize) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() || parts.len() > max_depth + 1 {
        return None;
    }
    Some(parts.join("/"))
}
