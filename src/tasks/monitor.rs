//! Bridges a `notify` watcher into [`WatchEvent`]s for the engine.
//!
//! The watcher callback pushes raw events into a channel; a forwarding task
//! translates them and stamps each one with the monitor's generation. Dropping
//! the monitor stops both.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::error::Error;
use crate::events::{DirectoryEvent, DirectoryEventKind, WatchEvent};

/// How long a move-out waits for its matching move-in before it is reported
/// on its own.
const RENAME_PAIRING_WINDOW: Duration = Duration::from_millis(100);

/// What the monitor is looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMode {
    /// Files directly inside the slideshow directory.
    Directory(PathBuf),
    /// The parent of a slideshow directory that does not exist yet; only the
    /// directory's appearance is reported, as a `Created` event for it.
    AwaitDirectory(PathBuf),
}

impl WatchMode {
    pub fn target(&self) -> &Path {
        match self {
            WatchMode::Directory(dir) | WatchMode::AwaitDirectory(dir) => dir,
        }
    }
}

/// A live watch. Replaced wholesale when the directory changes.
pub struct DirectoryMonitor {
    _watcher: RecommendedWatcher,
    forwarder: JoinHandle<()>,
    mode: WatchMode,
    generation: u64,
}

impl DirectoryMonitor {
    /// Start watching according to `mode`. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// Fails when the watched path (the directory, or its parent while
    /// awaiting) cannot be watched.
    pub fn start(mode: WatchMode, generation: u64, out: Sender<WatchEvent>) -> Result<Self, Error> {
        let watched = match &mode {
            WatchMode::Directory(dir) => dir.clone(),
            WatchMode::AwaitDirectory(dir) => dir
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .ok_or_else(|| Error::DirectoryMissing(dir.clone()))?,
        };

        let (raw_tx, raw_rx) = mpsc::channel::<notify::Result<Event>>(128);
        let mut watcher = recommended_watcher(move |res| {
            let _ = raw_tx.blocking_send(res);
        })?;
        watcher.watch(&watched, RecursiveMode::NonRecursive)?;
        info!(watching = %watched.display(), generation, mode = ?mode, "directory monitor armed");

        let translator = EventTranslator::new(mode.clone());
        let forwarder = tokio::spawn(forward(raw_rx, translator, generation, out));
        Ok(Self {
            _watcher: watcher,
            forwarder,
            mode,
            generation,
        })
    }

    pub fn mode(&self) -> &WatchMode {
        &self.mode
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for DirectoryMonitor {
    fn drop(&mut self) {
        self.forwarder.abort();
        debug!(generation = self.generation, "directory monitor dropped");
    }
}

async fn forward(
    mut raw_rx: Receiver<notify::Result<Event>>,
    mut translator: EventTranslator,
    generation: u64,
    out: Sender<WatchEvent>,
) {
    loop {
        let next = if translator.has_pending() {
            match timeout(RENAME_PAIRING_WINDOW, raw_rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    if !emit(&out, generation, translator.flush()).await {
                        return;
                    }
                    continue;
                }
            }
        } else {
            raw_rx.recv().await
        };

        let Some(res) = next else {
            let _ = emit(&out, generation, translator.flush()).await;
            return;
        };
        match res {
            Ok(event) => {
                debug!(kind = ?event.kind, paths = ?event.paths, "notify event");
                if !emit(&out, generation, translator.translate(event)).await {
                    return;
                }
            }
            Err(err) => error!("watch error: {err}"),
        }
    }
}

/// Send `events`; `false` once the engine side has gone away.
async fn emit(out: &Sender<WatchEvent>, generation: u64, events: Vec<DirectoryEvent>) -> bool {
    for event in events {
        if out.send(WatchEvent { generation, event }).await.is_err() {
            return false;
        }
    }
    true
}

/// Maps `notify` events onto [`DirectoryEvent`]s.
///
/// Backends that report a rename as a move-out followed by a move-in sharing
/// a tracker get those paired into a single `Renamed`. A move-out whose pair
/// never shows up is released by [`EventTranslator::flush`] as `MovedOut`.
#[derive(Debug)]
pub struct EventTranslator {
    mode: WatchMode,
    pending_moves: HashMap<usize, PathBuf>,
}

impl EventTranslator {
    pub fn new(mode: WatchMode) -> Self {
        Self {
            mode,
            pending_moves: HashMap::new(),
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_moves.is_empty()
    }

    /// Release unpaired move-outs.
    pub fn flush(&mut self) -> Vec<DirectoryEvent> {
        let mut out: Vec<_> = self
            .pending_moves
            .drain()
            .map(|(_, path)| DirectoryEvent::new(DirectoryEventKind::MovedOut, path))
            .collect();
        out.sort_by(|a, b| a.file.cmp(&b.file));
        out
    }

    pub fn translate(&mut self, event: Event) -> Vec<DirectoryEvent> {
        match self.mode.clone() {
            WatchMode::Directory(dir) => self.translate_directory(&dir, event),
            WatchMode::AwaitDirectory(dir) => translate_await(&dir, event),
        }
    }

    fn translate_directory(&mut self, dir: &Path, event: Event) -> Vec<DirectoryEvent> {
        use DirectoryEventKind as K;

        let tracker = event.attrs.tracker();
        let relevant: Vec<PathBuf> = event
            .paths
            .into_iter()
            .filter(|p| p == dir || p.parent() == Some(dir))
            .collect();
        let each = |kind: K| {
            relevant
                .iter()
                .map(|p| DirectoryEvent::new(kind, p.clone()))
                .collect::<Vec<_>>()
        };

        match event.kind {
            EventKind::Create(_) => {
                let mut out = each(K::Created);
                // Backends without close-write events never send a completion hint.
                if cfg!(not(target_os = "linux")) {
                    out.extend(
                        relevant
                            .iter()
                            .filter(|p| p.as_path() != dir)
                            .map(|p| DirectoryEvent::new(K::ChangesDoneHint, p.clone())),
                    );
                }
                out
            }
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => each(K::ChangesDoneHint),
            EventKind::Remove(_) => each(K::Deleted),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => match (tracker, relevant.first()) {
                (Some(cookie), Some(path)) if path.as_path() != dir => {
                    self.pending_moves.insert(cookie, path.clone());
                    Vec::new()
                }
                _ => each(K::MovedOut),
            },
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let paired = tracker.and_then(|cookie| self.pending_moves.remove(&cookie));
                match (paired, relevant.first()) {
                    (Some(from), Some(to)) => vec![DirectoryEvent::renamed(from, to.clone())],
                    (Some(from), None) => vec![DirectoryEvent::new(K::MovedOut, from)],
                    (None, _) => each(K::MovedIn),
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // Already paired from the From/To halves when a tracker is present.
                if tracker.is_some() {
                    return Vec::new();
                }
                match relevant.as_slice() {
                    [from, to] => vec![DirectoryEvent::renamed(from.clone(), to.clone())],
                    _ => Vec::new(),
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => relevant
                .iter()
                .map(|p| {
                    let kind = if p.exists() { K::MovedIn } else { K::MovedOut };
                    DirectoryEvent::new(kind, p.clone())
                })
                .collect(),
            EventKind::Other if relevant.iter().any(|p| p == dir) => {
                vec![DirectoryEvent::new(K::Unmounted, dir)]
            }
            _ => {
                debug!(kind = ?event.kind, "fs: ignored");
                Vec::new()
            }
        }
    }
}

fn translate_await(dir: &Path, event: Event) -> Vec<DirectoryEvent> {
    let appeared = match event.kind {
        EventKind::Create(_) => event.paths.iter().any(|p| p == dir),
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => {
            event.paths.last().is_some_and(|p| p == dir)
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            event.paths.iter().any(|p| p == dir) && dir.is_dir()
        }
        _ => false,
    };
    if appeared {
        vec![DirectoryEvent::new(DirectoryEventKind::Created, dir)]
    } else {
        Vec::new()
    }
}
