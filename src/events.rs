use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::queue::SortPolicy;

/// Kind of change reported for the slideshow directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryEventKind {
    Created,
    Deleted,
    MovedOut,
    MovedIn,
    Renamed,
    /// The writer closed the file; contents are complete.
    ChangesDoneHint,
    Unmounted,
}

/// One filesystem change. `other_file` carries the destination of a rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEvent {
    pub kind: DirectoryEventKind,
    pub file: PathBuf,
    pub other_file: Option<PathBuf>,
}

impl DirectoryEvent {
    pub fn new(kind: DirectoryEventKind, file: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            file: file.into(),
            other_file: None,
        }
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            kind: DirectoryEventKind::Renamed,
            file: from.into(),
            other_file: Some(to.into()),
        }
    }
}

/// A [`DirectoryEvent`] stamped with the generation of the monitor that saw it.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub generation: u64,
    pub event: DirectoryEvent,
}

/// Observer identifier returned by subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

/// Change notification pushed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideshowChange {
    SlideIndex(Option<usize>),
    QueueLength(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Running,
    Paused,
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideshowStatus {
    pub state: PlaybackState,
    pub slide_index: Option<usize>,
    pub queue_length: usize,
    pub current: Option<PathBuf>,
    /// Time until the armed advance fires, if any.
    pub next_change_in: Option<Duration>,
}

/// Requests accepted by the engine task.
#[derive(Debug)]
pub enum SlideshowCommand {
    Next,
    Previous,
    Pause,
    Resume,
    TogglePause,
    SetDirectory(PathBuf),
    SetSortPolicy(SortPolicy),
    SetSlideDuration(Duration),
    SetUseAbsoluteTime(bool),
    SetReshuffleOnComplete(bool),
    /// Host expects a sleep or shutdown soon; persist timer state only.
    SuspendLikely,
    Subscribe(oneshot::Sender<(ObserverId, mpsc::UnboundedReceiver<SlideshowChange>)>),
    Unsubscribe(ObserverId),
    Status(oneshot::Sender<SlideshowStatus>),
    Shutdown,
}
