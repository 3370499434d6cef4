//! The slideshow engine task.
//!
//! One [`Slideshow`] owns the playlist, the slide timer, the directory monitor
//! and the store. [`run`] serializes commands, watch events and the slide
//! deadline through a single `select!` loop, so no two mutations interleave.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rand::rngs::StdRng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::Error;
use crate::events::{
    DirectoryEvent, DirectoryEventKind, ObserverId, PlaybackState, SlideshowChange,
    SlideshowCommand, SlideshowStatus, WatchEvent,
};
use crate::log::ActivityLog;
use crate::playlist::{Direction, Playlist};
use crate::queue::{SortPolicy, WallpaperEntry};
use crate::scan;
use crate::sinks::{Notification, NotificationAction, Notifier, WallpaperSink, pretty_file_name};
use crate::store::{KeyValueStore, SlideshowStore};
use crate::tasks::monitor::{DirectoryMonitor, WatchMode};
use crate::timer::{Clock, TimerState, format_remaining};

/// What the engine plays and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideshowSettings {
    pub directory: PathBuf,
    pub sort: SortPolicy,
    pub slide_duration: Duration,
    pub use_absolute_time: bool,
    pub reshuffle_on_complete: bool,
}

/// Collaborators handed to the engine at construction.
pub struct SlideshowParts {
    pub store: Box<dyn KeyValueStore>,
    pub sink: Box<dyn WallpaperSink>,
    pub notifier: Box<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub rng: StdRng,
    pub activity: ActivityLog,
}

macro_rules! activity {
    ($self:expr, $($arg:tt)+) => {
        $self.activity.record(format_args!($($arg)+))
    };
}

pub struct Slideshow {
    settings: SlideshowSettings,
    store: SlideshowStore,
    playlist: Playlist,
    timer: TimerState,
    state: PlaybackState,
    deadline: Option<Instant>,
    monitor: Option<DirectoryMonitor>,
    watch_tx: mpsc::Sender<WatchEvent>,
    generation: u64,
    sink: Box<dyn WallpaperSink>,
    notifier: Box<dyn Notifier>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    activity: ActivityLog,
    observers: HashMap<ObserverId, mpsc::UnboundedSender<SlideshowChange>>,
    next_observer: u64,
    published_index: Option<usize>,
    published_len: usize,
}

impl Slideshow {
    /// Build an engine. The returned receiver carries directory-watch events
    /// and must be fed back through [`Slideshow::handle_watch_event`] (which
    /// [`run`] does).
    pub fn new(settings: SlideshowSettings, parts: SlideshowParts) -> (Self, mpsc::Receiver<WatchEvent>) {
        let (watch_tx, watch_rx) = mpsc::channel(128);
        let store = SlideshowStore::new(parts.store);
        let timer = TimerState::new(settings.slide_duration.as_secs(), settings.use_absolute_time);
        let slideshow = Self {
            settings,
            store,
            playlist: Playlist::default(),
            timer,
            state: PlaybackState::Stopped,
            deadline: None,
            monitor: None,
            watch_tx,
            generation: 0,
            sink: parts.sink,
            notifier: parts.notifier,
            clock: parts.clock,
            rng: parts.rng,
            activity: parts.activity,
            observers: HashMap::new(),
            next_observer: 1,
            published_index: None,
            published_len: 0,
        };
        (slideshow, watch_rx)
    }

    pub fn settings(&self) -> &SlideshowSettings {
        &self.settings
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn timer(&self) -> &TimerState {
        &self.timer
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// When the armed advance fires, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> SlideshowStatus {
        SlideshowStatus {
            state: self.state,
            slide_index: self.playlist.index(),
            queue_length: self.playlist.len(),
            current: self
                .playlist
                .current()
                .map(|entry| self.settings.directory.join(&entry.name)),
            next_change_in: self
                .deadline
                .map(|at| at.saturating_duration_since(Instant::now())),
        }
    }

    /// Restore persisted state, fold in settings edited while the engine was
    /// down, then load the queue and start playback.
    pub async fn start(&mut self) {
        let stored = self.store.stored_settings();
        let defaults = TimerState::new(
            self.settings.slide_duration.as_secs(),
            self.settings.use_absolute_time,
        );
        self.timer = self.store.load_timer_state(defaults);

        let directory_changed = stored
            .directory
            .as_ref()
            .is_some_and(|dir| *dir != self.settings.directory);
        let sort_changed = stored.sort.is_some_and(|sort| sort != self.settings.sort);
        if stored
            .reshuffle_on_complete
            .is_some_and(|reshuffle| reshuffle != self.settings.reshuffle_on_complete)
        {
            info!(reshuffle = self.settings.reshuffle_on_complete, "reshuffle-on-complete changed since last run");
        }

        if directory_changed {
            info!(directory = %self.settings.directory.display(), "slideshow directory changed since last run");
            self.forget_queue();
        } else if sort_changed {
            info!(sort = %self.settings.sort, "sort order changed since last run");
            self.playlist = Playlist::default();
        } else {
            self.playlist = Playlist::new(self.store.load_queue(), self.store.load_index());
        }

        let duration_secs = self.settings.slide_duration.as_secs();
        if self.timer.slide_duration_secs != duration_secs
            || self.timer.use_absolute_time != self.settings.use_absolute_time
        {
            self.timer.slide_duration_secs = duration_secs;
            self.timer.use_absolute_time = self.settings.use_absolute_time;
            self.timer.restart_slide(self.clock.now_ms());
        }
        self.store.save_timer_state(&self.timer);
        self.store.save_directory(&self.settings.directory);
        self.store.save_sort(self.settings.sort);
        self.store.save_reshuffle(self.settings.reshuffle_on_complete);

        self.load_queue().await;
    }

    /// List the directory and bring the playlist up to date with it. A fresh
    /// (empty) playlist is built and sorted; an existing one is reconciled.
    async fn load_queue(&mut self) {
        let directory = self.settings.directory.clone();
        if let Err(err) = scan::check_directory(&directory) {
            self.directory_missing(err);
            return;
        }
        let listing = match scan::list_wallpapers(directory.clone()).await {
            Ok(listing) => listing,
            Err(err) => {
                warn!(directory = %directory.display(), error = %err, "failed to list slideshow directory");
                self.directory_missing(err);
                return;
            }
        };

        if self.playlist.is_empty() {
            self.fresh_order(listing, None);
        } else {
            let report = self.playlist.reconcile(listing, self.settings.sort, &mut self.rng);
            if !report.is_empty() {
                activity!(self, "reconciled queue: {} added, {} removed", report.added.len(), report.removed.len());
            }
        }

        if self.playlist.is_empty() {
            self.sync_playlist();
            self.directory_empty();
            return;
        }
        self.initiate();
    }

    /// Replace the playlist with `entries` in policy order, starting at 0.
    /// Under `Random`, a first entry equal to `previous` is moved to the back.
    fn fresh_order(&mut self, entries: Vec<WallpaperEntry>, previous: Option<&str>) {
        let mut playlist = Playlist::new(entries, None);
        playlist.sort(self.settings.sort, &mut self.rng);
        if self.settings.sort.is_random()
            && playlist.len() > 1
            && previous.is_some_and(|prev| playlist.entries()[0].name == prev)
        {
            playlist.rotate_front_to_back();
        }
        playlist.set_index(Some(0));
        self.playlist = playlist;
        activity!(self, "built {} queue with {} wallpapers", self.settings.sort, self.playlist.len());
    }

    /// Arm the monitor, put the current slide up and schedule the next one.
    pub fn initiate(&mut self) {
        if !self.watching_directory() {
            self.arm_monitor(WatchMode::Directory(self.settings.directory.clone()));
        }
        if self.playlist.index().is_none() {
            self.playlist.set_index(Some(0));
        }

        let same_slide = match (self.playlist.current(), self.store.current_wallpaper()) {
            (Some(entry), Some(stored)) => entry.name == stored,
            _ => false,
        };
        if !same_slide {
            self.timer.restart_slide(self.clock.now_ms());
        }
        self.apply_current();
        self.sync_playlist();

        if self.store.paused() {
            self.state = PlaybackState::Paused;
            self.deadline = None;
            self.store.save_timer_state(&self.timer);
            info!("slideshow started paused");
        } else {
            self.state = PlaybackState::Running;
            self.arm_timer();
            info!(
                queue = self.playlist.len(),
                index = ?self.playlist.index(),
                "slideshow running"
            );
        }
    }

    /// Move one slide in `direction` and show it. Playback state is unchanged.
    pub fn advance(&mut self, direction: Direction) {
        if self.playlist.is_empty() {
            debug!(?direction, "advance ignored; queue is empty");
            return;
        }
        self.deadline = None;
        let previous = self.playlist.current().map(|e| e.name.clone());
        let wrapped = self.playlist.step(direction);
        if wrapped && self.settings.reshuffle_on_complete && self.settings.sort.is_random() {
            let entries = self.playlist.entries().to_vec();
            self.fresh_order(entries, previous.as_deref());
            activity!(self, "queue complete; reshuffled");
        }
        self.show_current();
    }

    /// Put up the slide under the index with a full time budget.
    fn show_current(&mut self) {
        self.deadline = None;
        self.apply_current();
        self.timer.restart_slide(self.clock.now_ms());
        self.store.save_timer_state(&self.timer);
        self.sync_playlist();
        if self.state == PlaybackState::Running {
            self.arm_timer();
        }
    }

    pub fn pause(&mut self) {
        match self.state {
            PlaybackState::Running => {
                self.save_timer(true);
                self.deadline = None;
                self.state = PlaybackState::Paused;
                self.store.set_paused(true);
                let slide = pretty_file_name(self.current_name().as_deref());
                self.notifier
                    .notify(Notification::new("Slideshow paused", format!("Paused on slide {slide}")));
                activity!(self, "paused with {}s remaining", self.timer.timer_remaining_secs);
            }
            PlaybackState::Stopped => self.store.set_paused(true),
            PlaybackState::Paused => {}
        }
    }

    pub fn resume(&mut self) {
        match self.state {
            PlaybackState::Paused => {
                self.state = PlaybackState::Running;
                self.store.set_paused(false);
                self.apply_current();
                let delay = self.arm_timer();
                self.notifier.notify(Notification::new(
                    "Slideshow resumed",
                    format!("Next wallpaper in {}", format_remaining(delay)),
                ));
            }
            PlaybackState::Stopped => self.store.set_paused(false),
            PlaybackState::Running => {}
        }
    }

    pub fn toggle_pause(&mut self) {
        let paused = match self.state {
            PlaybackState::Stopped => self.store.paused(),
            state => state == PlaybackState::Paused,
        };
        if paused { self.resume() } else { self.pause() }
    }

    /// Scheduled advance. An empty playlist triggers a rebuild instead.
    pub async fn on_timer_fired(&mut self) {
        self.deadline = None;
        if self.state != PlaybackState::Running {
            return;
        }
        if !self.playlist.is_empty() {
            self.advance(Direction::Next);
            return;
        }

        let previous = self.store.current_wallpaper();
        let listing = match scan::list_wallpapers(self.settings.directory.clone()).await {
            Ok(listing) => listing,
            Err(err) => {
                self.directory_missing(err);
                return;
            }
        };
        self.fresh_order(listing, previous.as_deref());
        if self.playlist.is_empty() {
            self.sync_playlist();
            self.directory_empty();
            return;
        }
        self.show_current();
    }

    /// Fold elapsed time into the remaining budget and persist it. Skipped
    /// while nothing is playing unless `force` is set.
    pub fn save_timer(&mut self, force: bool) {
        if self.state != PlaybackState::Running && !force {
            return;
        }
        self.timer.snapshot(self.clock.now_ms());
        self.store.save_timer_state(&self.timer);
    }

    pub fn on_suspend_likely(&mut self) {
        self.save_timer(false);
        debug!(remaining = self.timer.timer_remaining_secs, "timer saved ahead of suspend");
    }

    /// Persist the timer and release the deadline, monitor and observers.
    pub fn shutdown(&mut self) {
        self.save_timer(false);
        self.deadline = None;
        self.monitor = None;
        self.observers.clear();
        info!("slideshow shut down");
    }

    /// Tear down, clear the queue and rediscover the directory. The timer and
    /// the current wallpaper survive so an unchanged slide keeps its budget.
    pub async fn restart(&mut self) {
        info!(directory = %self.settings.directory.display(), "restarting slideshow");
        self.deadline = None;
        self.monitor = None;
        self.state = PlaybackState::Stopped;
        self.playlist = Playlist::default();
        self.sync_playlist();
        self.load_queue().await;
    }

    /// Start over from an empty queue, as for a new directory.
    pub async fn reset(&mut self) {
        self.forget_queue();
        self.restart().await;
    }

    fn forget_queue(&mut self) {
        self.playlist = Playlist::default();
        self.timer.reset();
        self.store.save_queue(&[]);
        self.store.save_index(None);
        self.store.set_current_wallpaper("");
        self.store.save_timer_state(&self.timer);
    }

    pub async fn set_directory(&mut self, directory: PathBuf) {
        if directory == self.settings.directory {
            return;
        }
        info!(directory = %directory.display(), "slideshow directory changed");
        self.settings.directory = directory;
        self.store.save_directory(&self.settings.directory);
        self.reset().await;
    }

    /// Reorder the queue under `sort`, keeping the current slide on screen.
    pub fn set_sort_policy(&mut self, sort: SortPolicy) {
        if sort == self.settings.sort {
            return;
        }
        self.settings.sort = sort;
        self.store.save_sort(sort);
        let current = self.playlist.current().map(|e| e.name.clone());
        self.playlist.sort(sort, &mut self.rng);
        let index = current.and_then(|name| self.playlist.position(&name));
        self.playlist.set_index(index.or(Some(0)));
        activity!(self, "queue re-sorted as {sort}");
        self.sync_playlist();
    }

    pub fn set_slide_duration(&mut self, duration: Duration) {
        self.settings.slide_duration = duration;
        self.timer.slide_duration_secs = duration.as_secs();
        self.timing_changed();
    }

    pub fn set_use_absolute_time(&mut self, enabled: bool) {
        self.settings.use_absolute_time = enabled;
        self.timer.use_absolute_time = enabled;
        self.timing_changed();
    }

    fn timing_changed(&mut self) {
        self.timer.restart_slide(self.clock.now_ms());
        self.store.save_timer_state(&self.timer);
        if self.state == PlaybackState::Running {
            self.arm_timer();
        }
        activity!(
            self,
            "slide duration {}s, absolute time {}",
            self.timer.slide_duration(),
            self.timer.use_absolute_time
        );
    }

    pub fn set_reshuffle_on_complete(&mut self, enabled: bool) {
        self.settings.reshuffle_on_complete = enabled;
        self.store.save_reshuffle(enabled);
    }

    pub fn subscribe(&mut self) -> (ObserverId, mpsc::UnboundedReceiver<SlideshowChange>) {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) {
        self.observers.remove(&id);
    }

    /// Apply one filesystem change. Events from a replaced monitor are dropped.
    pub async fn handle_watch_event(&mut self, watch: WatchEvent) {
        if watch.generation != self.generation {
            debug!(generation = watch.generation, current = self.generation, "stale watch event ignored");
            return;
        }
        let DirectoryEvent { kind, file, other_file } = watch.event;
        let is_root = file == self.settings.directory;

        match kind {
            DirectoryEventKind::Created if is_root => {
                if self.awaiting_directory() {
                    info!(directory = %file.display(), "slideshow directory appeared");
                    self.restart().await;
                }
            }
            DirectoryEventKind::Created => activity!(self, "created: {}", file.display()),
            DirectoryEventKind::Deleted | DirectoryEventKind::MovedOut if is_root => {
                warn!(directory = %file.display(), "slideshow directory went away");
                self.restart().await;
            }
            DirectoryEventKind::Deleted | DirectoryEventKind::MovedOut => self.remove_file(&file),
            DirectoryEventKind::ChangesDoneHint | DirectoryEventKind::MovedIn if is_root => {
                if self.awaiting_directory() {
                    self.restart().await;
                }
            }
            DirectoryEventKind::ChangesDoneHint | DirectoryEventKind::MovedIn => self.add_file(file).await,
            DirectoryEventKind::Renamed => self.rename_file(file, other_file).await,
            DirectoryEventKind::Unmounted => {
                warn!(directory = %file.display(), "slideshow directory unmounted");
                self.restart().await;
            }
        }
    }

    fn remove_file(&mut self, path: &Path) {
        let Some(name) = file_name(path) else {
            return;
        };
        let was_current = self.current_name().as_deref() == Some(name.as_str());
        if self.playlist.remove(&name).is_none() {
            activity!(self, "removed file was not queued: {name}");
            return;
        }
        activity!(self, "removed from queue: {name}");

        if self.playlist.is_empty() {
            self.sync_playlist();
            self.directory_empty();
        } else if was_current {
            self.show_current();
        } else {
            self.sync_playlist();
        }
    }

    async fn add_file(&mut self, path: PathBuf) {
        let Some(name) = file_name(&path) else {
            return;
        };
        let probe = match scan::probe(path.clone()).await {
            Ok(probe) => probe,
            Err(err) => {
                debug!(error = %err, "skipping file that could not be read");
                return;
            }
        };
        if !probe.is_image {
            activity!(self, "skipped: {}", Error::InvalidImage(path));
            return;
        }

        let at = self
            .playlist
            .insert(WallpaperEntry::new(name.clone(), probe.date), self.settings.sort, &mut self.rng);
        activity!(self, "queued {name} at {at}");
        self.after_insert();
    }

    async fn rename_file(&mut self, from: PathBuf, to: Option<PathBuf>) {
        let Some(old) = file_name(&from) else {
            return;
        };
        let mut incoming = None;
        if let Some(to) = to {
            if let Some(new) = file_name(&to) {
                match scan::probe(to.clone()).await {
                    Ok(probe) if probe.is_image => incoming = Some(WallpaperEntry::new(new, probe.date)),
                    Ok(_) => activity!(self, "renamed away from the queue: {}", Error::InvalidImage(to)),
                    Err(err) => debug!(error = %err, "rename target could not be read"),
                }
            }
        }

        // Positions are looked up only after the probe has completed.
        let current = self.current_name();
        let old_at = self.playlist.position(&old);
        let touches_current = current.is_some()
            && (current.as_deref() == Some(old.as_str())
                || incoming.as_ref().map(|e| e.name.as_str()) == current.as_deref());
        let mut removed_current = false;

        match (old_at, incoming) {
            (Some(at), Some(entry)) if self.settings.sort.is_random() => {
                activity!(self, "renamed in place: {old} -> {}", entry.name);
                self.playlist.replace_at(at, entry);
            }
            (Some(_), Some(entry)) => {
                activity!(self, "renamed: {old} -> {}", entry.name);
                removed_current = current.as_deref() == Some(old.as_str());
                self.playlist.remove(&old);
                self.playlist.insert(entry, self.settings.sort, &mut self.rng);
            }
            (Some(_), None) => {
                activity!(self, "renamed away: {old}");
                removed_current = current.as_deref() == Some(old.as_str());
                self.playlist.remove(&old);
            }
            (None, Some(entry)) => {
                activity!(self, "renamed into queue: {}", entry.name);
                self.playlist.insert(entry, self.settings.sort, &mut self.rng);
                if self.after_insert_started() {
                    return;
                }
            }
            (None, None) => {
                activity!(self, "rename ignored: {old}");
                return;
            }
        }

        if self.playlist.is_empty() {
            self.sync_playlist();
            self.directory_empty();
        } else if removed_current {
            self.show_current();
        } else if touches_current {
            self.advance(Direction::Next);
        } else {
            self.sync_playlist();
        }
    }

    fn after_insert(&mut self) {
        if !self.after_insert_started() {
            self.sync_playlist();
        }
    }

    /// Start playback if this insert ended an empty-directory wait.
    fn after_insert_started(&mut self) -> bool {
        if self.state == PlaybackState::Stopped && !self.awaiting_directory() {
            info!("first wallpaper arrived; starting slideshow");
            self.initiate();
            return true;
        }
        false
    }

    fn directory_missing(&mut self, err: Error) {
        warn!(error = %err, "slideshow directory unavailable");
        self.state = PlaybackState::Stopped;
        self.deadline = None;
        self.notifier.notify(
            Notification::new("Slideshow directory not found", err.to_string())
                .with_action(NotificationAction::OpenSettings),
        );
        self.arm_monitor(WatchMode::AwaitDirectory(self.settings.directory.clone()));
    }

    fn directory_empty(&mut self) {
        let err = Error::DirectoryEmpty(self.settings.directory.clone());
        warn!(error = %err, "waiting for wallpapers");
        self.state = PlaybackState::Stopped;
        self.deadline = None;
        self.notifier
            .notify(Notification::new("Slideshow directory is empty", err.to_string()));
        if !self.watching_directory() {
            self.arm_monitor(WatchMode::Directory(self.settings.directory.clone()));
        }
    }

    /// Replace the monitor; events from the old one become stale.
    fn arm_monitor(&mut self, mode: WatchMode) {
        self.monitor = None;
        self.generation += 1;
        match DirectoryMonitor::start(mode.clone(), self.generation, self.watch_tx.clone()) {
            Ok(monitor) => self.monitor = Some(monitor),
            Err(err) => warn!(target = %mode.target().display(), error = %err, "failed to watch"),
        }
    }

    fn watching_directory(&self) -> bool {
        self.monitor
            .as_ref()
            .is_some_and(|m| matches!(m.mode(), WatchMode::Directory(_)))
    }

    fn awaiting_directory(&self) -> bool {
        self.monitor
            .as_ref()
            .is_some_and(|m| matches!(m.mode(), WatchMode::AwaitDirectory(_)))
    }

    /// Compute the delay for the current slide, start its segment now and
    /// set the deadline. Returns the delay in seconds.
    fn arm_timer(&mut self) -> u64 {
        let now = self.clock.now_ms();
        let delay = self.timer.next_delay(now);
        self.timer.mark_start(now);
        self.store.save_timer_state(&self.timer);
        self.deadline = Some(Instant::now() + Duration::from_secs(delay));
        debug!(delay_secs = delay, "next slide armed");
        delay
    }

    fn apply_current(&mut self) {
        let Some(name) = self.current_name() else {
            return;
        };
        let path = self.settings.directory.join(&name);
        if let Err(err) = self.sink.apply(&path) {
            warn!(path = %path.display(), error = %format!("{err:#}"), "failed to set wallpaper");
        }
        self.store.set_current_wallpaper(&name);
        activity!(self, "showing {}", pretty_file_name(Some(&name)));
    }

    fn current_name(&self) -> Option<String> {
        self.playlist.current().map(|e| e.name.clone())
    }

    /// Persist queue and index, then tell observers what changed.
    fn sync_playlist(&mut self) {
        self.store.save_queue(self.playlist.entries());
        self.store.save_index(self.playlist.index());

        let mut changes = Vec::new();
        if self.playlist.index() != self.published_index {
            self.published_index = self.playlist.index();
            changes.push(SlideshowChange::SlideIndex(self.published_index));
        }
        if self.playlist.len() != self.published_len {
            self.published_len = self.playlist.len();
            changes.push(SlideshowChange::QueueLength(self.published_len));
        }
        if changes.is_empty() {
            return;
        }
        self.observers
            .retain(|_, tx| changes.iter().all(|change| tx.send(*change).is_ok()));
    }

    /// Dispatch one command. `Shutdown` is handled by [`run`].
    pub async fn handle_command(&mut self, command: SlideshowCommand) {
        match command {
            SlideshowCommand::Next => self.advance(Direction::Next),
            SlideshowCommand::Previous => self.advance(Direction::Previous),
            SlideshowCommand::Pause => self.pause(),
            SlideshowCommand::Resume => self.resume(),
            SlideshowCommand::TogglePause => self.toggle_pause(),
            SlideshowCommand::SetDirectory(dir) => self.set_directory(dir).await,
            SlideshowCommand::SetSortPolicy(sort) => self.set_sort_policy(sort),
            SlideshowCommand::SetSlideDuration(duration) => self.set_slide_duration(duration),
            SlideshowCommand::SetUseAbsoluteTime(enabled) => self.set_use_absolute_time(enabled),
            SlideshowCommand::SetReshuffleOnComplete(enabled) => self.set_reshuffle_on_complete(enabled),
            SlideshowCommand::SuspendLikely => self.on_suspend_likely(),
            SlideshowCommand::Subscribe(reply) => {
                let subscription = self.subscribe();
                let _ = reply.send(subscription);
            }
            SlideshowCommand::Unsubscribe(id) => self.unsubscribe(id),
            SlideshowCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            SlideshowCommand::Shutdown => self.shutdown(),
        }
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
}

/// Drive `slideshow` until cancelled or told to shut down.
#[instrument(skip_all, fields(directory = %slideshow.settings().directory.display()))]
pub async fn run(
    mut slideshow: Slideshow,
    mut commands: mpsc::Receiver<SlideshowCommand>,
    mut watch_rx: mpsc::Receiver<WatchEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    slideshow.start().await;

    loop {
        let deadline = slideshow.deadline();
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; stopping slideshow");
                break;
            }
            command = commands.recv() => match command {
                Some(SlideshowCommand::Shutdown) | None => break,
                Some(command) => slideshow.handle_command(command).await,
            },
            Some(event) = watch_rx.recv() => slideshow.handle_watch_event(event).await,
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                slideshow.on_timer_fired().await;
            }
        }
    }

    slideshow.shutdown();
    Ok(())
}

/// Spawn [`run`] on the current runtime.
pub fn spawn(
    slideshow: Slideshow,
    watch_rx: mpsc::Receiver<WatchEvent>,
    cancel: CancellationToken,
) -> (SlideshowHandle, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::channel(32);
    let task = tokio::spawn(run(slideshow, rx, watch_rx, cancel));
    (SlideshowHandle { tx }, task)
}

/// Cloneable front end to a running engine.
#[derive(Debug, Clone)]
pub struct SlideshowHandle {
    tx: mpsc::Sender<SlideshowCommand>,
}

impl SlideshowHandle {
    pub fn new(tx: mpsc::Sender<SlideshowCommand>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, command: SlideshowCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| anyhow!("slideshow task has stopped"))
    }

    pub async fn next(&self) -> Result<()> {
        self.send(SlideshowCommand::Next).await
    }

    pub async fn previous(&self) -> Result<()> {
        self.send(SlideshowCommand::Previous).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(SlideshowCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(SlideshowCommand::Resume).await
    }

    pub async fn toggle_pause(&self) -> Result<()> {
        self.send(SlideshowCommand::TogglePause).await
    }

    pub async fn suspend_likely(&self) -> Result<()> {
        self.send(SlideshowCommand::SuspendLikely).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SlideshowCommand::Shutdown).await
    }

    pub async fn subscribe(&self) -> Result<(ObserverId, mpsc::UnboundedReceiver<SlideshowChange>)> {
        let (reply, rx) = oneshot::channel();
        self.send(SlideshowCommand::Subscribe(reply)).await?;
        rx.await.context("slideshow dropped subscribe request")
    }

    pub async fn unsubscribe(&self, id: ObserverId) -> Result<()> {
        self.send(SlideshowCommand::Unsubscribe(id)).await
    }

    pub async fn status(&self) -> Result<SlideshowStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(SlideshowCommand::Status(reply)).await?;
        rx.await.context("slideshow dropped status request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::timer::ManualClock;
    use rand::SeedableRng;
    use std::fs;
    use std::sync::Mutex;

    const T0: u64 = 1_700_000_000_000;

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<PathBuf>>>);

    impl WallpaperSink for RecordingSink {
        fn apply(&mut self, path: &Path) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    impl RecordingSink {
        fn last_name(&self) -> Option<String> {
            self.0
                .lock()
                .unwrap()
                .last()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
        }

        fn count(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier(Arc<Mutex<Vec<Notification>>>);

    impl Notifier for RecordingNotifier {
        fn notify(&mut self, notification: Notification) {
            self.0.lock().unwrap().push(notification);
        }
    }

    impl RecordingNotifier {
        fn titles(&self) -> Vec<String> {
            self.0.lock().unwrap().iter().map(|n| n.title.clone()).collect()
        }
    }

    struct Harness {
        slideshow: Slideshow,
        _watch_rx: mpsc::Receiver<WatchEvent>,
        sink: RecordingSink,
        notifier: RecordingNotifier,
        clock: ManualClock,
        store: MemoryStore,
        dir: tempfile::TempDir,
    }

    fn settings(dir: &Path, sort: SortPolicy) -> SlideshowSettings {
        SlideshowSettings {
            directory: dir.to_path_buf(),
            sort,
            slide_duration: Duration::from_secs(60),
            use_absolute_time: false,
            reshuffle_on_complete: false,
        }
    }

    fn harness_with(files: &[&str], sort: SortPolicy, store: MemoryStore) -> Harness {
        harness_in(tempfile::tempdir().unwrap(), files, sort, store)
    }

    fn harness_in(dir: tempfile::TempDir, files: &[&str], sort: SortPolicy, store: MemoryStore) -> Harness {
        for name in files {
            fs::write(dir.path().join(name), b"img").unwrap();
        }
        let sink = RecordingSink::default();
        let notifier = RecordingNotifier::default();
        let clock = ManualClock::starting_at(T0);
        let parts = SlideshowParts {
            store: Box::new(store.clone()),
            sink: Box::new(sink.clone()),
            notifier: Box::new(notifier.clone()),
            clock: Arc::new(clock.clone()),
            rng: StdRng::seed_from_u64(7),
            activity: ActivityLog::disabled(),
        };
        let (slideshow, watch_rx) = Slideshow::new(settings(dir.path(), sort), parts);
        Harness {
            slideshow,
            _watch_rx: watch_rx,
            sink,
            notifier,
            clock,
            store,
            dir,
        }
    }

    fn harness(files: &[&str], sort: SortPolicy) -> Harness {
        harness_with(files, sort, MemoryStore::new())
    }

    impl Harness {
        fn event(&self, kind: DirectoryEventKind, name: &str) -> WatchEvent {
            WatchEvent {
                generation: self.slideshow.generation(),
                event: DirectoryEvent::new(kind, self.dir.path().join(name)),
            }
        }

        fn rename(&self, from: &str, to: &str) -> WatchEvent {
            WatchEvent {
                generation: self.slideshow.generation(),
                event: DirectoryEvent::renamed(self.dir.path().join(from), self.dir.path().join(to)),
            }
        }

        fn names(&self) -> Vec<String> {
            self.slideshow
                .playlist()
                .entries()
                .iter()
                .map(|e| e.name.clone())
                .collect()
        }

        fn current(&self) -> Option<String> {
            self.slideshow.playlist().current().map(|e| e.name.clone())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_builds_sorted_queue_and_shows_first() {
        let mut h = harness(&["img10.jpg", "img2.jpg", "notes.txt", ".hidden.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;

        assert_eq!(h.names(), ["img2.jpg", "img10.jpg"]);
        assert_eq!(h.slideshow.state(), PlaybackState::Running);
        assert_eq!(h.sink.last_name().as_deref(), Some("img2.jpg"));
        let wait = h.slideshow.status().next_change_in.unwrap();
        assert!(wait <= Duration::from_secs(60) && wait > Duration::from_secs(55));

        let persisted = SlideshowStore::new(Box::new(h.store.clone()));
        assert_eq!(persisted.load_queue().len(), 2);
        assert_eq!(persisted.load_index(), Some(0));
        assert_eq!(persisted.current_wallpaper().as_deref(), Some("img2.jpg"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn next_and_previous_wrap() {
        let mut h = harness(&["a.jpg", "b.jpg", "c.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;

        h.slideshow.advance(Direction::Previous);
        assert_eq!(h.current().as_deref(), Some("c.jpg"));
        h.slideshow.advance(Direction::Next);
        assert_eq!(h.current().as_deref(), Some("a.jpg"));
        assert_eq!(h.sink.last_name().as_deref(), Some("a.jpg"));
        assert_eq!(h.slideshow.state(), PlaybackState::Running);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn removing_earlier_entry_shifts_index() {
        let mut h = harness(&["a.jpg", "b.jpg", "c.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;
        h.slideshow.advance(Direction::Next);
        let applied = h.sink.count();

        let ev = h.event(DirectoryEventKind::Deleted, "a.jpg");
        h.slideshow.handle_watch_event(ev).await;

        assert_eq!(h.names(), ["b.jpg", "c.jpg"]);
        assert_eq!(h.slideshow.playlist().index(), Some(0));
        assert_eq!(h.current().as_deref(), Some("b.jpg"));
        assert_eq!(h.sink.count(), applied, "current slide must not be re-applied");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn removing_current_shows_successor_immediately() {
        let mut h = harness(&["a.jpg", "b.jpg", "c.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;

        let ev = h.event(DirectoryEventKind::MovedOut, "a.jpg");
        h.slideshow.handle_watch_event(ev).await;

        assert_eq!(h.current().as_deref(), Some("b.jpg"));
        assert_eq!(h.sink.last_name().as_deref(), Some("b.jpg"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn new_file_is_inserted_in_order() {
        let mut h = harness(&["a.jpg", "c.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;
        h.slideshow.advance(Direction::Next);

        fs::write(h.dir.path().join("b.jpg"), b"img").unwrap();
        let ev = h.event(DirectoryEventKind::ChangesDoneHint, "b.jpg");
        h.slideshow.handle_watch_event(ev).await;

        assert_eq!(h.names(), ["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(h.current().as_deref(), Some("c.jpg"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn repeated_completion_hints_do_not_duplicate() {
        let mut h = harness(&["a.jpg"], SortPolicy::Random);
        h.slideshow.start().await;

        fs::write(h.dir.path().join("b.jpg"), b"img").unwrap();
        for _ in 0..3 {
            let ev = h.event(DirectoryEventKind::ChangesDoneHint, "b.jpg");
            h.slideshow.handle_watch_event(ev).await;
        }
        let ev = h.event(DirectoryEventKind::MovedIn, "a.jpg");
        h.slideshow.handle_watch_event(ev).await;

        let mut names = h.names();
        names.sort();
        assert_eq!(names, ["a.jpg", "b.jpg"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn non_images_are_skipped() {
        let mut h = harness(&["a.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;

        fs::write(h.dir.path().join("readme.txt"), b"text").unwrap();
        let ev = h.event(DirectoryEventKind::ChangesDoneHint, "readme.txt");
        h.slideshow.handle_watch_event(ev).await;
        let ev = h.event(DirectoryEventKind::MovedIn, "never-existed.jpg");
        h.slideshow.handle_watch_event(ev).await;

        assert_eq!(h.names(), ["a.jpg"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rename_to_non_image_drops_entry() {
        let mut h = harness(&["a.jpg", "b.jpg", "c.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;

        fs::rename(h.dir.path().join("c.jpg"), h.dir.path().join("c.txt")).unwrap();
        let ev = h.rename("c.jpg", "c.txt");
        h.slideshow.handle_watch_event(ev).await;

        assert_eq!(h.names(), ["a.jpg", "b.jpg"]);
        assert_eq!(h.current().as_deref(), Some("a.jpg"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rename_under_random_replaces_in_place() {
        let mut h = harness(&["a.jpg", "b.jpg", "c.jpg"], SortPolicy::Random);
        h.slideshow.start().await;
        let before = h.names();
        let current = h.current().unwrap();
        let victim = before.iter().find(|n| **n != current).unwrap().clone();
        let at = before.iter().position(|n| *n == victim).unwrap();

        fs::rename(h.dir.path().join(&victim), h.dir.path().join("z.jpg")).unwrap();
        let ev = h.rename(&victim, "z.jpg");
        h.slideshow.handle_watch_event(ev).await;

        assert_eq!(h.names()[at], "z.jpg");
        assert_eq!(h.names().len(), 3);
        assert_eq!(h.current(), Some(current));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn renaming_current_under_ordered_policy_moves_on() {
        let mut h = harness(&["a.jpg", "b.jpg", "c.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;

        fs::rename(h.dir.path().join("a.jpg"), h.dir.path().join("d.jpg")).unwrap();
        let ev = h.rename("a.jpg", "d.jpg");
        h.slideshow.handle_watch_event(ev).await;

        assert_eq!(h.names(), ["b.jpg", "c.jpg", "d.jpg"]);
        assert_eq!(h.current().as_deref(), Some("b.jpg"));
        assert_eq!(h.sink.last_name().as_deref(), Some("b.jpg"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_generation_events_are_ignored() {
        let mut h = harness(&["a.jpg", "b.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;

        let mut ev = h.event(DirectoryEventKind::Deleted, "b.jpg");
        ev.generation = h.slideshow.generation().wrapping_sub(1);
        h.slideshow.handle_watch_event(ev).await;
        assert_eq!(h.names(), ["a.jpg", "b.jpg"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_directory_waits_for_first_image() {
        let mut h = harness(&[], SortPolicy::AZ);
        h.slideshow.start().await;
        assert_eq!(h.slideshow.state(), PlaybackState::Stopped);
        assert_eq!(h.notifier.titles(), ["Slideshow directory is empty"]);

        fs::write(h.dir.path().join("first.jpg"), b"img").unwrap();
        let ev = h.event(DirectoryEventKind::ChangesDoneHint, "first.jpg");
        h.slideshow.handle_watch_event(ev).await;

        assert_eq!(h.slideshow.state(), PlaybackState::Running);
        assert_eq!(h.sink.last_name().as_deref(), Some("first.jpg"));
        assert!(h.slideshow.deadline().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_directory_notifies_and_recovers() {
        let mut h = harness(&[], SortPolicy::AZ);
        let missing = h.dir.path().join("later");
        h.slideshow.set_directory(missing.clone()).await;

        assert_eq!(h.slideshow.state(), PlaybackState::Stopped);
        let notes = h.notifier.0.lock().unwrap().clone();
        let last = notes.last().unwrap();
        assert_eq!(last.title, "Slideshow directory not found");
        assert_eq!(last.action, Some(NotificationAction::OpenSettings));

        fs::create_dir(&missing).unwrap();
        fs::write(missing.join("x.png"), b"img").unwrap();
        let ev = WatchEvent {
            generation: h.slideshow.generation(),
            event: DirectoryEvent::new(DirectoryEventKind::Created, missing.clone()),
        };
        h.slideshow.handle_watch_event(ev).await;

        assert_eq!(h.slideshow.state(), PlaybackState::Running);
        assert_eq!(h.current().as_deref(), Some("x.png"));
    }

    impl Harness {
        fn root_event(&self, kind: DirectoryEventKind) -> WatchEvent {
            WatchEvent {
                generation: self.slideshow.generation(),
                event: DirectoryEvent::new(kind, self.dir.path().to_path_buf()),
            }
        }

        fn persisted(&self) -> SlideshowStore {
            SlideshowStore::new(Box::new(self.store.clone()))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unmounted_directory_clears_queue_until_it_returns() {
        let mut h = harness(&["a.jpg", "b.jpg", "c.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;
        h.slideshow.advance(Direction::Next);
        assert_eq!(h.current().as_deref(), Some("b.jpg"));

        fs::remove_dir_all(h.dir.path()).unwrap();
        let ev = h.root_event(DirectoryEventKind::Unmounted);
        h.slideshow.handle_watch_event(ev).await;

        assert_eq!(h.slideshow.state(), PlaybackState::Stopped);
        assert!(h.slideshow.playlist().is_empty());
        assert_eq!(h.slideshow.playlist().index(), None);
        assert!(h.slideshow.deadline().is_none());
        let stored = h.persisted();
        assert!(stored.load_queue().is_empty());
        assert_eq!(stored.load_index(), None);
        assert_eq!(h.store.get(crate::store::KEY_SLIDE_INDEX), Some(serde_json::Value::from(-1)));
        assert_eq!(stored.current_wallpaper().as_deref(), Some("b.jpg"));
        assert_eq!(h.notifier.titles().last().map(String::as_str), Some("Slideshow directory not found"));
        let status = h.slideshow.status();
        assert_eq!((status.queue_length, status.slide_index), (0, None));

        fs::create_dir(h.dir.path()).unwrap();
        for name in ["d.jpg", "c.jpg"] {
            fs::write(h.dir.path().join(name), b"img").unwrap();
        }
        let ev = h.root_event(DirectoryEventKind::Created);
        h.slideshow.handle_watch_event(ev).await;

        assert_eq!(h.slideshow.state(), PlaybackState::Running);
        assert_eq!(h.names(), ["c.jpg", "d.jpg"]);
        assert_eq!(h.current().as_deref(), Some("c.jpg"));
        assert_eq!(h.persisted().load_index(), Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deleted_directory_tells_observers_the_queue_is_gone() {
        let mut h = harness(&["a.jpg", "b.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;
        h.slideshow.advance(Direction::Next);
        let (_id, mut rx) = h.slideshow.subscribe();

        fs::remove_dir_all(h.dir.path()).unwrap();
        let ev = h.root_event(DirectoryEventKind::Deleted);
        h.slideshow.handle_watch_event(ev).await;

        assert_eq!(rx.recv().await, Some(SlideshowChange::SlideIndex(None)));
        assert_eq!(rx.recv().await, Some(SlideshowChange::QueueLength(0)));
        assert!(h.persisted().load_queue().is_empty());
        assert_eq!(h.slideshow.state(), PlaybackState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_reconciles_saved_queue_with_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        {
            let mut saved = SlideshowStore::new(Box::new(store.clone()));
            saved.save_directory(dir.path());
            saved.save_sort(SortPolicy::AZ);
            saved.save_queue(&[
                WallpaperEntry::new("a.jpg", 1),
                WallpaperEntry::new("b.jpg", 2),
                WallpaperEntry::new("c.jpg", 3),
            ]);
            saved.save_index(Some(1));
            saved.set_current_wallpaper("b.jpg");
        }

        let mut h = harness_in(dir, &["b.jpg", "c.jpg", "d.jpg"], SortPolicy::AZ, store);
        h.slideshow.start().await;

        assert_eq!(h.names(), ["b.jpg", "c.jpg", "d.jpg"]);
        assert_eq!(h.current().as_deref(), Some("b.jpg"));
        assert_eq!(h.slideshow.state(), PlaybackState::Running);
        let stored = h.persisted();
        let names: Vec<String> = stored.load_queue().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["b.jpg", "c.jpg", "d.jpg"]);
        assert_eq!(stored.load_index(), Some(0));
        assert_eq!(stored.current_wallpaper().as_deref(), Some("b.jpg"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn advance_works_while_directory_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        {
            let mut saved = SlideshowStore::new(Box::new(store.clone()));
            saved.save_directory(dir.path());
            saved.save_sort(SortPolicy::AZ);
            saved.save_queue(&[WallpaperEntry::new("a.jpg", 1), WallpaperEntry::new("b.jpg", 2)]);
            saved.save_index(Some(0));
        }
        let mut h = harness_in(dir, &[], SortPolicy::AZ, store);
        fs::remove_dir_all(h.dir.path()).unwrap();
        h.slideshow.start().await;
        assert_eq!(h.slideshow.state(), PlaybackState::Stopped);
        assert_eq!(h.names().len(), 2);

        h.slideshow.advance(Direction::Next);
        assert_eq!(h.current().as_deref(), Some("b.jpg"));
        assert_eq!(h.sink.last_name().as_deref(), Some("b.jpg"));
        assert_eq!(h.slideshow.state(), PlaybackState::Stopped);
        assert!(h.slideshow.deadline().is_none());
        assert_eq!(h.persisted().load_index(), Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pause_and_resume_in_absolute_mode_charges_wall_time() {
        let mut h = harness(&["a.jpg", "b.jpg"], SortPolicy::AZ);
        h.slideshow.set_use_absolute_time(true);
        h.slideshow.start().await;

        h.slideshow.pause();
        assert_eq!(h.slideshow.state(), PlaybackState::Paused);
        assert!(h.slideshow.deadline().is_none());
        assert_eq!(h.slideshow.timer().timer_remaining_secs, 60);
        assert!(SlideshowStore::new(Box::new(h.store.clone())).paused());

        h.clock.advance(Duration::from_secs(10));
        h.slideshow.resume();
        assert_eq!(h.slideshow.timer().timer_remaining_secs, 50);
        let wait = h.slideshow.status().next_change_in.unwrap();
        assert!(wait <= Duration::from_secs(50) && wait > Duration::from_secs(45));
        assert_eq!(h.notifier.titles(), ["Slideshow paused", "Slideshow resumed"]);
        assert_eq!(h.notifier.0.lock().unwrap()[0].body, "Paused on slide a");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn short_durations_floor_to_five_seconds() {
        let mut h = harness(&["a.jpg"], SortPolicy::AZ);
        h.slideshow.set_slide_duration(Duration::from_secs(3));
        h.slideshow.start().await;
        let wait = h.slideshow.status().next_change_in.unwrap();
        assert!(wait <= Duration::from_secs(5) && wait > Duration::from_secs(4));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restart_resumes_same_slide_paused() {
        let store = MemoryStore::new();
        let mut first = harness_with(&["a.jpg", "b.jpg"], SortPolicy::AZ, store.clone());
        first.slideshow.start().await;
        first.slideshow.advance(Direction::Next);
        first.clock.advance(Duration::from_secs(20));
        first.slideshow.pause();
        first.slideshow.shutdown();
        let Harness { slideshow, dir, .. } = first;
        drop(slideshow);

        let mut h = harness_in(dir, &[], SortPolicy::AZ, store);
        h.slideshow.start().await;
        assert_eq!(h.slideshow.state(), PlaybackState::Paused);
        assert_eq!(h.current().as_deref(), Some("b.jpg"));
        assert_eq!(h.slideshow.timer().timer_remaining_secs, 40);
        assert!(h.slideshow.deadline().is_none());

        h.slideshow.resume();
        let wait = h.slideshow.status().next_change_in.unwrap();
        assert!(wait <= Duration::from_secs(40) && wait > Duration::from_secs(35));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn new_directory_starts_from_scratch() {
        let store = MemoryStore::new();
        SlideshowStore::new(Box::new(store.clone())).save_directory(Path::new("/elsewhere"));
        let mut stale = SlideshowStore::new(Box::new(store.clone()));
        stale.save_queue(&[WallpaperEntry::new("old.jpg", 1)]);
        stale.save_index(Some(0));

        let mut h = harness_with(&["a.jpg", "b.jpg"], SortPolicy::AZ, store);
        h.slideshow.start().await;
        assert_eq!(h.names(), ["a.jpg", "b.jpg"]);
        assert_eq!(h.current().as_deref(), Some("a.jpg"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timer_fire_advances_and_reshuffles_on_wrap() {
        let mut h = harness(&["a.jpg", "b.jpg", "c.jpg"], SortPolicy::Random);
        h.slideshow.set_reshuffle_on_complete(true);
        h.slideshow.start().await;

        for _ in 0..2 {
            h.slideshow.on_timer_fired().await;
        }
        assert_eq!(h.slideshow.playlist().index(), Some(2));
        let last = h.current().unwrap();

        h.slideshow.on_timer_fired().await;
        assert_eq!(h.slideshow.playlist().index(), Some(0));
        assert_ne!(h.current().unwrap(), last, "reshuffle must not repeat the previous slide");
        assert_eq!(h.names().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn observers_see_index_and_length_changes() {
        let mut h = harness(&["a.jpg", "b.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;
        let (id, mut rx) = h.slideshow.subscribe();

        h.slideshow.advance(Direction::Next);
        assert_eq!(rx.recv().await, Some(SlideshowChange::SlideIndex(Some(1))));

        let ev = h.event(DirectoryEventKind::Deleted, "a.jpg");
        h.slideshow.handle_watch_event(ev).await;
        assert_eq!(rx.recv().await, Some(SlideshowChange::SlideIndex(Some(0))));
        assert_eq!(rx.recv().await, Some(SlideshowChange::QueueLength(1)));

        h.slideshow.unsubscribe(id);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sort_change_keeps_current_slide() {
        let mut h = harness(&["a.jpg", "b.jpg", "c.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;
        h.slideshow.advance(Direction::Next);
        let applied = h.sink.count();

        h.slideshow.set_sort_policy(SortPolicy::ZA);
        assert_eq!(h.names(), ["c.jpg", "b.jpg", "a.jpg"]);
        assert_eq!(h.current().as_deref(), Some("b.jpg"));
        assert_eq!(h.sink.count(), applied);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn suspend_saves_timer_without_teardown() {
        let mut h = harness(&["a.jpg", "b.jpg"], SortPolicy::AZ);
        h.slideshow.start().await;
        h.clock.advance(Duration::from_secs(15));
        h.slideshow.on_suspend_likely();

        assert_eq!(h.slideshow.timer().timer_remaining_secs, 45);
        assert_eq!(h.slideshow.state(), PlaybackState::Running);
        assert!(h.slideshow.deadline().is_some());
        let stored = SlideshowStore::new(Box::new(h.store.clone()));
        assert_eq!(stored.load_timer_state(TimerState::new(60, false)).timer_remaining_secs, 45);
    }
}
