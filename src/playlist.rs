//! The live queue plus the slide index that points into it.
//!
//! Every insertion or removal keeps `index` on the same logical entry: removing
//! a position before the index decrements it, inserting at or before it
//! increments it. Removing the entry under the index leaves the index on its
//! successor.

use std::collections::HashSet;

use rand::Rng;

use crate::queue::{self, SortPolicy, WallpaperEntry};

/// Which way to move through the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Outcome of [`Playlist::reconcile`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl Reconciled {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Queue plus current slide. `index` is `None` when the queue is empty or has
/// been invalidated and needs a resort.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Playlist {
    entries: Vec<WallpaperEntry>,
    index: Option<usize>,
}

impl Playlist {
    /// Restore a playlist; an out-of-range index is dropped.
    pub fn new(entries: Vec<WallpaperEntry>, index: Option<usize>) -> Self {
        let index = index.filter(|i| *i < entries.len());
        Self { entries, index }
    }

    pub fn entries(&self) -> &[WallpaperEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn current(&self) -> Option<&WallpaperEntry> {
        self.index.and_then(|i| self.entries.get(i))
    }

    /// Point at `index`, ignoring values outside the queue.
    pub fn set_index(&mut self, index: Option<usize>) {
        self.index = index.filter(|i| *i < self.entries.len());
    }

    /// Drop everything and invalidate the index.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index = None;
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove `name`, returning the position it occupied. Absent names are a no-op.
    pub fn remove(&mut self, name: &str) -> Option<usize> {
        let at = self.position(name)?;
        self.remove_at(at);
        Some(at)
    }

    fn remove_at(&mut self, at: usize) -> WallpaperEntry {
        let removed = self.entries.remove(at);
        if let Some(current) = self.index {
            if at < current {
                self.index = Some(current - 1);
            } else if current >= self.entries.len() {
                // removed the tail entry under the index: wrap to the front
                self.index = if self.entries.is_empty() { None } else { Some(0) };
            }
        }
        removed
    }

    /// Insert `entry` per `policy`, returning its final position.
    ///
    /// A name that is already queued is refreshed instead of duplicated: in
    /// place for `Random`, re-positioned for ordered policies. The index keeps
    /// following the same logical entry, including when the refreshed entry is
    /// the current one.
    pub fn insert<R: Rng + ?Sized>(
        &mut self,
        entry: WallpaperEntry,
        policy: SortPolicy,
        rng: &mut R,
    ) -> usize {
        if let Some(existing) = self.position(&entry.name) {
            if policy.is_random() {
                self.entries[existing] = entry;
                return existing;
            }
            let was_current = self.index == Some(existing);
            self.remove_at(existing);
            let at = self.insert_new(entry, policy, rng);
            if was_current {
                self.index = Some(at);
            }
            return at;
        }
        self.insert_new(entry, policy, rng)
    }

    fn insert_new<R: Rng + ?Sized>(
        &mut self,
        entry: WallpaperEntry,
        policy: SortPolicy,
        rng: &mut R,
    ) -> usize {
        let at = queue::insert(&mut self.entries, entry, policy, rng);
        if let Some(current) = self.index {
            if at <= current {
                self.index = Some(current + 1);
            }
        }
        at
    }

    /// Swap the entry at `at` for `entry` without moving it. If `entry`'s name
    /// is already queued elsewhere, that duplicate is dropped first.
    pub fn replace_at(&mut self, at: usize, entry: WallpaperEntry) -> usize {
        let mut at = at;
        if let Some(dup) = self.position(&entry.name).filter(|dup| *dup != at) {
            self.remove_at(dup);
            if dup < at {
                at -= 1;
            }
        }
        if let Some(slot) = self.entries.get_mut(at) {
            *slot = entry;
        }
        at
    }

    /// Reorder the whole queue. The index is left for the caller to reset.
    pub fn sort<R: Rng + ?Sized>(&mut self, policy: SortPolicy, rng: &mut R) {
        queue::sort(&mut self.entries, policy, rng);
    }

    /// Move one step in `direction`, wrapping at both ends. Returns `true` when
    /// a forward step wrapped past the end. An invalidated index restarts at 0.
    pub fn step(&mut self, direction: Direction) -> bool {
        let len = self.entries.len();
        if len == 0 {
            self.index = None;
            return false;
        }
        let Some(current) = self.index else {
            self.index = Some(0);
            return false;
        };
        let (next, wrapped) = match direction {
            Direction::Next if current + 1 >= len => (0, true),
            Direction::Next => (current + 1, false),
            Direction::Previous => ((current + len - 1) % len, false),
        };
        self.index = Some(next);
        wrapped
    }

    /// Move the entry at position 0 to the back of the queue.
    pub fn rotate_front_to_back(&mut self) {
        if self.entries.len() > 1 {
            self.entries.rotate_left(1);
        }
    }

    /// Bring the queue in line with a fresh directory listing. Entries only in
    /// memory are removed; entries only on disk are inserted with the same
    /// logic as live events.
    pub fn reconcile<R: Rng + ?Sized>(
        &mut self,
        listing: Vec<WallpaperEntry>,
        policy: SortPolicy,
        rng: &mut R,
    ) -> Reconciled {
        let on_disk: HashSet<&str> = listing.iter().map(|e| e.name.as_str()).collect();
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !on_disk.contains(e.name.as_str()))
            .map(|e| e.name.clone())
            .collect();

        let mut report = Reconciled::default();
        for name in stale {
            if self.remove(&name).is_some() {
                report.removed.push(name);
            }
        }
        for entry in listing {
            if self.contains(&entry.name) {
                continue;
            }
            report.added.push(entry.name.clone());
            self.insert(entry, policy, rng);
        }
        report
    }
}
