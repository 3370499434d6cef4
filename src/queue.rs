//! Wallpaper queue entries, sort policies and ordered insertion.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// One candidate wallpaper. `name` is the file name relative to the slideshow
/// directory and is unique within a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallpaperEntry {
    pub name: String,
    /// Creation time in whole seconds since the Unix epoch.
    pub date: u64,
}

impl WallpaperEntry {
    pub fn new(name: impl Into<String>, date: u64) -> Self {
        Self {
            name: name.into(),
            date,
        }
    }
}

/// Playback order of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortPolicy {
    #[default]
    #[serde(rename = "random")]
    Random,
    #[serde(rename = "a-z")]
    AZ,
    #[serde(rename = "z-a")]
    ZA,
    #[serde(rename = "newest")]
    Newest,
    #[serde(rename = "oldest")]
    Oldest,
}

impl SortPolicy {
    pub fn is_random(self) -> bool {
        matches!(self, SortPolicy::Random)
    }

    /// Ordering of `a` relative to `b` under this policy. `Random` has no
    /// ordering and treats everything as equal.
    pub fn compare(self, a: &WallpaperEntry, b: &WallpaperEntry) -> Ordering {
        match self {
            SortPolicy::Random => Ordering::Equal,
            SortPolicy::AZ => natural_cmp(&a.name, &b.name),
            SortPolicy::ZA => natural_cmp(&b.name, &a.name),
            SortPolicy::Newest => b.date.cmp(&a.date),
            SortPolicy::Oldest => a.date.cmp(&b.date),
        }
    }
}

impl fmt::Display for SortPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SortPolicy::Random => "random",
            SortPolicy::AZ => "a-z",
            SortPolicy::ZA => "z-a",
            SortPolicy::Newest => "newest",
            SortPolicy::Oldest => "oldest",
        };
        f.write_str(label)
    }
}

/// Reorder `queue` in place. Ordered policies use a stable sort so ties keep
/// their insertion order; `Random` is a Fisher–Yates shuffle.
pub fn sort<R: Rng + ?Sized>(queue: &mut [WallpaperEntry], policy: SortPolicy, rng: &mut R) {
    match policy {
        SortPolicy::Random => queue.shuffle(rng),
        ordered => queue.sort_by(|a, b| ordered.compare(a, b)),
    }
}

/// Binary-search insertion for ordered policies. Returns the position the
/// entry landed at, or `None` (queue untouched) for `Random`.
pub fn insert_sorted(
    queue: &mut Vec<WallpaperEntry>,
    entry: WallpaperEntry,
    policy: SortPolicy,
) -> Option<usize> {
    if policy.is_random() {
        return None;
    }
    let at = queue.partition_point(|existing| policy.compare(existing, &entry) == Ordering::Less);
    queue.insert(at, entry);
    Some(at)
}

/// Insert honoring `policy`: sorted position for ordered policies, a uniformly
/// random slot in `0..=len` for `Random`.
pub fn insert<R: Rng + ?Sized>(
    queue: &mut Vec<WallpaperEntry>,
    entry: WallpaperEntry,
    policy: SortPolicy,
    rng: &mut R,
) -> usize {
    if policy.is_random() {
        let at = rng.random_range(0..=queue.len());
        queue.insert(at, entry);
        return at;
    }
    insert_sorted(queue, entry, policy).unwrap_or(queue.len())
}

/// Case-insensitive comparison that orders digit runs by numeric value, so
/// `img2` sorts before `img10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let ord = cmp_digit_runs(&take_digits(&mut left), &take_digits(&mut right));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(l), Some(r)) => {
                left.next();
                right.next();
                let ord = l.to_lowercase().cmp(r.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        run.push(c);
    }
    run
}

fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
