//! Outbound collaborators: applying a wallpaper and surfacing notifications.

use std::path::Path;
use std::process::Command;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, warn};
use url::Url;

/// Sets the desktop picture. Called once per slide change.
pub trait WallpaperSink: Send {
    fn apply(&mut self, path: &Path) -> Result<()>;
}

/// Default command: GNOME light and dark background keys.
pub const GSETTINGS_APPLY_COMMAND: &str = "gsettings set org.gnome.desktop.background picture-uri '{uri}' \
     && gsettings set org.gnome.desktop.background picture-uri-dark '{uri}'";

/// Runs a shell command with `{uri}` and `{path}` substituted.
#[derive(Debug, Clone)]
pub struct CommandWallpaperSink {
    template: String,
}

impl CommandWallpaperSink {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if template.trim().is_empty() {
            bail!("apply command must not be blank");
        }
        Ok(Self { template })
    }

    pub fn render(&self, path: &Path) -> Result<String> {
        let uri = file_uri(path)?;
        Ok(self
            .template
            .replace("{uri}", &uri)
            .replace("{path}", &path.to_string_lossy()))
    }
}

impl WallpaperSink for CommandWallpaperSink {
    fn apply(&mut self, path: &Path) -> Result<()> {
        let command = self.render(path)?;
        let started = Instant::now();
        let status = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .status()
            .with_context(|| format!("failed to spawn shell for command: {command}"))?;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "wallpaper apply command finished"
        );
        if status.success() {
            Ok(())
        } else {
            Err(anyhow!(
                "command exited with status {}: {command}",
                status.code().unwrap_or(-1)
            ))
        }
    }
}

/// Sink that only logs; used by dry runs and when no command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogWallpaperSink;

impl WallpaperSink for LogWallpaperSink {
    fn apply(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "wallpaper changed");
        Ok(())
    }
}

/// `file://` URI for an absolute path.
pub fn file_uri(path: &Path) -> Result<String> {
    Url::from_file_path(path)
        .map(String::from)
        .map_err(|()| anyhow!("cannot convert {} to a file URI", path.display()))
}

/// Follow-up offered alongside a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    OpenSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub action: Option<NotificationAction>,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// Fire-and-forget user alerts.
pub trait Notifier: Send {
    fn notify(&mut self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&mut self, notification: Notification) {
        match notification.action {
            Some(action) => warn!(
                title = %notification.title,
                action = ?action,
                "{}",
                notification.body
            ),
            None => info!(title = %notification.title, "{}", notification.body),
        }
    }
}

/// Human-friendly label for a wallpaper file name: drops the extension and,
/// for names carrying a resolution tag (`-1920x1080`, `-UHD`), the tag too,
/// spacing out the CamelCase/digit runs those downloads use.
pub fn pretty_file_name(name: Option<&str>) -> String {
    let Some(name) = name.filter(|n| !n.is_empty()) else {
        return "None".to_string();
    };
    let stem = match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    };
    let Some(tagless) = strip_resolution_tag(stem) else {
        return stem.to_string();
    };

    let mut out = String::with_capacity(tagless.len() + 8);
    let mut prev: Option<char> = None;
    for c in tagless.chars() {
        if let Some(p) = prev {
            let boundary = (p.is_ascii_lowercase() && c.is_ascii_uppercase())
                || (p.is_ascii_lowercase() && c.is_ascii_digit())
                || (p.is_ascii_digit() && c.is_ascii_alphabetic());
            if boundary {
                out.push(' ');
            }
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

fn strip_resolution_tag(stem: &str) -> Option<&str> {
    let (head, tag) = stem.rsplit_once('-')?;
    if tag == "UHD" {
        return Some(head);
    }
    let (w, h) = tag.split_once('x')?;
    let dims = |s: &str| (3..=4).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit());
    (dims(w) && dims(h)).then_some(head)
}
