use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::queue::SortPolicy;
use crate::sinks::GSETTINGS_APPLY_COMMAND;
use crate::tasks::slideshow::SlideshowSettings;
use crate::timer::MIN_DURATION;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Directory whose images make up the slideshow (not recursive).
    pub slideshow_directory: PathBuf,
    /// Playback order.
    pub sort_type: SortPolicy,
    /// How long each wallpaper stays up. Anything under five seconds is
    /// treated as five seconds.
    #[serde(with = "humantime_serde")]
    pub slide_duration: Duration,
    /// Measure slide time against the wall clock, so suspend and downtime
    /// count towards it.
    pub use_absolute_time: bool,
    /// Reshuffle a random queue each time playback wraps around.
    pub reshuffle_on_complete: bool,
    /// JSON file holding queue, position and timer state between runs.
    pub state_file: PathBuf,
    /// Shell command that sets the wallpaper; `{uri}` and `{path}` are substituted.
    /// Empty means log only.
    pub apply_command: String,
    /// Verbose per-event activity logging.
    pub activity_log: bool,
    /// Optional deterministic seed for shuffling.
    pub shuffle_seed: Option<u64>,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.slideshow_directory.as_os_str().is_empty(),
            "slideshow-directory must be set"
        );
        ensure!(
            self.slideshow_directory.is_absolute(),
            "slideshow-directory must be an absolute path"
        );
        ensure!(
            !self.state_file.as_os_str().is_empty(),
            "state-file must not be empty"
        );
        ensure!(
            self.slide_duration >= Duration::from_secs(1),
            "slide-duration must be at least one second"
        );
        if !self.apply_command.trim().is_empty() {
            ensure!(
                self.apply_command.contains("{uri}") || self.apply_command.contains("{path}"),
                "apply-command must reference {{uri}} or {{path}}"
            );
        }
        Ok(self)
    }

    /// Slide duration as the engine will use it, floored to the minimum.
    pub fn effective_slide_duration(&self) -> Duration {
        self.slide_duration.max(Duration::from_secs(MIN_DURATION))
    }

    pub fn slideshow_settings(&self) -> SlideshowSettings {
        SlideshowSettings {
            directory: self.slideshow_directory.clone(),
            sort: self.sort_type,
            slide_duration: self.slide_duration,
            use_absolute_time: self.use_absolute_time,
            reshuffle_on_complete: self.reshuffle_on_complete,
        }
    }

    /// Resolve a relative `state-file` against `base` (the config file's directory).
    pub fn resolve_state_file(mut self, base: &Path) -> Self {
        if self.state_file.is_relative() {
            self.state_file = base.join(&self.state_file);
        }
        self
    }

    /// Read, resolve and validate in one step.
    pub fn load(path: &Path) -> Result<Self> {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?
            .resolve_state_file(base)
            .validated()
            .context("invalid configuration values")
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            slideshow_directory: PathBuf::new(),
            sort_type: SortPolicy::Random,
            slide_duration: Duration::from_secs(60 * 60),
            use_absolute_time: false,
            reshuffle_on_complete: false,
            state_file: PathBuf::from("slideshow-state.json"),
            apply_command: GSETTINGS_APPLY_COMMAND.to_string(),
            activity_log: false,
            shuffle_seed: None,
        }
    }
}
