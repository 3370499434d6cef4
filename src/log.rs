use std::fmt;

use tracing::{Span, info};

/// Verbose activity trail for one engine instance.
///
/// Handed to the engine at construction; when disabled, `record` is a no-op.
/// Warnings and errors bypass this and always go through `tracing` directly.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    enabled: bool,
    span: Span,
}

impl ActivityLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            span: Span::current(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn record(&self, message: fmt::Arguments<'_>) {
        if !self.enabled {
            return;
        }
        let _entered = self.span.enter();
        info!(target: "wallpaper_slideshow::activity", "{message}");
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::disabled()
    }
}
