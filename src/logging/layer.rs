use std::sync::Arc;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::handler::{RemoteLogHandler, DIAGNOSTIC_TARGET};
use super::record::LogRecord;

pub const DEFAULT_TARGET_PREFIX: &str = "acdn";

/// Feeds tracing events from the application's own targets into a
/// [`RemoteLogHandler`].
///
/// Only targets starting with one of the configured prefixes are forwarded,
/// so events from an injected store client (and its HTTP stack) never loop
/// back into the store. The handler's own diagnostics are always skipped.
pub struct RemoteLogLayer {
    handler: Arc<RemoteLogHandler>,
    target_prefixes: Vec<String>,
}

impl RemoteLogLayer {
    pub fn new(handler: Arc<RemoteLogHandler>) -> Self {
        Self {
            handler,
            target_prefixes: vec![DEFAULT_TARGET_PREFIX.to_string()],
        }
    }

    /// Also forward events whose target starts with `prefix`.
    pub fn with_target_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.target_prefixes.push(prefix.into());
        self
    }

    fn forwards(&self, target: &str) -> bool {
        target != DIAGNOSTIC_TARGET
            && self
                .target_prefixes
                .iter()
                .any(|prefix| target.starts_with(prefix.as_str()))
    }
}

impl<S: Subscriber> Layer<S> for RemoteLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.forwards(event.metadata().target()) {
            return;
        }
        self.handler.emit(LogRecord::from_event(event));
    }
}
