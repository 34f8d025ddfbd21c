//! User-facing error notification seam.

use log::warn;

/// Sink for user-visible error toasts.
pub trait ErrorNotifier: Send + Sync {
    fn notify_error(&self, title: &str, message: &str);
}

/// Notifier that only writes a log line; used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl ErrorNotifier for LogNotifier {
    fn notify_error(&self, title: &str, message: &str) {
        warn!("event=user_notification module=store status=error title={title} message={message}");
    }
}
