use crate::subscription::types::Notice;
use tokio::sync::mpsc;

/// Sink for user-facing notices. The host shell decides how to show them.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log only
#[derive(Default, Clone, Copy, Debug)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        tracing::info!(title = notice.title(), message = notice.message(), "User notice");
    }
}

/// Forwards notices to a channel the UI layer drains
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelNotifier { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: Notice) {
        if self.sender.send(notice).is_err() {
            tracing::warn!(?notice, "Notice dropped, receiver closed");
        }
    }
}
