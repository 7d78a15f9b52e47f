//! User-facing notices, behind an injected interface so the core never
//! reaches into a UI layer.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// A submission was queued because the authority is unreachable.
    OfflineQueued,
    /// A replay pass finished and confirmed queued submissions.
    ReplayFinished,
    /// A submission was permanently rejected.
    SubmissionRejected,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NoticeKind, message: &str);
}

/// Drops all notices.
#[derive(Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _kind: NoticeKind, _message: &str) {}
}
