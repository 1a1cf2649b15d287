use crate::session::{SessionId, SessionState};

/// Where cleaned session output goes.
///
/// Called from relay threads, so implementations must return quickly: buffer
/// or forward, never block on the consumer.
pub trait DisplaySink: Send + Sync {
    /// Deliver cleaned output text of session `id`, in arrival order.
    fn append(&self, id: SessionId, text: &str);

    /// A session moved to `state`.
    fn state_changed(&self, _id: SessionId, _state: SessionState) {}
}
