use tokio_util::sync::CancellationToken;

/// Cooperative cancellation for in-flight fetches. The engine keeps a clone
/// and interrupts it when the owning build is cut short; the fetcher stops
/// waiting, tears the background worker down, and only then returns.
///
#[derive(Debug, Clone, Default)]
pub struct Interruptor {
    token: CancellationToken,
}

impl Interruptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.token.cancel()
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) async fn interrupted(&self) {
        self.token.cancelled().await
    }
}
