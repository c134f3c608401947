use std::sync::Arc;

use podctl_common::{Component, ServerStatus, ServiceState};
use tokio::sync::Mutex;

/// Process-wide component health, created once in `host::run` and cloned
/// into every component that reports into it.
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<ServerStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, component: Component, status: ServiceState, message: impl Into<String>) {
        let mut board = self.inner.lock().await;
        let entry = board.entry_mut(component);
        entry.status = status;
        entry.message = message.into();
    }

    pub async fn snapshot(&self) -> ServerStatus {
        self.inner.lock().await.clone()
    }
}
