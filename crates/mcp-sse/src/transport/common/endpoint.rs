use std::sync::Arc;

use tokio::sync::watch;

/// A single-assignment cell for the URL that outbound messages are POSTed to.
///
/// Unset until the first `endpoint` event arrives. Once set it never changes.
#[derive(Debug, Clone)]
pub struct EndpointCell {
    tx: Arc<watch::Sender<Option<Arc<str>>>>,
}

impl Default for EndpointCell {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Store `endpoint`. Returns `false` and keeps the old value if the cell
    /// was already resolved.
    pub fn resolve(&self, endpoint: Arc<str>) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(endpoint);
            true
        })
    }

    pub fn get(&self) -> Option<Arc<str>> {
        self.tx.borrow().clone()
    }

    /// Wait until the cell is resolved.
    pub async fn resolved(&self) -> Option<Arc<str>> {
        let mut rx = self.tx.subscribe();
        let endpoint = rx.wait_for(Option::is_some).await.ok()?;
        (*endpoint).clone()
    }
}
