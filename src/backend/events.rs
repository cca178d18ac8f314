//! Auth event publisher.

use crate::models::AuthEvent;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 16;

/// Publishes session changes to subscribed stores, in issuance order.
#[derive(Clone)]
pub struct AuthEventBus {
    tx: broadcast::Sender<AuthEvent>,
}

impl AuthEventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: AuthEvent) {
        tracing::debug!(
            event = event.kind.as_str(),
            user_id = event.session.as_ref().map(|s| s.user.id.as_str()),
            "Auth event"
        );
        // No subscribers is fine: nothing is mounted yet.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }
}

impl Default for AuthEventBus {
    fn default() -> Self {
        Self::new()
    }
}
