//! Signed-in account as seen by the sync engine.
//!
//! Authentication itself happens elsewhere; the engine only needs the current
//! user id and to be told when it changes.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct IdentityHandle {
    sender: Arc<watch::Sender<Option<String>>>,
}

impl Default for IdentityHandle {
    fn default() -> Self {
        Self::new(None)
    }
}

impl IdentityHandle {
    pub fn new(user_id: Option<String>) -> Self {
        let (sender, _) = watch::channel(user_id);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        tracing::info!("Identity changed to user {user_id}");
        self.sender.send_replace(Some(user_id));
    }

    pub fn sign_out(&self) {
        tracing::info!("Identity cleared");
        self.sender.send_replace(None);
    }

    pub fn current(&self) -> Option<String> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.sender.subscribe()
    }
}
