//! Observer registrations
//!
//! Each registration owns a forwarding task; removing the registration cancels
//! it. Tokens are random and never reused.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handle returned when registering an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverToken(Uuid);

impl ObserverToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ObserverToken {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: Mutex<HashMap<ObserverToken, CancellationToken>>,
}

impl ObserverRegistry {
    /// Register a new observer whose task stops when `cancel` fires
    pub(crate) async fn register(&self, cancel: CancellationToken) -> ObserverToken {
        let token = ObserverToken::new();
        self.observers.lock().await.insert(token, cancel);
        token
    }

    /// Stop an observer. Returns false for unknown tokens.
    pub(crate) async fn remove(&self, token: ObserverToken) -> bool {
        match self.observers.lock().await.remove(&token) {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) async fn len(&self) -> usize {
        self.observers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_cancels_once() {
        let registry = ObserverRegistry::default();
        let cancel = CancellationToken::new();
        let token = registry.register(cancel.clone()).await;
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove(token).await);
        assert!(cancel.is_cancelled());
        assert!(!registry.remove(token).await);
        assert_eq!(registry.len().await, 0);
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(ObserverToken::new(), ObserverToken::new());
    }
}
