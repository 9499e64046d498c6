//! Process-wide mapping from display name to live session.
//!
//! A name maps to the session's [`Outbound`]; that is all routing needs.
//! The map is a `BTreeMap`, so snapshots come out sorted by name, which is
//! also the order dispatch acquires write locks in.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::outbound::Outbound;

/// A resolved delivery target.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub name: String,
    pub outbound: Arc<Outbound>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<String, Arc<Outbound>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `(name, outbound)` iff `name` is free. Atomic.
    pub async fn try_claim(&self, name: &str, outbound: Arc<Outbound>) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(name) {
            debug!(name, "name already claimed");
            return false;
        }
        sessions.insert(name.to_string(), outbound);
        true
    }

    pub async fn lookup(&self, name: &str) -> Option<Arc<Outbound>> {
        self.sessions.read().await.get(name).cloned()
    }

    /// Every registered session, sorted by name.
    pub async fn snapshot_all(&self) -> Vec<Recipient> {
        self.all_except::<&str>(&[]).await
    }

    /// Every registered session whose name is not in `excluded`, sorted by name.
    pub async fn all_except<S: AsRef<str>>(&self, excluded: &[S]) -> Vec<Recipient> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(name, _)| !excluded.iter().any(|e| e.as_ref() == name.as_str()))
            .map(|(name, outbound)| Recipient {
                name: name.clone(),
                outbound: outbound.clone(),
            })
            .collect()
    }

    /// Remove `name`. No-op if absent.
    pub async fn release(&self, name: &str) -> bool {
        self.sessions.write().await.remove(name).is_some()
    }

    /// Remove `name` only while it still maps to `outbound`.
    pub async fn release_owned(&self, name: &str, outbound: &Arc<Outbound>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(name) {
            Some(current) if Arc::ptr_eq(current, outbound) => {
                sessions.remove(name);
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn names(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }
}
