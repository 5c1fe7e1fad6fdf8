//! Connection registry: at most one live [`RemoteSession`] per identity.
//!
//! Each key owns a slot whose `OnceCell` is initialised outside the map lock,
//! so logins to different hosts run in parallel while concurrent logins for
//! the same identity share a single connect.

use crate::sftp::error::RemoteResult;
use crate::sftp::guard::PathGuard;
use crate::sftp::session::RemoteSession;
use crate::sftp::transport::Connector;
use crate::sftp::types::*;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

struct Slot {
    identity: ConnectionIdentity,
    cell: OnceCell<Arc<RemoteSession>>,
}

impl Slot {
    fn new(identity: ConnectionIdentity) -> Self {
        Self {
            identity,
            cell: OnceCell::new(),
        }
    }

    fn session(&self) -> Option<&Arc<RemoteSession>> {
        self.cell.get()
    }
}

pub struct ConnectionRegistry {
    slots: Mutex<HashMap<SessionKey, Arc<Slot>>>,
    connector: Arc<dyn Connector>,
    guard: Arc<PathGuard>,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn Connector>, guard: PathGuard) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            connector,
            guard: Arc::new(guard),
        }
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Return the session for `identity`, connecting first if there is none.
    /// An existing session is reused without checking `credentials`.
    pub async fn add(
        &self,
        identity: ConnectionIdentity,
        credentials: Credentials,
    ) -> RemoteResult<(SessionKey, Arc<RemoteSession>)> {
        let key = identity.key();

        let slot = {
            let mut slots = self.slots.lock().await;
            let stale = slots
                .get(&key)
                .and_then(|s| s.session())
                .is_some_and(|s| s.is_closed());
            if stale {
                info!("Replacing closed session {}", key);
                slots.remove(&key);
            }
            Arc::clone(
                slots
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Slot::new(identity.clone()))),
            )
        };

        let connector = Arc::clone(&self.connector);
        let guard = Arc::clone(&self.guard);
        let result = slot
            .cell
            .get_or_try_init(|| async move {
                RemoteSession::open(identity, credentials, connector, guard)
                    .await
                    .map(Arc::new)
            })
            .await
            .map(Arc::clone);

        match result {
            Ok(session) => {
                info!("Session {} ready", key);
                Ok((key, session))
            }
            Err(e) => {
                let mut slots = self.slots.lock().await;
                // The map plus this call: nobody else is waiting on the slot.
                let orphaned = slots.get(&key).is_some_and(|current| {
                    Arc::ptr_eq(current, &slot)
                        && current.session().is_none()
                        && Arc::strong_count(&slot) <= 2
                });
                if orphaned {
                    slots.remove(&key);
                }
                drop(slot);
                drop(slots);
                Err(e)
            }
        }
    }

    pub async fn get(&self, key: &SessionKey) -> Option<Arc<RemoteSession>> {
        let slots = self.slots.lock().await;
        slots.get(key).and_then(|s| s.session().cloned())
    }

    pub async fn get_by_identity(&self, identity: &ConnectionIdentity) -> Option<Arc<RemoteSession>> {
        self.get(&identity.key()).await
    }

    /// Drop the session under `key` and close its connection. `false` when
    /// there is no established session for the key.
    pub async fn remove(&self, key: &SessionKey) -> bool {
        let session = {
            let mut slots = self.slots.lock().await;
            let established = slots.get(key).is_some_and(|s| s.session().is_some());
            if !established {
                return false;
            }
            slots.remove(key).and_then(|s| s.session().cloned())
        };

        match session {
            Some(session) => {
                if let Err(e) = session.close().await {
                    warn!("Closing session {} failed: {}", key, e);
                }
                info!("Session {} removed", key);
                true
            }
            None => false,
        }
    }

    pub async fn list_all(&self) -> Vec<SessionInfo> {
        let slots = self.slots.lock().await;
        let mut infos: Vec<SessionInfo> = slots
            .values()
            .filter_map(|s| s.session().map(|session| session.info()))
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Identities with an established session.
    pub async fn identities(&self) -> Vec<ConnectionIdentity> {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|s| s.session().is_some())
            .map(|s| s.identity.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.values().filter(|s| s.session().is_some()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close and forget every established session. Logins still in progress
    /// are left alone.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<RemoteSession>> = {
            let mut slots = self.slots.lock().await;
            let keys: Vec<SessionKey> = slots
                .iter()
                .filter(|(_, s)| s.session().is_some())
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter()
                .filter_map(|k| slots.remove(k))
                .filter_map(|s| s.session().cloned())
                .collect()
        };

        if sessions.is_empty() {
            return;
        }

        let count = sessions.len();
        for session in sessions {
            if let Err(e) = session.close().await {
                warn!("Closing session {} during shutdown failed: {}", session.key(), e);
            }
        }
        info!("Registry shut down, closed {} sessions", count);
    }
}
