use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::endpoint::Endpoint;

type Entries = Arc<RwLock<HashMap<String, Endpoint>>>;

enum Command {
    Register {
        endpoint: Endpoint,
        done: oneshot::Sender<()>,
    },
    Unregister {
        user_id: String,
        conn_id: Uuid,
        done: oneshot::Sender<bool>,
    },
}

/// Which user currently holds which live connection.
///
/// Registration and removal are serialized through a single owning task;
/// lookups and snapshots read a shared map that only that task writes.
/// At most one endpoint is registered per user at any time.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    commands: mpsc::UnboundedSender<Command>,
    entries: Entries,
}

impl PresenceRegistry {
    /// Start the owning task. Must be called inside a Tokio runtime. The task
    /// exits once every handle has been dropped.
    pub fn spawn() -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let entries: Entries = Arc::new(RwLock::new(HashMap::new()));

        tokio::spawn(run(rx, entries.clone()));

        Self {
            inner: Arc::new(RegistryInner { commands, entries }),
        }
    }

    /// Install `endpoint` for its user, closing whatever endpoint the user
    /// had before. Returns once the new entry is visible to lookups.
    pub async fn register(&self, endpoint: Endpoint) {
        let (done, wait) = oneshot::channel();
        if self.inner.commands.send(Command::Register { endpoint, done }).is_err() {
            warn!("Presence registry task has stopped, register dropped");
            return;
        }
        let _ = wait.await;
    }

    /// Remove the entry for `endpoint`'s user, but only if `endpoint` is the
    /// one registered. Returns whether an entry was removed.
    pub async fn unregister(&self, endpoint: &Endpoint) -> bool {
        let (done, wait) = oneshot::channel();
        let cmd = Command::Unregister {
            user_id: endpoint.user_id().to_string(),
            conn_id: endpoint.id(),
            done,
        };
        if self.inner.commands.send(cmd).is_err() {
            warn!("Presence registry task has stopped, unregister dropped");
            return false;
        }
        wait.await.unwrap_or(false)
    }

    /// Current endpoint for `user_id`, if the user is online.
    pub fn lookup(&self, user_id: &str) -> Option<Endpoint> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    /// Point-in-time copy of every live endpoint. Callers deliver from the
    /// copy, never while holding the map.
    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn online_count(&self) -> usize {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

async fn run(mut commands: mpsc::UnboundedReceiver<Command>, entries: Entries) {
    while let Some(cmd) = commands.recv().await {
        match cmd {
            Command::Register { endpoint, done } => {
                let user_id = endpoint.user_id().to_string();
                let conn_id = endpoint.id();
                {
                    let mut map = entries.write().unwrap_or_else(PoisonError::into_inner);
                    if let Some(previous) = map.insert(user_id.clone(), endpoint) {
                        if previous.id() != conn_id {
                            previous.close();
                            info!(
                                "{} replaced connection {} with {}",
                                user_id,
                                previous.id(),
                                conn_id
                            );
                        }
                    }
                }
                debug!("{} registered on connection {}", user_id, conn_id);
                let _ = done.send(());
            }
            Command::Unregister {
                user_id,
                conn_id,
                done,
            } => {
                let removed = {
                    let mut map = entries.write().unwrap_or_else(PoisonError::into_inner);
                    let is_current = map.get(&user_id).is_some_and(|e| e.id() == conn_id);
                    if is_current {
                        map.remove(&user_id);
                    }
                    is_current
                };
                if removed {
                    debug!("{} unregistered connection {}", user_id, conn_id);
                } else {
                    debug!("{} stale unregister for connection {} ignored", user_id, conn_id);
                }
                let _ = done.send(removed);
            }
        }
    }
    debug!("Presence registry task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::LifecycleState;
    use parley_types::models::UserProfile;

    fn endpoint(user: &str) -> Endpoint {
        let (ep, _rx) = Endpoint::new(UserProfile::new(user, user), 8);
        ep
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let registry = PresenceRegistry::spawn();
        let ep = endpoint("u1");
        registry.register(ep.clone()).await;

        let found = registry.lookup("u1").expect("u1 should be online");
        assert_eq!(found.id(), ep.id());
        assert!(registry.lookup("u2").is_none());
        assert_eq!(registry.online_count(), 1);
    }

    #[tokio::test]
    async fn second_registration_evicts_first() {
        let registry = PresenceRegistry::spawn();
        let first = endpoint("u1");
        let second = endpoint("u1");
        first.activate();

        registry.register(first.clone()).await;
        registry.register(second.clone()).await;

        assert_eq!(first.state(), LifecycleState::Closing);
        assert!(!second.is_closing());
        assert_eq!(registry.lookup("u1").unwrap().id(), second.id());
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn stale_unregister_keeps_newer_entry() {
        let registry = PresenceRegistry::spawn();
        let first = endpoint("u1");
        let second = endpoint("u1");
        registry.register(first.clone()).await;
        registry.register(second.clone()).await;

        assert!(!registry.unregister(&first).await);
        assert_eq!(registry.lookup("u1").unwrap().id(), second.id());

        assert!(registry.unregister(&second).await);
        assert!(registry.lookup("u1").is_none());
        assert!(!registry.unregister(&second).await);
    }

    #[tokio::test]
    async fn re_registering_same_endpoint_does_not_close_it() {
        let registry = PresenceRegistry::spawn();
        let ep = endpoint("u1");
        registry.register(ep.clone()).await;
        registry.register(ep.clone()).await;
        assert!(!ep.is_closing());
        assert_eq!(registry.online_count(), 1);
    }

    #[tokio::test]
    async fn snapshot_is_a_copy() {
        let registry = PresenceRegistry::spawn();
        let a = endpoint("a");
        let b = endpoint("b");
        registry.register(a.clone()).await;
        registry.register(b.clone()).await;

        let snapshot = registry.snapshot();
        registry.unregister(&a).await;

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_registrations_leave_one_entry() {
        let registry = PresenceRegistry::spawn();
        let endpoints: Vec<Endpoint> = (0..16).map(|_| endpoint("u1")).collect();

        let mut tasks = Vec::new();
        for ep in endpoints.clone() {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { registry.register(ep).await }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.online_count(), 1);
        let live = registry.lookup("u1").unwrap();
        let open: Vec<_> = endpoints.iter().filter(|e| !e.is_closing()).collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id(), live.id());
    }
}
