use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use parley_types::events::GatewayEvent;
use parley_types::models::UserProfile;

use crate::error::EnqueueError;

/// Lifecycle of one connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Handle to one live client connection: its user, its bounded outbound
/// queue and its lifecycle state. Cheap to clone; all clones refer to the
/// same connection.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

struct EndpointInner {
    id: Uuid,
    user: UserProfile,
    outbound: mpsc::Sender<GatewayEvent>,
    state: watch::Sender<LifecycleState>,
}

impl Endpoint {
    /// Create an endpoint in `Connecting` with a queue of `capacity` frames.
    /// The receiver half belongs to the connection's writer.
    pub fn new(user: UserProfile, capacity: usize) -> (Self, mpsc::Receiver<GatewayEvent>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let (state, _) = watch::channel(LifecycleState::Connecting);
        let endpoint = Self {
            inner: Arc::new(EndpointInner {
                id: Uuid::new_v4(),
                user,
                outbound,
                state,
            }),
        };
        (endpoint, rx)
    }

    /// Connection id, distinct for every endpoint even for the same user.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn user(&self) -> &UserProfile {
        &self.inner.user
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user.id
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    pub fn is_closing(&self) -> bool {
        self.state() >= LifecycleState::Closing
    }

    /// `Connecting -> Active`. Returns false if the endpoint was closed first.
    pub fn activate(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == LifecycleState::Connecting {
                *state = LifecycleState::Active;
                true
            } else {
                false
            }
        })
    }

    /// Move to `Closing`. Returns true only for the call that made the
    /// transition; closing an endpoint that is already closing is a no-op.
    pub fn close(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state < LifecycleState::Closing {
                *state = LifecycleState::Closing;
                true
            } else {
                false
            }
        })
    }

    /// Final transition, once both workers have exited and the registry
    /// entry is gone.
    pub fn mark_closed(&self) {
        self.inner.state.send_if_modified(|state| {
            if *state != LifecycleState::Closed {
                *state = LifecycleState::Closed;
                true
            } else {
                false
            }
        });
    }

    /// Resolves once the endpoint has entered `Closing` (or is already past it).
    pub async fn closing(&self) {
        let mut rx = self.inner.state.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|state| *state >= LifecycleState::Closing).await;
    }

    /// Non-blocking enqueue onto the outbound queue.
    pub fn try_enqueue(&self, event: GatewayEvent) -> Result<(), EnqueueError> {
        if self.is_closing() {
            return Err(EnqueueError::Closed);
        }
        match self.inner.outbound.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EnqueueError::Full),
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.user.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(capacity: usize) -> (Endpoint, mpsc::Receiver<GatewayEvent>) {
        Endpoint::new(UserProfile::new("u1", "Ada"), capacity)
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let (ep, _rx) = endpoint(4);
        assert_eq!(ep.state(), LifecycleState::Connecting);

        assert!(ep.activate());
        assert!(!ep.activate());
        assert_eq!(ep.state(), LifecycleState::Active);

        assert!(ep.close());
        assert!(!ep.close());
        assert_eq!(ep.state(), LifecycleState::Closing);
        assert!(!ep.activate());

        ep.mark_closed();
        assert_eq!(ep.state(), LifecycleState::Closed);
        assert!(!ep.close());
    }

    #[test]
    fn full_queue_reports_full() {
        let (ep, mut rx) = endpoint(2);
        assert!(ep.try_enqueue(GatewayEvent::pong()).is_ok());
        assert!(ep.try_enqueue(GatewayEvent::pong()).is_ok());
        assert_eq!(ep.try_enqueue(GatewayEvent::pong()), Err(EnqueueError::Full));

        assert!(rx.try_recv().is_ok());
        assert!(ep.try_enqueue(GatewayEvent::pong()).is_ok());
    }

    #[test]
    fn closing_endpoint_rejects_frames() {
        let (ep, mut rx) = endpoint(2);
        ep.close();
        assert_eq!(ep.try_enqueue(GatewayEvent::pong()), Err(EnqueueError::Closed));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_writer_reports_closed() {
        let (ep, rx) = endpoint(2);
        drop(rx);
        assert_eq!(ep.try_enqueue(GatewayEvent::pong()), Err(EnqueueError::Closed));
    }

    #[test]
    fn clones_share_identity_and_state() {
        let (ep, _rx) = endpoint(1);
        let other = ep.clone();
        assert_eq!(ep.id(), other.id());
        other.close();
        assert!(ep.is_closing());

        let (fresh, _rx2) = endpoint(1);
        assert_ne!(ep.id(), fresh.id());
    }

    #[tokio::test]
    async fn closing_resolves_after_close() {
        let (ep, _rx) = endpoint(1);
        let waiter = {
            let ep = ep.clone();
            tokio::spawn(async move { ep.closing().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        ep.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("closing() did not resolve")
            .unwrap();
    }
}
