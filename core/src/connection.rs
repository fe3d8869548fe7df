/// Connection lifecycle: authentication and subscription gating
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Connection state of the local client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No room joined yet
    Idle,
    /// Identity step in progress
    Authenticating,
    /// Identity established, live stream
    Connected,
    /// Stream is serving cached data without a live round-trip
    Offline,
    /// Identity or subscription failed; waits for an explicit retry
    Error { reason: String },
    /// Identity revoked or signed out
    Disconnected,
}

impl ConnectionState {
    /// Whether the reconciliation engine may attach in this state
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Offline)
    }

    fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Offline => "offline",
            ConnectionState::Error { .. } => "error",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Inputs that drive the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    JoinRequested,
    IdentityEstablished,
    IdentityFailed(String),
    ServedFromCache,
    LiveUpdate,
    IdentityRevoked,
    SubscriptionFailed(String),
    RetryRequested,
}

/// Pure transition function. `None` means the event is not legal in `state`.
pub fn next(state: &ConnectionState, event: &ConnectionEvent) -> Option<ConnectionState> {
    use ConnectionEvent as E;
    use ConnectionState as S;

    match (state, event) {
        (_, E::RetryRequested) => Some(S::Authenticating),
        (S::Idle, E::JoinRequested) => Some(S::Authenticating),
        (S::Authenticating, E::IdentityEstablished) => Some(S::Connected),
        (S::Authenticating, E::IdentityFailed(reason)) => Some(S::Error {
            reason: reason.clone(),
        }),
        (S::Connected, E::ServedFromCache) => Some(S::Offline),
        (S::Offline, E::LiveUpdate) => Some(S::Connected),
        (S::Connected | S::Offline, E::IdentityRevoked) => Some(S::Disconnected),
        (S::Connected | S::Offline, E::SubscriptionFailed(reason)) => Some(S::Error {
            reason: reason.clone(),
        }),
        _ => None,
    }
}

/// Owner of the connection state; readers observe it through a watch channel
pub struct ConnectionMachine {
    state: watch::Sender<ConnectionState>,
}

impl ConnectionMachine {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self { state }
    }

    /// Current state
    pub fn current(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Apply an event, rejecting illegal transitions without changing state
    pub fn fire(&self, event: ConnectionEvent) -> Result<ConnectionState> {
        let mut outcome = Err(ChatError::InvalidTransition(String::new()));
        self.state.send_if_modified(|current| match next(current, &event) {
            Some(to) => {
                info!("Connection {} -> {}", current.name(), to.name());
                let changed = *current != to;
                *current = to.clone();
                outcome = Ok(to);
                changed
            }
            None => {
                outcome = Err(ChatError::InvalidTransition(format!(
                    "{:?} is not valid while {}",
                    event,
                    current.name()
                )));
                false
            }
        });
        outcome
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let machine = ConnectionMachine::new();
        assert_eq!(machine.current(), ConnectionState::Idle);
        assert!(!machine.is_ready());

        machine.fire(ConnectionEvent::JoinRequested).unwrap();
        assert_eq!(machine.current(), ConnectionState::Authenticating);

        machine.fire(ConnectionEvent::IdentityEstablished).unwrap();
        assert!(machine.is_ready());
    }

    #[test]
    fn test_identity_failure_carries_reason() {
        let machine = ConnectionMachine::new();
        machine.fire(ConnectionEvent::JoinRequested).unwrap();
        let state = machine
            .fire(ConnectionEvent::IdentityFailed("no network".to_string()))
            .unwrap();
        assert_eq!(
            state,
            ConnectionState::Error {
                reason: "no network".to_string()
            }
        );

        // No automatic retry: only an explicit retry leaves the error state
        assert!(machine.fire(ConnectionEvent::IdentityEstablished).is_err());
        machine.fire(ConnectionEvent::RetryRequested).unwrap();
        assert_eq!(machine.current(), ConnectionState::Authenticating);
    }

    #[test]
    fn test_offline_round_trip() {
        let machine = ConnectionMachine::new();
        machine.fire(ConnectionEvent::JoinRequested).unwrap();
        machine.fire(ConnectionEvent::IdentityEstablished).unwrap();

        machine.fire(ConnectionEvent::ServedFromCache).unwrap();
        assert_eq!(machine.current(), ConnectionState::Offline);
        assert!(machine.is_ready());

        machine.fire(ConnectionEvent::LiveUpdate).unwrap();
        assert_eq!(machine.current(), ConnectionState::Connected);

        // A live update while already connected changes nothing
        assert!(machine.fire(ConnectionEvent::LiveUpdate).is_err());
        assert_eq!(machine.current(), ConnectionState::Connected);
    }

    #[test]
    fn test_revocation() {
        let machine = ConnectionMachine::new();
        assert!(machine.fire(ConnectionEvent::IdentityRevoked).is_err());

        machine.fire(ConnectionEvent::JoinRequested).unwrap();
        machine.fire(ConnectionEvent::IdentityEstablished).unwrap();
        machine.fire(ConnectionEvent::ServedFromCache).unwrap();
        machine.fire(ConnectionEvent::IdentityRevoked).unwrap();
        assert_eq!(machine.current(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_retry_from_any_state() {
        let states = [
            ConnectionState::Idle,
            ConnectionState::Authenticating,
            ConnectionState::Connected,
            ConnectionState::Offline,
            ConnectionState::Error {
                reason: "x".to_string(),
            },
            ConnectionState::Disconnected,
        ];
        for state in &states {
            assert_eq!(
                next(state, &ConnectionEvent::RetryRequested),
                Some(ConnectionState::Authenticating)
            );
        }
    }

    #[test]
    fn test_watchers_see_changes() {
        let machine = ConnectionMachine::new();
        let rx = machine.subscribe();
        machine.fire(ConnectionEvent::JoinRequested).unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Authenticating);
    }
}
