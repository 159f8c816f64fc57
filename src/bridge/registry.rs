//! Identity registry.
//!
//! Owns one virtual chat identity per connected game client and the set of
//! handles the bridge controls. Every identity moves through
//! `Absent → Connecting → Active → Renaming → Disconnecting → Absent`;
//! the registry only performs the state transitions, the dispatcher does
//! the platform I/O between them.
//!
//! Owned-handles always holds the primary handle plus the handle of every
//! identity with an open session. An identity whose first session has not
//! been opened yet (connect collision pending) owns no handle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::bridge::relay::SessionId;
use crate::bridge::sanitize::handle_candidate;
use crate::common::error::{BridgeError, BridgeResult};
use crate::common::types::ClientId;

/// Default bound on handle collision retries per identity.
pub const DEFAULT_MAX_HANDLE_RETRIES: u32 = 5;

/// Lifecycle state of a live identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    /// Session requested, not yet confirmed.
    Connecting,
    /// Session open under `handle`.
    Active,
    /// Waiting for a collision retry (or an explicit rename) to settle.
    Renaming,
    /// Removed from the registry; session about to be closed.
    Disconnecting,
}

/// One game client's presence on the chat platform.
#[derive(Debug, Clone)]
pub struct Identity {
    pub client_id: ClientId,
    /// Latest name reported by the game.
    pub game_name: String,
    /// Handle currently presented (or being requested, while no session is open).
    pub handle: String,
    pub session: Option<SessionId>,
    pub state: IdentityState,
    /// Collision retries spent on the current handle.
    pub attempts: u32,
    /// Text to post once the identity first becomes active.
    pub greeting: Option<String>,
}

impl Identity {
    /// Handle to request next, given the collisions seen so far.
    pub fn candidate(&self) -> String {
        handle_candidate(&self.game_name, self.attempts)
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.state == IdentityState::Active
    }

    /// Session of an identity that can still speak: `Active`, or `Renaming`
    /// with its old session open.
    pub fn live_session(&self) -> Option<SessionId> {
        match self.state {
            IdentityState::Active | IdentityState::Renaming => self.session,
            _ => None,
        }
    }
}

/// Result of recording a handle collision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollisionOutcome {
    /// Try again with this handle.
    Retry { candidate: String, attempt: u32 },
    /// Retry budget spent.
    Exhausted { attempts: u32 },
}

/// Handles controlled by the bridge, shared with the inbound relay.
///
/// Comparison is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct OwnedHandles {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl OwnedHandles {
    pub fn contains(&self, handle: &str) -> bool {
        self.inner.read().contains(&handle.to_lowercase())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> HashSet<String> {
        self.inner.read().clone()
    }

    fn insert(&self, handle: &str) {
        self.inner.write().insert(handle.to_lowercase());
    }

    fn remove(&self, handle: &str) {
        self.inner.write().remove(&handle.to_lowercase());
    }

    fn swap(&self, old: &str, new: &str) {
        let mut set = self.inner.write();
        set.remove(&old.to_lowercase());
        set.insert(new.to_lowercase());
    }
}

#[derive(Debug)]
pub struct IdentityRegistry {
    identities: HashMap<ClientId, Identity>,
    owned: OwnedHandles,
    max_retries: u32,
}

impl IdentityRegistry {
    pub fn new(primary_handle: &str, max_retries: u32) -> Self {
        let owned = OwnedHandles::default();
        owned.insert(primary_handle);
        Self {
            identities: HashMap::new(),
            owned,
            max_retries,
        }
    }

    /// Shared view of the owned handles, for echo suppression.
    pub fn owned_handles(&self) -> OwnedHandles {
        self.owned.clone()
    }

    pub fn get(&self, client_id: ClientId) -> Option<&Identity> {
        self.identities.get(&client_id)
    }

    /// Session the client's messages are posted through, see [`Identity::live_session`].
    pub fn live_session(&self, client_id: ClientId) -> Option<SessionId> {
        self.identities.get(&client_id).and_then(Identity::live_session)
    }

    /// Live identity whose game name matches, for events that carry no client id.
    pub fn find_by_game_name(&self, name: &str) -> Option<&Identity> {
        self.identities.values().find(|i| i.game_name == name)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Absent → Connecting. Returns the first handle candidate.
    pub fn begin_connect(
        &mut self,
        client_id: ClientId,
        name: &str,
        greeting: Option<String>,
    ) -> BridgeResult<String> {
        if self.identities.contains_key(&client_id) {
            return Err(BridgeError::AlreadyLive { client_id });
        }

        let mut identity = Identity {
            client_id,
            game_name: name.to_string(),
            handle: String::new(),
            session: None,
            state: IdentityState::Connecting,
            attempts: 0,
            greeting,
        };
        identity.handle = identity.candidate();
        let candidate = identity.handle.clone();

        debug!("Client {} connecting as '{}'", client_id, candidate);
        self.identities.insert(client_id, identity);
        Ok(candidate)
    }

    /// Connecting/Renaming → Active once the first session is open.
    ///
    /// Returns the pending greeting, if any.
    pub fn activate(
        &mut self,
        client_id: ClientId,
        session: SessionId,
        handle: &str,
    ) -> BridgeResult<Option<String>> {
        let identity = self
            .identities
            .get_mut(&client_id)
            .ok_or(BridgeError::IdentityNotFound { client_id })?;

        identity.session = Some(session);
        identity.handle = handle.to_string();
        identity.state = IdentityState::Active;
        identity.attempts = 0;
        self.owned.insert(handle);

        Ok(identity.greeting.take())
    }

    /// Record that the requested handle was taken. → Renaming or exhausted.
    pub fn record_collision(&mut self, client_id: ClientId) -> BridgeResult<CollisionOutcome> {
        let identity = self
            .identities
            .get_mut(&client_id)
            .ok_or(BridgeError::IdentityNotFound { client_id })?;

        identity.attempts += 1;
        if identity.attempts > self.max_retries {
            return Ok(CollisionOutcome::Exhausted {
                attempts: identity.attempts - 1,
            });
        }

        identity.state = IdentityState::Renaming;
        if identity.session.is_none() {
            identity.handle = identity.candidate();
        }
        Ok(CollisionOutcome::Retry {
            candidate: identity.candidate(),
            attempt: identity.attempts,
        })
    }

    /// Explicit rename from the game.
    ///
    /// On an `Active` identity: → Renaming, returns the session and the new
    /// handle candidate. On an identity already waiting for a retry, only the
    /// name is updated and `None` is returned; the pending retry picks it up.
    pub fn begin_rename(
        &mut self,
        client_id: ClientId,
        new_name: &str,
    ) -> BridgeResult<Option<(SessionId, String)>> {
        let identity = self
            .identities
            .get_mut(&client_id)
            .ok_or(BridgeError::IdentityNotFound { client_id })?;

        identity.game_name = new_name.to_string();
        identity.attempts = 0;

        match (identity.state, identity.session) {
            (IdentityState::Active, Some(session)) => {
                identity.state = IdentityState::Renaming;
                Ok(Some((session, identity.candidate())))
            }
            _ => {
                if identity.session.is_none() {
                    identity.handle = identity.candidate();
                }
                Ok(None)
            }
        }
    }

    /// Renaming → Active under the new handle.
    pub fn complete_rename(&mut self, client_id: ClientId, handle: &str) -> BridgeResult<()> {
        let identity = self
            .identities
            .get_mut(&client_id)
            .ok_or(BridgeError::IdentityNotFound { client_id })?;

        self.owned.swap(&identity.handle, handle);
        identity.handle = handle.to_string();
        identity.state = IdentityState::Active;
        identity.attempts = 0;
        Ok(())
    }

    /// Renaming → Active keeping the old handle (retries exhausted on an open session).
    pub fn abort_rename(&mut self, client_id: ClientId) -> BridgeResult<()> {
        let identity = self
            .identities
            .get_mut(&client_id)
            .ok_or(BridgeError::IdentityNotFound { client_id })?;

        identity.state = IdentityState::Active;
        identity.attempts = 0;
        Ok(())
    }

    /// Any state → Absent. The returned identity is marked `Disconnecting`.
    pub fn remove(&mut self, client_id: ClientId) -> Option<Identity> {
        let mut identity = self.identities.remove(&client_id)?;
        if identity.session.is_some() {
            self.owned.remove(&identity.handle);
        }
        identity.state = IdentityState::Disconnecting;
        Some(identity)
    }

    /// Remove every identity, for shutdown.
    pub fn drain(&mut self) -> Vec<Identity> {
        let ids: Vec<ClientId> = self.identities.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}
