//! Connection registry: session and identity tracking.
//!
//! Maps live sessions to resolved identities and keeps a user → session
//! reverse index for broadcast recipient resolution. Unregistering is
//! idempotent: a disconnect notification delivered twice returns `None` the
//! second time, so host migration and counter updates can never double-run.
//!
//! The design assumes one active connection per identity. Simultaneous
//! connections for the same user are not deduplicated - the reverse index
//! keeps the most recent session (last writer wins).

use std::collections::HashMap;

use songclash_proto::UserProfile;

/// Information about a registered session.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    /// Resolved identity, present once the handshake completed
    pub profile: Option<UserProfile>,
}

impl SessionInfo {
    /// A fresh, unauthenticated session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An authenticated session bound to an identity.
    #[must_use]
    pub fn authenticated(profile: UserProfile) -> Self {
        Self { profile: Some(profile) }
    }

    /// User id, if authenticated.
    #[must_use]
    pub fn user_id(&self) -> Option<u64> {
        self.profile.as_ref().map(|p| p.user_id)
    }
}

/// Registry of live sessions.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Session id → session info
    sessions: HashMap<u64, SessionInfo>,
    /// User id → session id (reverse index, most recent session wins)
    user_sessions: HashMap<u64, u64>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session.
    ///
    /// Returns `false` if the session id already exists.
    pub fn register(&mut self, session_id: u64) -> bool {
        if self.sessions.contains_key(&session_id) {
            return false;
        }

        self.sessions.insert(session_id, SessionInfo::new());
        true
    }

    /// Bind a resolved identity to a session.
    ///
    /// Returns `false` if the session doesn't exist. A user already bound to
    /// another session is rebound here: most recent session wins.
    pub fn authenticate(&mut self, session_id: u64, profile: UserProfile) -> bool {
        let Some(info) = self.sessions.get_mut(&session_id) else {
            return false;
        };

        self.user_sessions.insert(profile.user_id, session_id);
        *info = SessionInfo::authenticated(profile);
        true
    }

    /// Unregister a session. Idempotent.
    ///
    /// Returns the session info exactly once; a second call for the same
    /// session returns `None`.
    pub fn unregister(&mut self, session_id: u64) -> Option<SessionInfo> {
        let info = self.sessions.remove(&session_id)?;

        if let Some(user_id) = info.user_id() {
            // Only drop the reverse index entry if it still points at this
            // session; a newer session for the same user keeps its binding.
            if self.user_sessions.get(&user_id) == Some(&session_id) {
                self.user_sessions.remove(&user_id);
            }
        }

        Some(info)
    }

    /// Session metadata. `None` if the session doesn't exist.
    #[must_use]
    pub fn session(&self, session_id: u64) -> Option<&SessionInfo> {
        self.sessions.get(&session_id)
    }

    /// Whether a session is registered.
    #[must_use]
    pub fn has_session(&self, session_id: u64) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Session id for a user. `None` if the user has no live session.
    #[must_use]
    pub fn session_for_user(&self, user_id: u64) -> Option<u64> {
        self.user_sessions.get(&user_id).copied()
    }

    /// Total number of registered sessions. Health surface.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: u64) -> UserProfile {
        UserProfile { user_id: id, name: format!("user-{id}"), icon: 0 }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ConnectionRegistry::new();

        assert!(registry.register(1));
        assert!(registry.has_session(1));
        assert!(!registry.has_session(2));
        assert!(registry.session(1).unwrap().profile.is_none());
    }

    #[test]
    fn duplicate_register_fails() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.register(1));
        assert!(!registry.register(1));
    }

    #[test]
    fn authenticate_binds_reverse_index() {
        let mut registry = ConnectionRegistry::new();
        registry.register(1);

        assert!(registry.authenticate(1, profile(42)));
        assert_eq!(registry.session_for_user(42), Some(1));
        assert_eq!(registry.session(1).unwrap().user_id(), Some(42));
    }

    #[test]
    fn authenticate_unknown_session_fails() {
        let mut registry = ConnectionRegistry::new();
        assert!(!registry.authenticate(99, profile(42)));
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        registry.register(1);
        registry.authenticate(1, profile(42));

        let first = registry.unregister(1);
        assert!(first.is_some());
        assert_eq!(registry.session_for_user(42), None);

        // The disconnect path guards on this None to avoid double-running
        // host migration
        let second = registry.unregister(1);
        assert!(second.is_none());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn newer_session_keeps_reverse_index_on_old_unregister() {
        let mut registry = ConnectionRegistry::new();
        registry.register(1);
        registry.authenticate(1, profile(42));

        // Same user reconnects on a new session before the old one is
        // reaped
        registry.register(2);
        registry.authenticate(2, profile(42));
        assert_eq!(registry.session_for_user(42), Some(2));

        registry.unregister(1);
        assert_eq!(registry.session_for_user(42), Some(2), "new binding survives");
    }

    #[test]
    fn session_count_tracks_lifecycle() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(registry.session_count(), 0);

        registry.register(1);
        registry.register(2);
        assert_eq!(registry.session_count(), 2);

        registry.unregister(1);
        assert_eq!(registry.session_count(), 1);
    }
}
