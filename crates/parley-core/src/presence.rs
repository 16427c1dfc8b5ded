use std::sync::Arc;

use parley_models::gateway::ServerEvent;
use parley_models::presence::PresenceNotice;

use crate::registry::{ConnectionRegistry, SessionHandle};

/// Online/offline notifications derived from registry membership.
///
/// Delivery is fire-and-forget: a session whose writer is gone simply misses
/// the event.
#[derive(Debug, Clone)]
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn announce_online(&self, user_id: i64) -> usize {
        self.registry
            .broadcast(&ServerEvent::UserOnline(PresenceNotice { user_id }))
    }

    pub fn announce_offline(&self, user_id: i64) -> usize {
        self.registry
            .broadcast(&ServerEvent::UserOffline(PresenceNotice { user_id }))
    }

    /// Register a freshly authenticated session and announce its user to
    /// everyone, itself included. Returns the session it replaced, if any.
    pub fn session_opened(&self, session: SessionHandle) -> Option<SessionHandle> {
        let user_id = session.user_id();
        let previous = self.registry.register_and_broadcast(
            session,
            &ServerEvent::UserOnline(PresenceNotice { user_id }),
        );
        tracing::debug!(user_id, replaced = previous.is_some(), "presence: online");
        previous
    }

    /// Unregister a closing session. `user-offline` goes out only when this
    /// session was still the registered one.
    pub fn session_closed(&self, session: &SessionHandle) -> bool {
        let user_id = session.user_id();
        let removed = self.registry.unregister_and_broadcast(
            session,
            &ServerEvent::UserOffline(PresenceNotice { user_id }),
        );
        if removed {
            tracing::debug!(user_id, "presence: offline");
        } else {
            tracing::debug!(
                user_id,
                session_id = %session.session_id(),
                "presence: superseded session closed, no offline broadcast"
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Outbound;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    fn online(user_id: i64) -> Outbound {
        Outbound::Event(ServerEvent::UserOnline(PresenceNotice { user_id }))
    }

    fn offline(user_id: i64) -> Outbound {
        Outbound::Event(ServerEvent::UserOffline(PresenceNotice { user_id }))
    }

    #[test]
    fn new_session_sees_its_own_online_event() {
        let presence = PresenceBroadcaster::new(Arc::new(ConnectionRegistry::new()));
        let (a, mut ra) = SessionHandle::new(1);
        presence.session_opened(a);
        assert_eq!(drain(&mut ra), vec![online(1)]);

        let (b, mut rb) = SessionHandle::new(2);
        presence.session_opened(b);
        assert_eq!(drain(&mut ra), vec![online(2)]);
        assert_eq!(drain(&mut rb), vec![online(2)]);
    }

    #[test]
    fn disconnect_sends_exactly_one_offline_to_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceBroadcaster::new(registry.clone());
        let (a, mut ra) = SessionHandle::new(1);
        let (b, mut rb) = SessionHandle::new(2);
        let (c, mut rc) = SessionHandle::new(3);
        presence.session_opened(a);
        presence.session_opened(b.clone());
        presence.session_opened(c);
        drain(&mut ra);
        drain(&mut rb);
        drain(&mut rc);

        assert!(presence.session_closed(&b));
        assert!(!presence.session_closed(&b));

        assert_eq!(drain(&mut ra), vec![offline(2)]);
        assert_eq!(drain(&mut rc), vec![offline(2)]);
        assert!(drain(&mut rb).is_empty());
        assert!(!registry.is_present(2));
    }

    #[test]
    fn superseded_session_close_keeps_user_online() {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceBroadcaster::new(registry.clone());
        let (watcher, mut rw) = SessionHandle::new(9);
        let (old, _ro) = SessionHandle::new(1);
        let (new, _rn) = SessionHandle::new(1);
        presence.session_opened(watcher);
        presence.session_opened(old.clone());
        assert!(presence.session_opened(new).is_some());
        drain(&mut rw);

        assert!(!presence.session_closed(&old));
        assert!(registry.is_present(1));
        assert!(drain(&mut rw).is_empty());
    }

    #[test]
    fn standalone_announcements_reach_all_sessions() {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceBroadcaster::new(registry.clone());
        let (a, mut ra) = SessionHandle::new(1);
        registry.register(a);

        assert_eq!(presence.announce_online(5), 1);
        assert_eq!(presence.announce_offline(5), 1);
        assert_eq!(drain(&mut ra), vec![online(5), offline(5)]);
    }
}
