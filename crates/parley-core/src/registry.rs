//! In-memory table of live gateway sessions, one per user.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use parley_models::gateway::ServerEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Work queued for a session's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    Close { code: u16, reason: String },
}

/// Addressable handle to one live session.
///
/// Cloning is cheap; every clone feeds the same writer queue. Sending never
/// blocks and never fails loudly: once the writer is gone, sends are dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    user_id: i64,
    connected_at: DateTime<Utc>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SessionHandle {
    pub fn new(user_id: i64) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            session_id: Uuid::new_v4(),
            user_id,
            connected_at: Utc::now(),
            tx,
        };
        (handle, rx)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue an event. Returns false if the session's writer has shut down.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    /// Ask the writer to close the socket with `code`.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the writer side has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_same_session(&self, other: &SessionHandle) -> bool {
        self.session_id == other.session_id
    }
}

/// Maps a user id to that user's single live session.
///
/// Every operation takes the lock once and releases it before returning, so
/// callers never hold it across an await point. Broadcasts run under the
/// same lock as the mutation that triggers them, which keeps the order of
/// presence events consistent with the order of registry changes.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<i64, SessionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<i64, SessionHandle>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<i64, SessionHandle>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `session` the addressable session for its user, returning the
    /// entry it replaced.
    pub fn register(&self, session: SessionHandle) -> Option<SessionHandle> {
        self.write().insert(session.user_id(), session)
    }

    /// Register `session` and queue `event` to every registered session,
    /// the new one included.
    pub fn register_and_broadcast(
        &self,
        session: SessionHandle,
        event: &ServerEvent,
    ) -> Option<SessionHandle> {
        let mut sessions = self.write();
        let previous = sessions.insert(session.user_id(), session);
        fan_out(sessions.values(), event);
        previous
    }

    /// Remove the entry for `session`'s user, but only if it still points at
    /// `session`. A superseded session leaves the newer entry alone.
    pub fn unregister(&self, session: &SessionHandle) -> bool {
        let mut sessions = self.write();
        remove_if_current(&mut sessions, session)
    }

    /// Like [`unregister`](Self::unregister), broadcasting `event` to the
    /// remaining sessions only when an entry was actually removed.
    pub fn unregister_and_broadcast(&self, session: &SessionHandle, event: &ServerEvent) -> bool {
        let mut sessions = self.write();
        let removed = remove_if_current(&mut sessions, session);
        if removed {
            fan_out(sessions.values(), event);
        }
        removed
    }

    pub fn lookup(&self, user_id: i64) -> Option<SessionHandle> {
        self.read().get(&user_id).cloned()
    }

    pub fn is_present(&self, user_id: i64) -> bool {
        self.read().contains_key(&user_id)
    }

    pub fn list_present(&self) -> BTreeSet<i64> {
        self.read().keys().copied().collect()
    }

    /// Queue `event` to every registered session. Returns how many accepted it.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        fan_out(self.read().values(), event)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

fn remove_if_current(sessions: &mut HashMap<i64, SessionHandle>, session: &SessionHandle) -> bool {
    match sessions.get(&session.user_id()) {
        Some(current) if current.is_same_session(session) => {
            sessions.remove(&session.user_id());
            true
        }
        _ => false,
    }
}

fn fan_out<'a>(sessions: impl Iterator<Item = &'a SessionHandle>, event: &ServerEvent) -> usize {
    sessions.filter(|session| session.send(event.clone())).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_models::presence::PresenceNotice;

    fn online(user_id: i64) -> ServerEvent {
        ServerEvent::UserOnline(PresenceNotice { user_id })
    }

    #[test]
    fn register_twice_keeps_newest() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = SessionHandle::new(1);
        let (second, _rx2) = SessionHandle::new(1);

        assert!(registry.register(first.clone()).is_none());
        let replaced = registry.register(second.clone()).unwrap();

        assert!(replaced.is_same_session(&first));
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(1).unwrap().is_same_session(&second));
    }

    #[test]
    fn stale_unregister_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = SessionHandle::new(1);
        let (second, _rx2) = SessionHandle::new(1);
        registry.register(first.clone());
        registry.register(second.clone());

        assert!(!registry.unregister(&first));
        assert!(registry.is_present(1));
        assert!(registry.unregister(&second));
        assert!(registry.lookup(1).is_none());
        assert!(!registry.unregister(&second));
    }

    #[test]
    fn list_present_reflects_keys() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = SessionHandle::new(3);
        let (b, _rb) = SessionHandle::new(1);
        registry.register(a);
        registry.register(b);
        assert_eq!(registry.list_present().into_iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn broadcast_reaches_every_session_and_skips_closed_ones() {
        let registry = ConnectionRegistry::new();
        let (a, mut ra) = SessionHandle::new(1);
        let (b, rb) = SessionHandle::new(2);
        registry.register(a);
        registry.register(b);
        drop(rb);

        assert_eq!(registry.broadcast(&online(9)), 1);
        assert_eq!(ra.try_recv().unwrap(), Outbound::Event(online(9)));
    }

    #[test]
    fn unregister_and_broadcast_only_fires_on_removal() {
        let registry = ConnectionRegistry::new();
        let (watcher, mut watcher_rx) = SessionHandle::new(1);
        let (stale, _stale_rx) = SessionHandle::new(2);
        let (fresh, _fresh_rx) = SessionHandle::new(2);
        registry.register(watcher);
        registry.register(stale.clone());
        registry.register(fresh);

        let offline = ServerEvent::UserOffline(PresenceNotice { user_id: 2 });
        assert!(!registry.unregister_and_broadcast(&stale, &offline));
        assert!(watcher_rx.try_recv().is_err());
    }

    #[test]
    fn send_after_receiver_drop_reports_closed() {
        let (handle, rx) = SessionHandle::new(5);
        drop(rx);
        assert!(handle.is_closed());
        assert!(!handle.send(online(5)));
        assert!(!handle.close(4000, "bye"));
    }
}
