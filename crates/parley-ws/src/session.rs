use parley_core::presence::PresenceBroadcaster;
use parley_core::registry::SessionHandle;
use parley_models::gateway::CLOSE_SUPERSEDED;

/// Keeps a session registered for as long as the connection task holds it.
///
/// Dropping the guard unregisters the session and, if it was still the
/// user's current one, broadcasts `user-offline`. This also runs when the
/// connection task is cancelled or unwinds.
pub(crate) struct SessionGuard {
    presence: PresenceBroadcaster,
    handle: SessionHandle,
}

impl SessionGuard {
    pub(crate) fn open(
        presence: PresenceBroadcaster,
        handle: SessionHandle,
        evict_superseded: bool,
    ) -> Self {
        if let Some(previous) = presence.session_opened(handle.clone()) {
            if evict_superseded {
                tracing::info!(
                    user_id = previous.user_id(),
                    session_id = %previous.session_id(),
                    "gateway: evicting superseded session"
                );
                previous.close(CLOSE_SUPERSEDED, "Session replaced by a newer connection");
            } else {
                tracing::debug!(
                    user_id = previous.user_id(),
                    session_id = %previous.session_id(),
                    "gateway: session superseded, left open"
                );
            }
        }
        Self { presence, handle }
    }

    pub(crate) fn handle(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.presence.session_closed(&self.handle);
    }
}
