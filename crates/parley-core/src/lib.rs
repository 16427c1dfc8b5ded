pub mod auth;
pub mod conversation;
pub mod error;
pub mod presence;
pub mod ratelimit;
pub mod registry;
pub mod relay;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use parley_db::DbPool;

use crate::auth::{IdentityVerifier, JwtVerifier};
use crate::presence::PresenceBroadcaster;
use crate::ratelimit::EventRateLimiter;
use crate::registry::ConnectionRegistry;
use crate::relay::MessageRelay;
use crate::store::{MessageStore, SqlMessageStore};

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    /// Live gateway sessions, one per user.
    pub registry: Arc<ConnectionRegistry>,
    pub presence: PresenceBroadcaster,
    pub relay: Arc<MessageRelay>,
    /// Resolves gateway handshake credentials to a user id.
    pub verifier: Arc<dyn IdentityVerifier>,
    pub event_limiter: Arc<EventRateLimiter>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let store = Arc::new(SqlMessageStore::new(db.clone()));
        Self::with_store(db, config, store)
    }

    /// Build state around a custom message store.
    pub fn with_store(db: DbPool, config: AppConfig, store: Arc<dyn MessageStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Arc::new(MessageRelay::new(
            store,
            registry.clone(),
            config.store_timeout,
        ));
        let verifier = Arc::new(JwtVerifier::new(config.jwt_secret.clone()));
        let event_limiter = Arc::new(EventRateLimiter::per_minute(config.max_events_per_minute));
        Self {
            db,
            presence: PresenceBroadcaster::new(registry.clone()),
            registry,
            relay,
            verifier,
            event_limiter,
            config,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    /// Upper bound on every store call made while relaying a message.
    pub store_timeout: Duration,
    /// Per-user inbound gateway event budget. Zero disables the limit.
    pub max_events_per_minute: u32,
    /// Close a user's older socket when a newer one registers.
    pub evict_superseded_sessions: bool,
    pub heartbeat_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_expiry_seconds: 7 * 24 * 60 * 60,
            store_timeout: Duration::from_secs(5),
            max_events_per_minute: 240,
            evict_superseded_sessions: false,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}
