use std::sync::Arc;

use courier_db::Database;
use courier_gateway::{Broker, ChannelStore, GatewayContext, MessageLog, SessionRegistry};

pub type AppState = Arc<AppStateInner>;

/// Token and cookie settings for the auth endpoints.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub cookie_secure: bool,
}

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub auth: AuthSettings,
    pub registry: SessionRegistry,
    pub broker: Broker,
    pub log: MessageLog,
    pub channels: ChannelStore,
}

impl AppStateInner {
    /// Wire the messaging core around an open database.
    pub fn new(db: Arc<Database>, auth: AuthSettings, session_buffer: usize) -> AppState {
        let registry = SessionRegistry::new(session_buffer);
        let broker = Broker::new(registry.clone());
        let log = MessageLog::new(db.clone(), broker.clone());
        let channels = ChannelStore::new(db.clone(), registry.clone());

        Arc::new(Self {
            db,
            auth,
            registry,
            broker,
            log,
            channels,
        })
    }

    pub fn gateway(&self) -> GatewayContext {
        GatewayContext {
            registry: self.registry.clone(),
            log: self.log.clone(),
            channels: self.channels.clone(),
        }
    }
}
