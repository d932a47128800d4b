//! Real-time messaging core: the ordered message log, channel membership,
//! live session tracking and fan-out to connected WebSocket clients.

pub mod broker;
pub mod connection;
pub mod delivery;
pub mod log;
pub mod registry;
pub mod store;

use std::sync::Arc;

use courier_db::Database;

pub use broker::{Broker, DeliveryStats, PublishReport};
pub use connection::GatewayContext;
pub use delivery::DeliveryCursor;
pub use log::{LogError, MessageLog};
pub use registry::{SessionGuard, SessionRegistry, SessionState};
pub use store::{ChannelStore, StoreError};

/// Run a synchronous database closure on the blocking pool.
pub async fn blocking<F, T>(db: &Arc<Database>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}
