use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use courier_db::Database;
use courier_types::models::{Message, MessageDraft};

use crate::blocking;
use crate::broker::Broker;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("channel {0} not found")]
    ChannelNotFound(Uuid),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Append-only, per-channel ordered message store.
///
/// Appends to one channel are serialized by that channel's writer lock, which
/// is held across sequence assignment, the insert and the broker publish. That
/// makes publish order equal append order. Different channels never contend.
#[derive(Clone)]
pub struct MessageLog {
    inner: Arc<LogInner>,
}

struct LogInner {
    db: Arc<Database>,
    broker: Broker,
    writers: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl MessageLog {
    pub fn new(db: Arc<Database>, broker: Broker) -> Self {
        Self {
            inner: Arc::new(LogInner {
                db,
                broker,
                writers: StdMutex::new(HashMap::new()),
            }),
        }
    }

    fn writer(&self, channel_id: Uuid) -> Arc<Mutex<()>> {
        let mut writers = self.inner.writers.lock().unwrap_or_else(|e| e.into_inner());
        writers.entry(channel_id).or_default().clone()
    }

    /// Persist `draft` with the next sequence number of its channel and
    /// publish it to live subscribers exactly once.
    ///
    /// The work runs on its own task so that a caller going away mid-append
    /// cannot leave a stored message unpublished.
    pub async fn append(&self, draft: MessageDraft) -> Result<Message, LogError> {
        let log = self.clone();
        tokio::spawn(async move { log.append_locked(draft).await })
            .await
            .map_err(|e| anyhow::anyhow!("append task failed: {}", e))?
    }

    async fn append_locked(&self, draft: MessageDraft) -> Result<Message, LogError> {
        let channel_id = draft.channel_id;

        // Only known channels get a writer lock
        let exists = blocking(&self.inner.db, move |db| {
            Ok(db.get_channel(&channel_id.to_string())?.is_some())
        })
        .await?;
        if !exists {
            return Err(LogError::ChannelNotFound(channel_id));
        }

        let writer = self.writer(channel_id);
        let _guard = writer.lock().await;

        let row = blocking(&self.inner.db, move |db| {
            db.append_message(Uuid::new_v4(), &draft, Utc::now())
        })
        .await?
        .ok_or(LogError::ChannelNotFound(channel_id))?;

        let message = row.into_message()?;
        let report = self.inner.broker.publish(Arc::new(message.clone()));
        debug!(
            %channel_id,
            seq = message.seq,
            delivered = report.delivered,
            dropped = report.dropped,
            "Message appended"
        );

        Ok(message)
    }

    /// Messages of `channel_id` with `seq > after_seq` in ascending order.
    /// `limit = None` reads to the end of the log.
    pub async fn read_range(
        &self,
        channel_id: Uuid,
        after_seq: u64,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, LogError> {
        let rows = blocking(&self.inner.db, move |db| {
            let cid = channel_id.to_string();
            if db.get_channel(&cid)?.is_none() {
                return Ok(None);
            }
            db.get_messages(&cid, after_seq, limit).map(Some)
        })
        .await?
        .ok_or(LogError::ChannelNotFound(channel_id))?;

        rows.into_iter()
            .map(|row| row.into_message().map_err(LogError::from))
            .collect()
    }

    /// Highest sequence number assigned in `channel_id`, 0 for an empty log.
    pub async fn last_seq(&self, channel_id: Uuid) -> Result<u64, LogError> {
        Ok(blocking(&self.inner.db, move |db| db.last_seq(&channel_id.to_string())).await?)
    }

    pub async fn get(&self, message_id: Uuid) -> Result<Option<Message>, LogError> {
        let row = blocking(&self.inner.db, move |db| db.get_message(&message_id.to_string())).await?;
        Ok(row.map(|r| r.into_message()).transpose()?)
    }
}
