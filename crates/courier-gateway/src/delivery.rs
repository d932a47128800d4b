//! Ordering between resume replays and live fan-out on one session.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use courier_types::models::Message;

use crate::registry::Outbound;

/// Work the reader hands to the writer when a client resumes a channel.
/// A replay is always framed by `Begin` and `End` for the same channel.
#[derive(Debug)]
pub enum Replay {
    Begin(Uuid),
    Page(Vec<Message>),
    End(Uuid),
}

/// Tracks what one session has been sent per channel.
///
/// Live frames for a channel that is being replayed are held back and
/// released once the replay ends, minus anything the replay already covered.
/// Live frames never go out twice or behind a higher sequence number.
#[derive(Debug, Default)]
pub struct DeliveryCursor {
    last_sent: HashMap<Uuid, u64>,
    replaying: HashSet<Uuid>,
    held: VecDeque<Outbound>,
}

impl DeliveryCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sent(&self, channel_id: Uuid) -> Option<u64> {
        self.last_sent.get(&channel_id).copied()
    }

    pub fn is_replaying(&self, channel_id: Uuid) -> bool {
        self.replaying.contains(&channel_id)
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// A frame from the live queue. Returns it if it should be written now.
    pub fn admit_live(&mut self, message: Outbound) -> Option<Outbound> {
        if self.replaying.contains(&message.channel_id) {
            self.held.push_back(message);
            return None;
        }
        self.advance(message)
    }

    pub fn start_replay(&mut self, channel_id: Uuid) {
        self.replaying.insert(channel_id);
    }

    /// Replayed frames are always written; the client asked for them.
    pub fn admit_replay(&mut self, message: &Message) {
        let last = self.last_sent.entry(message.channel_id).or_insert(0);
        *last = (*last).max(message.seq);
    }

    /// End a replay and return the held live frames of that channel that
    /// still need writing, in arrival order.
    pub fn finish_replay(&mut self, channel_id: Uuid) -> Vec<Outbound> {
        self.replaying.remove(&channel_id);

        let (ready, rest): (VecDeque<_>, VecDeque<_>) =
            self.held.drain(..).partition(|m| m.channel_id == channel_id);
        self.held = rest;

        ready.into_iter().filter_map(|m| self.advance(m)).collect()
    }

    fn advance(&mut self, message: Outbound) -> Option<Outbound> {
        let last = self.last_sent.entry(message.channel_id).or_insert(0);
        if message.seq <= *last {
            return None;
        }
        *last = message.seq;
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;

    fn message(channel_id: Uuid, seq: u64) -> Message {
        Message {
            id: Uuid::new_v4(),
            channel_id,
            seq,
            sender_id: Uuid::new_v4(),
            recipient_id: None,
            text: format!("m{seq}"),
            params: None,
            widget: None,
            created_at: Utc::now(),
        }
    }

    fn live(channel_id: Uuid, seq: u64) -> Outbound {
        Arc::new(message(channel_id, seq))
    }

    #[test]
    fn live_frames_during_replay_follow_it() {
        let channel = Uuid::new_v4();
        let mut cursor = DeliveryCursor::new();
        let mut written = Vec::new();

        cursor.start_replay(channel);
        for seq in 1..=2 {
            let m = message(channel, seq);
            cursor.admit_replay(&m);
            written.push(m.seq);
        }

        // Appended while the replay is still running
        assert!(cursor.admit_live(live(channel, 4)).is_none());
        assert_eq!(cursor.held(), 1);

        let m = message(channel, 3);
        cursor.admit_replay(&m);
        written.push(m.seq);

        written.extend(cursor.finish_replay(channel).iter().map(|m| m.seq));
        assert_eq!(written, vec![1, 2, 3, 4]);
        assert!(!cursor.is_replaying(channel));
        assert_eq!(cursor.last_sent(channel), Some(4));
    }

    #[test]
    fn frames_covered_by_the_replay_are_not_repeated() {
        let channel = Uuid::new_v4();
        let mut cursor = DeliveryCursor::new();

        cursor.start_replay(channel);
        assert!(cursor.admit_live(live(channel, 3)).is_none());
        for seq in 1..=3 {
            cursor.admit_replay(&message(channel, seq));
        }
        assert!(cursor.finish_replay(channel).is_empty());

        // A stale live frame after the replay is skipped too
        assert!(cursor.admit_live(live(channel, 2)).is_none());
        assert_eq!(cursor.admit_live(live(channel, 4)).map(|m| m.seq), Some(4));
    }

    #[test]
    fn other_channels_flow_during_a_replay() {
        let replayed = Uuid::new_v4();
        let busy = Uuid::new_v4();
        let mut cursor = DeliveryCursor::new();

        cursor.start_replay(replayed);
        assert_eq!(cursor.admit_live(live(busy, 7)).map(|m| m.seq), Some(7));
        assert!(cursor.admit_live(live(replayed, 1)).is_none());

        // Finishing one channel leaves frames of another replay held
        let third = Uuid::new_v4();
        cursor.start_replay(third);
        assert!(cursor.admit_live(live(third, 1)).is_none());
        assert_eq!(cursor.finish_replay(replayed).len(), 1);
        assert_eq!(cursor.held(), 1);
        assert_eq!(cursor.finish_replay(third).len(), 1);
    }
}
