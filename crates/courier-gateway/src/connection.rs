use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use courier_types::events::{GatewayCommand, InboundFrame};
use courier_types::models::Message as ChatMessage;

use crate::delivery::{DeliveryCursor, Replay};
use crate::log::MessageLog;
use crate::registry::{Outbound, SessionRegistry};
use crate::store::ChannelStore;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Consecutive undecodable frames tolerated before the server closes the session.
const MAX_MALFORMED_FRAMES: u32 = 5;

/// Messages read from the log per replay step.
const REPLAY_PAGE: u32 = 200;

/// Replay pages buffered between the reader and the writer.
const REPLAY_QUEUE: usize = 2;

/// How long the writer gets to flush a server-initiated close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Everything a connection needs from the rest of the core.
#[derive(Clone)]
pub struct GatewayContext {
    pub registry: SessionRegistry,
    pub log: MessageLog,
    pub channels: ChannelStore,
}

/// Handle an authenticated WebSocket connection.
///
/// The token was validated and the user's channels looked up during the HTTP
/// upgrade, so the session is registered immediately and lives until either
/// side closes, the heartbeat times out, or the server shuts down.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext, user_id: Uuid, channel_ids: Vec<Uuid>) {
    let (mut sender, mut receiver) = socket.split();

    let (session, mut outbound) = ctx.registry.register(user_id, channel_ids);
    let session_id = session.id();
    info!("{} connected to gateway (session {})", user_id, session_id);

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Reader -> writer: close frame to send before hanging up
    let (close_tx, mut close_rx) = oneshot::channel::<CloseFrame>();

    // Reader -> writer: resume replays, kept apart from the bounded live queue
    let (replay_tx, mut replay_rx) = mpsc::channel::<Replay>(REPLAY_QUEUE);

    // Forward queued messages -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;
        let mut cursor = DeliveryCursor::new();
        let mut replay_open = true;

        loop {
            tokio::select! {
                biased;

                frame = &mut close_rx => {
                    if let Ok(frame) = frame {
                        let _ = sender.send(Message::Close(Some(frame))).await;
                    }
                    break;
                }
                step = replay_rx.recv(), if replay_open => {
                    let Some(step) = step else {
                        replay_open = false;
                        continue;
                    };
                    if !apply_replay(&mut sender, &mut cursor, &mut outbound, step).await {
                        break;
                    }
                }
                queued = outbound.recv() => {
                    let Some(message) = queued else {
                        // Deregistered elsewhere, e.g. server shutdown
                        let _ = sender.send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "server closing session".into(),
                        }))).await;
                        break;
                    };

                    if let Some(message) = cursor.admit_live(message) {
                        if !write_message(&mut sender, &message).await {
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read frames from client
    let recv_ctx = ctx.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut malformed: u32 = 0;

        while let Some(Ok(msg)) = receiver.next().await {
            let valid = match msg {
                Message::Text(text) => handle_text(&recv_ctx, &replay_tx, user_id, text.as_str()).await,
                Message::Binary(data) => {
                    warn!("{} sent a {} byte binary frame, discarding", user_id, data.len());
                    false
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                    continue;
                }
                Message::Close(_) => break,
                Message::Ping(_) => continue,
            };

            if valid {
                malformed = 0;
                continue;
            }

            malformed += 1;
            if malformed >= MAX_MALFORMED_FRAMES {
                warn!("{} sent {} malformed frames in a row, closing session", user_id, malformed);
                let _ = close_tx.send(CloseFrame {
                    code: close_code::POLICY,
                    reason: "too many malformed frames".into(),
                });
                return;
            }
        }
        // Dropping close_tx unblocks the writer without a close frame
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => {
            if tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err() {
                send_task.abort();
            }
        }
    }

    session.close();
    info!("{} disconnected from gateway (session {})", user_id, session_id);
}

/// Apply one replay step on the writer. Between replayed frames the live
/// queue is drained into the cursor so publishes keep finding room.
/// Returns false once the socket is gone.
async fn apply_replay(
    sender: &mut SplitSink<WebSocket, Message>,
    cursor: &mut DeliveryCursor,
    outbound: &mut mpsc::Receiver<Outbound>,
    step: Replay,
) -> bool {
    match step {
        Replay::Begin(channel_id) => cursor.start_replay(channel_id),
        Replay::Page(messages) => {
            for message in &messages {
                while let Ok(live) = outbound.try_recv() {
                    if let Some(live) = cursor.admit_live(live) {
                        if !write_message(sender, &live).await {
                            return false;
                        }
                    }
                }

                cursor.admit_replay(message);
                if !write_message(sender, message).await {
                    return false;
                }
            }
        }
        Replay::End(channel_id) => {
            for message in cursor.finish_replay(channel_id) {
                if !write_message(sender, &message).await {
                    return false;
                }
            }
        }
    }
    true
}

/// Returns false once the socket is gone. Encoding failures skip the frame.
async fn write_message(sender: &mut SplitSink<WebSocket, Message>, message: &ChatMessage) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode message {}: {}", message.id, e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

/// Returns false if the frame could not be understood.
async fn handle_text(ctx: &GatewayContext, replay_tx: &mpsc::Sender<Replay>, user_id: Uuid, text: &str) -> bool {
    match InboundFrame::parse(text) {
        InboundFrame::Command(GatewayCommand::Resume { channel_id, after_seq }) => {
            replay(ctx, replay_tx, user_id, channel_id, after_seq).await;
            true
        }
        InboundFrame::Echo(req) => {
            // REST ingest already stored and published this message
            trace!("{} echoed a message frame for channel {:?}, ignoring", user_id, req.channel_id);
            true
        }
        InboundFrame::Malformed(reason) => {
            warn!(
                "{} bad frame: {} -- raw: {}",
                user_id,
                reason,
                text.chars().take(200).collect::<String>()
            );
            false
        }
    }
}

/// Page the channel log after `after_seq` to the writer. Live frames for the
/// channel are held by the writer until `End` arrives.
async fn replay(ctx: &GatewayContext, replay_tx: &mpsc::Sender<Replay>, user_id: Uuid, channel_id: Uuid, after_seq: u64) {
    match ctx.channels.is_member(channel_id, user_id).await {
        Ok(true) => {}
        Ok(false) => {
            warn!("{} tried to resume channel {} without membership", user_id, channel_id);
            return;
        }
        Err(e) => {
            error!("Membership lookup failed during resume: {}", e);
            return;
        }
    }

    if replay_tx.send(Replay::Begin(channel_id)).await.is_err() {
        return;
    }

    let mut next_after = after_seq;
    let mut replayed = 0usize;
    loop {
        let page = match ctx.log.read_range(channel_id, next_after, Some(REPLAY_PAGE)).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Resume of channel {} for {} failed: {}", channel_id, user_id, e);
                break;
            }
        };

        let Some(last) = page.last() else { break };
        next_after = last.seq;
        replayed += page.len();
        let short = page.len() < REPLAY_PAGE as usize;

        if replay_tx.send(Replay::Page(page)).await.is_err() {
            return;
        }
        if short {
            break;
        }
    }

    debug!(
        "Replayed {} messages of channel {} after seq {} to {}",
        replayed, channel_id, after_seq, user_id
    );
    let _ = replay_tx.send(Replay::End(channel_id)).await;
}
