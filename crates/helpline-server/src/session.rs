//! The chat session: participant registry, broadcast, and history mutation.
//!
//! A single actor task owns the [`HistoryStore`] and the participant map and
//! processes [`SessionCommand`]s strictly one at a time. Each command runs to
//! completion, including the snapshot write, before the next one is taken,
//! so every participant observes the same total order of events.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use helpline_shared::constants::{PARTICIPANT_QUEUE_CAPACITY, SESSION_COMMAND_CAPACITY};
use helpline_shared::types::now_millis;
use helpline_shared::{
    ChatEntry, ClientEvent, IncomingFile, IncomingMessage, ParticipantId, ServerEvent,
};
use helpline_store::HistoryStore;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::ServerError;
use crate::mailer::TranscriptDispatcher;
use crate::transcript::format_transcript;

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

/// Commands sent *into* the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Register a new participant; the reply carries its event stream.
    Connect(oneshot::Sender<Participant>),
    /// An event received from a participant.
    Event {
        participant: ParticipantId,
        event: ClientEvent,
    },
    /// The participant's connection closed.
    Disconnect(ParticipantId),
    /// Request participant and entry counts.
    Stats(oneshot::Sender<SessionStats>),
}

/// A registered participant and the events addressed to it.
///
/// The first event on `events` is always the `chat history` replay.
#[derive(Debug)]
pub struct Participant {
    pub id: ParticipantId,
    pub events: mpsc::Receiver<Arc<ServerEvent>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub participants: usize,
    pub entries: usize,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable entry point to the session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn connect(&self) -> Result<Participant, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Connect(reply)).await?;
        rx.await.map_err(|_| ServerError::SessionUnavailable)
    }

    pub async fn submit(
        &self,
        participant: ParticipantId,
        event: ClientEvent,
    ) -> Result<(), ServerError> {
        self.command(SessionCommand::Event { participant, event }).await
    }

    pub async fn disconnect(&self, participant: ParticipantId) {
        // Nothing to unregister from if the session is already gone.
        let _ = self.command(SessionCommand::Disconnect(participant)).await;
    }

    pub async fn stats(&self) -> Result<SessionStats, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Stats(reply)).await?;
        rx.await.map_err(|_| ServerError::SessionUnavailable)
    }

    /// A handle whose session task has already stopped.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    async fn command(&self, cmd: SessionCommand) -> Result<(), ServerError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| ServerError::SessionUnavailable)
    }
}

/// Spawn the session task around an already loaded history.
///
/// The task stops once every [`SessionHandle`] has been dropped.
pub fn spawn_session(history: HistoryStore, dispatcher: TranscriptDispatcher) -> SessionHandle {
    let (tx, rx) = mpsc::channel(SESSION_COMMAND_CAPACITY);
    let broadcaster = Broadcaster {
        history,
        dispatcher,
        participants: HashMap::new(),
    };
    tokio::spawn(broadcaster.run(rx));
    SessionHandle { tx }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Broadcaster {
    history: HistoryStore,
    dispatcher: TranscriptDispatcher,
    participants: HashMap<ParticipantId, mpsc::Sender<Arc<ServerEvent>>>,
}

impl Broadcaster {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        info!(entries = self.history.len(), "Chat session started");

        while let Some(cmd) = rx.recv().await {
            self.handle(cmd).await;
        }

        info!("Chat session stopped");
    }

    async fn handle(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Connect(reply) => {
                let participant = self.connect();
                if let Err(participant) = reply.send(participant) {
                    // Caller went away before the reply arrived.
                    self.participants.remove(&participant.id);
                }
            }
            SessionCommand::Event { participant, event } => match event {
                ClientEvent::Message(msg) => self.on_message(participant, msg).await,
                ClientEvent::File(file) => self.on_file(participant, file).await,
                ClientEvent::Typing(payload) => {
                    self.broadcast(ServerEvent::Typing(payload), Some(participant));
                }
                ClientEvent::EndChat => self.end_chat(participant).await,
            },
            SessionCommand::Disconnect(id) => {
                if self.participants.remove(&id).is_some() {
                    info!(
                        participant = %id,
                        participants = self.participants.len(),
                        "Participant disconnected"
                    );
                }
            }
            SessionCommand::Stats(reply) => {
                let _ = reply.send(SessionStats {
                    participants: self.participants.len(),
                    entries: self.history.len(),
                });
            }
        }
    }

    fn connect(&mut self) -> Participant {
        let id = ParticipantId::new();
        let (tx, events) = mpsc::channel(PARTICIPANT_QUEUE_CAPACITY);

        // The channel is fresh, so the replay is always first in line.
        let replay = Arc::new(ServerEvent::History(self.history.snapshot()));
        if tx.try_send(replay).is_err() {
            debug!(participant = %id, "Could not queue history replay");
        }

        self.participants.insert(id, tx);
        info!(
            participant = %id,
            participants = self.participants.len(),
            entries = self.history.len(),
            "Participant connected"
        );

        Participant { id, events }
    }

    async fn on_message(&mut self, sender: ParticipantId, msg: IncomingMessage) {
        let entry = msg.into_entry(now_millis());
        debug!(participant = %sender, role = %entry.role(), "Chat message");
        self.record(entry).await;
    }

    async fn on_file(&mut self, sender: ParticipantId, file: IncomingFile) {
        let entry = file.into_entry(now_millis());
        if let ChatEntry::File(f) = &entry {
            debug!(
                participant = %sender,
                role = %f.from,
                name = %f.name,
                mime = %f.mime_type,
                size = f.data.len(),
                "Chat file"
            );
        }
        self.record(entry).await;
    }

    /// Append then broadcast, as one step of the actor.
    async fn record(&mut self, entry: ChatEntry) {
        self.history.append(entry.clone()).await;
        self.broadcast(ServerEvent::for_entry(entry), None);
    }

    async fn end_chat(&mut self, sender: ParticipantId) {
        let entries = self.history.take().await;

        if entries.is_empty() {
            // A second `end chat` racing the first lands here.
            debug!(participant = %sender, "Chat ended with empty history, no transcript sent");
        } else {
            info!(
                participant = %sender,
                entries = entries.len(),
                to = %self.dispatcher.recipient(),
                "Chat ended, sending transcript"
            );
            let transcript = format_transcript(&entries, &Local);
            self.dispatcher.dispatch(transcript);
        }

        self.broadcast(ServerEvent::ChatEnded {}, None);
    }

    /// Best-effort delivery to every participant except `except`.
    ///
    /// A full queue drops the event for that participant only; a closed
    /// queue unregisters the participant.
    fn broadcast(&mut self, event: ServerEvent, except: Option<ParticipantId>) {
        let event = Arc::new(event);
        let mut closed = Vec::new();

        for (id, tx) in &self.participants {
            if Some(*id) == except {
                continue;
            }

            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(participant = %id, "Dropping event for slow participant");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            self.participants.remove(&id);
            debug!(participant = %id, "Removed participant with closed queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use helpline_shared::constants::{DEFAULT_ATTACHMENT_NAME, DEFAULT_MIME_TYPE};
    use helpline_shared::Role;
    use tempfile::TempDir;
    use tokio::time::timeout;

    use crate::mailer::testing::RecordingMailer;
    use crate::mailer::MailMessage;

    struct Fixture {
        session: SessionHandle,
        mail_rx: mpsc::UnboundedReceiver<MailMessage>,
        _dir: TempDir,
        path: std::path::PathBuf,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chatHistory.json");
        let history = HistoryStore::load(&path).await;
        let (mailer, mail_rx) = RecordingMailer::new();
        let dispatcher =
            TranscriptDispatcher::new(mailer, "desk@example.com", "support@example.com");

        Fixture {
            session: spawn_session(history, dispatcher),
            mail_rx,
            _dir: dir,
            path,
        }
    }

    async fn next(p: &mut Participant) -> Arc<ServerEvent> {
        timeout(Duration::from_secs(2), p.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("participant queue closed")
    }

    async fn history_of(p: &mut Participant) -> Vec<ChatEntry> {
        match next(p).await.as_ref() {
            ServerEvent::History(entries) => entries.clone(),
            other => panic!("expected chat history, got {other:?}"),
        }
    }

    fn message(from: &str, text: &str) -> ClientEvent {
        ClientEvent::Message(IncomingMessage {
            from: Some(from.to_string()),
            text: Some(text.to_string()),
        })
    }

    fn text_of(event: &ServerEvent) -> &str {
        match event {
            ServerEvent::Message(ChatEntry::Text(t)) => &t.text,
            other => panic!("expected chat message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_replays_empty_history() {
        let fx = fixture().await;
        let mut p = fx.session.connect().await.unwrap();
        assert!(history_of(&mut p).await.is_empty());
    }

    #[tokio::test]
    async fn test_message_broadcast_to_everyone_including_sender() {
        let fx = fixture().await;
        let mut customer = fx.session.connect().await.unwrap();
        let mut staff = fx.session.connect().await.unwrap();
        history_of(&mut customer).await;
        history_of(&mut staff).await;

        fx.session
            .submit(customer.id, message("customer", "<script>hi"))
            .await
            .unwrap();

        let to_sender = next(&mut customer).await;
        let to_staff = next(&mut staff).await;
        assert_eq!(text_of(&to_sender), "&lt;script&gt;hi");
        assert_eq!(to_sender, to_staff);
    }

    #[tokio::test]
    async fn test_append_then_replay_matches_persisted_order() {
        let fx = fixture().await;
        let mut sender = fx.session.connect().await.unwrap();
        history_of(&mut sender).await;

        fx.session.submit(sender.id, message("customer", "one")).await.unwrap();
        fx.session
            .submit(
                sender.id,
                ClientEvent::File(IncomingFile {
                    from: Some("staff".into()),
                    name: Some("manual.pdf".into()),
                    mime_type: Some("application/pdf".into()),
                    data: Some("JVBERi0x".into()),
                    timestamp: None,
                }),
            )
            .await
            .unwrap();
        fx.session.submit(sender.id, message("staff", "three")).await.unwrap();

        let mut late = fx.session.connect().await.unwrap();
        let replayed = history_of(&mut late).await;

        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed, HistoryStore::load(&fx.path).await.snapshot());
        assert!(replayed[1].is_file());
        assert_eq!(replayed[2].role(), Role::Staff);
    }

    #[tokio::test]
    async fn test_file_defaults_are_stored_and_broadcast() {
        let fx = fixture().await;
        let mut p = fx.session.connect().await.unwrap();
        history_of(&mut p).await;

        fx.session
            .submit(
                p.id,
                ClientEvent::File(IncomingFile {
                    data: Some("AAEC".into()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();

        match next(&mut p).await.as_ref() {
            ServerEvent::File(ChatEntry::File(f)) => {
                assert_eq!(f.from, Role::Unknown);
                assert_eq!(f.name, DEFAULT_ATTACHMENT_NAME);
                assert_eq!(f.mime_type, DEFAULT_MIME_TYPE);
            }
            other => panic!("expected chat file, got {other:?}"),
        }

        let stored = HistoryStore::load(&fx.path).await.snapshot();
        let raw = serde_json::to_value(&stored[0]).unwrap();
        assert_eq!(raw["name"], "attachment");
        assert_eq!(raw["type"], "application/octet-stream");
    }

    #[tokio::test]
    async fn test_typing_skips_sender_and_history() {
        let fx = fixture().await;
        let mut typist = fx.session.connect().await.unwrap();
        let mut watcher = fx.session.connect().await.unwrap();
        history_of(&mut typist).await;
        history_of(&mut watcher).await;

        let payload = serde_json::json!({"from": "staff"});
        fx.session
            .submit(typist.id, ClientEvent::Typing(payload.clone()))
            .await
            .unwrap();
        fx.session.submit(typist.id, message("staff", "done")).await.unwrap();

        assert_eq!(*next(&mut watcher).await, ServerEvent::Typing(payload));
        assert_eq!(text_of(&*next(&mut watcher).await), "done");
        // The typist's next event is its own message, not the typing hint.
        assert_eq!(text_of(&*next(&mut typist).await), "done");

        assert_eq!(fx.session.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_end_chat_sends_transcript_and_resets() {
        let mut fx = fixture().await;
        let mut customer = fx.session.connect().await.unwrap();
        history_of(&mut customer).await;

        fx.session
            .submit(customer.id, message("customer", "<script>hi"))
            .await
            .unwrap();
        let stored = match next(&mut customer).await.as_ref() {
            ServerEvent::Message(entry) => entry.clone(),
            other => panic!("expected chat message, got {other:?}"),
        };

        fx.session.submit(customer.id, ClientEvent::EndChat).await.unwrap();
        assert_eq!(*next(&mut customer).await, ServerEvent::ChatEnded {});

        let mail = timeout(Duration::from_secs(2), fx.mail_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let transcript = format_transcript(&[stored], &Local);
        assert!(transcript.starts_with("[CUSTOMER] &lt;script&gt;hi ("));
        assert!(!transcript.contains('\n'));
        assert!(mail.body.ends_with(&transcript));
        assert_eq!(mail.to, "support@example.com");

        assert_eq!(fx.session.stats().await.unwrap().entries, 0);
        assert!(HistoryStore::load(&fx.path).await.is_empty());

        let mut next_visitor = fx.session.connect().await.unwrap();
        assert!(history_of(&mut next_visitor).await.is_empty());
    }

    #[tokio::test]
    async fn test_second_end_chat_sends_no_transcript() {
        let mut fx = fixture().await;
        let mut p = fx.session.connect().await.unwrap();
        history_of(&mut p).await;

        fx.session.submit(p.id, message("customer", "bye")).await.unwrap();
        fx.session.submit(p.id, ClientEvent::EndChat).await.unwrap();
        fx.session.submit(p.id, ClientEvent::EndChat).await.unwrap();

        next(&mut p).await;
        assert_eq!(*next(&mut p).await, ServerEvent::ChatEnded {});
        assert_eq!(*next(&mut p).await, ServerEvent::ChatEnded {});

        // Stats round-trips through the actor, so both end-chats are done.
        fx.session.stats().await.unwrap();
        assert!(fx.mail_rx.recv().await.is_some());
        tokio::task::yield_now().await;
        assert!(fx.mail_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_senders_observe_same_order() {
        let fx = fixture().await;
        let mut observers = Vec::new();
        for _ in 0..3 {
            let mut p = fx.session.connect().await.unwrap();
            history_of(&mut p).await;
            observers.push(p);
        }

        let mut senders = Vec::new();
        for i in 0..10 {
            let session = fx.session.clone();
            senders.push(tokio::spawn(async move {
                let mut me = session.connect().await.unwrap();
                history_of(&mut me).await;
                session
                    .submit(me.id, message("customer", &format!("msg-{i}")))
                    .await
                    .unwrap();
                // Keep the queue alive until the test is done reading.
                me
            }));
        }
        let mut sender_participants = Vec::new();
        for task in senders {
            sender_participants.push(task.await.unwrap());
        }

        let mut orders = Vec::new();
        for observer in &mut observers {
            let mut seen = Vec::new();
            while seen.len() < 10 {
                if let ServerEvent::Message(ChatEntry::Text(t)) = next(observer).await.as_ref() {
                    seen.push(t.text.clone());
                }
            }
            orders.push(seen);
        }

        assert!(orders.windows(2).all(|w| w[0] == w[1]));
        let stored: Vec<String> = HistoryStore::load(&fx.path)
            .await
            .snapshot()
            .into_iter()
            .map(|e| match e {
                ChatEntry::Text(t) => t.text,
                ChatEntry::File(f) => f.name,
            })
            .collect();
        assert_eq!(stored, orders[0]);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters() {
        let fx = fixture().await;
        let a = fx.session.connect().await.unwrap();
        let _b = fx.session.connect().await.unwrap();
        assert_eq!(fx.session.stats().await.unwrap().participants, 2);

        fx.session.disconnect(a.id).await;
        let stats = fx.session.stats().await.unwrap();
        assert_eq!(stats.participants, 1);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned_on_broadcast() {
        let fx = fixture().await;
        let gone = fx.session.connect().await.unwrap();
        let mut stays = fx.session.connect().await.unwrap();
        history_of(&mut stays).await;
        let gone_id = gone.id;
        drop(gone);

        fx.session.submit(gone_id, message("customer", "anyone?")).await.unwrap();
        assert_eq!(text_of(&*next(&mut stays).await), "anyone?");
        assert_eq!(fx.session.stats().await.unwrap().participants, 1);
    }

    #[tokio::test]
    async fn test_existing_snapshot_is_replayed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chatHistory.json");
        tokio::fs::write(
            &path,
            r#"[{"from":"staff","text":"welcome back","timestamp":"2024-01-01T00:00:00.000Z"}]"#,
        )
        .await
        .unwrap();

        let (mailer, _rx) = RecordingMailer::new();
        let session = spawn_session(
            HistoryStore::load(&path).await,
            TranscriptDispatcher::new(mailer, "a@example.com", "b@example.com"),
        );

        let mut p = session.connect().await.unwrap();
        let replayed = history_of(&mut p).await;
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].role(), Role::Staff);
    }
}
