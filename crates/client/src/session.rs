//! Chat session: one conversation's transcript, fed by the connection.
//!
//! The session owns the [`Transcript`] and is driven by whoever owns it (the
//! CLI loop). Every change is published as a [`SessionSnapshot`] through
//! `ArcSwap`, so observers read without locking.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use legion_protocol::{Attachment, ClientMessage, SendMessage};
use legion_transcript::{Effect, Transcript, TranscriptSnapshot};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionHandle, ConnectionState, TaggedEvent};
use crate::error::{ClientError, Result};
use crate::rest::{media_type_for, ConversationApi};

/// Everything a renderer needs, published after each change
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub conversation_id: Option<String>,
    pub transcript: TranscriptSnapshot,
    pub connection: Option<ConnectionState>,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub model: Option<String>,
    pub thinking: bool,
}

/// An attachment that could not be uploaded and was left out of the message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct SendReport {
    pub effects: Vec<Effect>,
    pub attached: Vec<Attachment>,
    pub failed_uploads: Vec<FailedUpload>,
}

pub struct ChatSession {
    api: Arc<dyn ConversationApi>,
    connection: ConnectionHandle,
    events_rx: mpsc::Receiver<TaggedEvent>,
    transcript: Transcript,
    conversation_id: Option<String>,
    /// Generation of the current socket; events from earlier connects are stale
    generation: Option<u64>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
}

impl ChatSession {
    pub fn new(
        api: Arc<dyn ConversationApi>,
        connection: ConnectionHandle,
        events_rx: mpsc::Receiver<TaggedEvent>,
    ) -> Self {
        Self {
            api,
            connection,
            events_rx,
            transcript: Transcript::new(),
            conversation_id: None,
            generation: None,
            snapshot: Arc::new(ArcSwap::from_pointee(SessionSnapshot::default())),
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.load_full()
    }

    /// Shared snapshot cell, for observers on other tasks.
    pub fn snapshot_swap(&self) -> Arc<ArcSwap<SessionSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    fn publish(&self) {
        self.snapshot.store(Arc::new(SessionSnapshot {
            conversation_id: self.conversation_id.clone(),
            transcript: self.transcript.snapshot(),
            connection: Some(self.connection.state()),
        }));
    }

    /// Select a conversation: drop the old transcript, replay history, connect.
    ///
    /// A failed history fetch leaves the transcript empty but still connects.
    pub async fn switch_conversation(&mut self, conversation_id: &str) -> Result<()> {
        self.transcript.reset();
        self.conversation_id = Some(conversation_id.to_string());
        self.generation = None;

        match self.api.history(conversation_id).await {
            Ok(messages) => {
                self.transcript.load_history(&messages);
                info!(
                    component = "session",
                    event = "session.history.replayed",
                    conversation_id = %conversation_id,
                    turns = self.transcript.turns().len(),
                    "Replayed conversation history"
                );
            }
            Err(e) => {
                warn!(
                    component = "session",
                    event = "session.history.failed",
                    conversation_id = %conversation_id,
                    error = %e,
                    "Could not load history, starting empty"
                );
            }
        }

        self.generation = Some(self.connection.connect(conversation_id).await?);
        self.publish();
        Ok(())
    }

    /// Upload attachments, record the user turn and send the message.
    ///
    /// Failed uploads are excluded and reported; the message still goes out.
    pub async fn send_message(
        &mut self,
        text: &str,
        attachments: &[PathBuf],
        options: &SendOptions,
    ) -> Result<SendReport> {
        let Some(conversation_id) = self.conversation_id.clone() else {
            return Err(ClientError::NotConnected);
        };
        if !self.connection.is_open() {
            return Err(ClientError::NotConnected);
        }

        let mut report = SendReport::default();
        for path in attachments {
            match self.api.upload(&conversation_id, path).await {
                Ok(uploaded) => {
                    report
                        .attached
                        .push(attachment_for(path, uploaded.url, uploaded.filename));
                }
                Err(e) => {
                    warn!(
                        component = "session",
                        event = "session.upload.failed",
                        path = %path.display(),
                        error = %e,
                        "Upload failed, sending without this attachment"
                    );
                    report.failed_uploads.push(FailedUpload {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let message = ClientMessage::Send(SendMessage {
            message: text.to_string(),
            thinking: options.thinking,
            model: options.model.clone().unwrap_or_default(),
            attachments: report.attached.clone(),
        });
        self.connection.send(message).await?;

        report.effects = self
            .transcript
            .push_user(text.to_string(), report.attached.clone());
        self.publish();
        Ok(report)
    }

    /// Stop the current reply locally, then ask the backend to cancel.
    pub async fn stop(&mut self) -> Vec<Effect> {
        let effects = self.transcript.stop();
        if let Err(e) = self.connection.send(ClientMessage::stop()).await {
            debug!(
                component = "session",
                event = "session.stop.not_sent",
                error = %e,
                "Stop request not delivered"
            );
        }
        self.publish();
        effects
    }

    /// Wait for the next inbound event and apply it.
    ///
    /// Returns `None` once the connection actor is gone. Stale events yield
    /// no effects.
    pub async fn next_effects(&mut self) -> Option<Vec<Effect>> {
        let tagged = self.events_rx.recv().await?;
        Some(self.apply(tagged))
    }

    /// Apply one tagged event, ignoring it unless it came from the current socket.
    ///
    /// Matching on the generation as well as the id drops frames queued by an
    /// earlier socket for the same conversation (A, then B, then A again).
    pub fn apply(&mut self, tagged: TaggedEvent) -> Vec<Effect> {
        let current = self.conversation_id.as_deref() == Some(tagged.conversation_id.as_str())
            && self.generation == Some(tagged.generation);
        if !current {
            debug!(
                component = "session",
                event = "session.event.stale",
                conversation_id = %tagged.conversation_id,
                generation = tagged.generation,
                "Ignoring event from a socket that is no longer current"
            );
            return Vec::new();
        }
        let effects = self.transcript.apply(tagged.event);
        self.publish();
        effects
    }

    /// Close the socket and forget the selection.
    pub async fn leave(&mut self) -> Result<()> {
        self.connection.disconnect().await?;
        self.conversation_id = None;
        self.generation = None;
        self.transcript.reset();
        self.publish();
        Ok(())
    }
}

fn attachment_for(path: &Path, url: String, filename: String) -> Attachment {
    let media_type = media_type_for(path);
    if media_type.starts_with("image/") {
        Attachment::image(url, filename, media_type.to_string())
    } else {
        Attachment {
            kind: "file".to_string(),
            url,
            filename,
            media_type: media_type.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use legion_protocol::{AgentConfig, Conversation, HistoryMessage, InboundEvent, UploadResponse};
    use legion_transcript::Role;
    use std::sync::Mutex;
    use tokio::sync::watch;

    use crate::connection::ConnectionCommand;

    #[derive(Default)]
    struct FakeApi {
        history: Vec<HistoryMessage>,
        fail_uploads_for: Vec<PathBuf>,
    }

    #[async_trait]
    impl ConversationApi for FakeApi {
        async fn list_conversations(&self) -> Result<Vec<Conversation>> {
            Ok(Vec::new())
        }
        async fn create_conversation(&self, _: &str, _: Option<&str>) -> Result<Conversation> {
            Err(ClientError::NotConnected)
        }
        async fn get_conversation(&self, _: &str) -> Result<Conversation> {
            Err(ClientError::NotConnected)
        }
        async fn rename_conversation(&self, _: &str, _: &str) -> Result<Conversation> {
            Err(ClientError::NotConnected)
        }
        async fn delete_conversation(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn history(&self, _: &str) -> Result<Vec<HistoryMessage>> {
            Ok(self.history.clone())
        }
        async fn agent_config(&self) -> Result<AgentConfig> {
            Err(ClientError::NotConnected)
        }
        async fn upload(&self, _: &str, path: &Path) -> Result<UploadResponse> {
            if self.fail_uploads_for.iter().any(|p| p == path) {
                return Err(ClientError::Http {
                    status: 500,
                    body: "disk full".to_string(),
                });
            }
            Ok(UploadResponse {
                url: format!("/work/{}", path.display()),
                filename: path.display().to_string(),
            })
        }
    }

    /// A stand-in connection actor that records sent messages.
    fn fake_connection(
        state: ConnectionState,
    ) -> (
        ConnectionHandle,
        mpsc::Sender<TaggedEvent>,
        mpsc::Receiver<TaggedEvent>,
        Arc<Mutex<Vec<ClientMessage>>>,
    ) {
        let (command_tx, mut command_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(state);
        let (events_tx, events_rx) = mpsc::channel(16);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&sent);
        tokio::spawn(async move {
            let _state_tx = state_tx;
            while let Some(cmd) = command_rx.recv().await {
                if let ConnectionCommand::Send { message, reply } = cmd {
                    recorded.lock().unwrap().push(message);
                    let _ = reply.send(Ok(()));
                }
            }
        });
        (
            ConnectionHandle::from_parts(command_tx, state_rx),
            events_tx,
            events_rx,
            sent,
        )
    }

    fn session_with(api: FakeApi, state: ConnectionState) -> (ChatSession, mpsc::Sender<TaggedEvent>, Arc<Mutex<Vec<ClientMessage>>>) {
        let (handle, events_tx, events_rx, sent) = fake_connection(state);
        (ChatSession::new(Arc::new(api), handle, events_rx), events_tx, sent)
    }

    #[tokio::test]
    async fn switch_replays_history_and_connects() {
        let api = FakeApi {
            history: vec![
                HistoryMessage::User {
                    content: "hi".to_string(),
                },
                HistoryMessage::ToolResult {
                    tool_call_id: "Shell:0".to_string(),
                    output: serde_json::json!("ok"),
                },
            ],
            ..Default::default()
        };
        let (mut session, _events, _sent) = session_with(api, ConnectionState::Open);

        session.switch_conversation("conv-1").await.unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(snapshot.transcript.turns.len(), 2);
        assert_eq!(snapshot.transcript.turns[0].id, "hist-0");
    }

    #[tokio::test]
    async fn send_requires_an_open_connection() {
        let (mut session, _events, sent) = session_with(FakeApi::default(), ConnectionState::Connecting);
        session.switch_conversation("conv-1").await.unwrap();

        let result = session.send_message("hello", &[], &SendOptions::default()).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
        assert!(session.transcript().turns().is_empty());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_uploads_are_excluded_and_reported() {
        let api = FakeApi {
            fail_uploads_for: vec![PathBuf::from("broken.png")],
            ..Default::default()
        };
        let (mut session, _events, sent) = session_with(api, ConnectionState::Open);
        session.switch_conversation("conv-1").await.unwrap();

        let report = session
            .send_message(
                "look",
                &[PathBuf::from("good.png"), PathBuf::from("broken.png")],
                &SendOptions {
                    model: Some("kimi".to_string()),
                    thinking: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(report.attached.len(), 1);
        assert_eq!(report.attached[0].kind, "image_url");
        assert_eq!(report.failed_uploads.len(), 1);
        assert_eq!(report.failed_uploads[0].path, PathBuf::from("broken.png"));

        let sent = sent.lock().unwrap();
        match &sent[0] {
            ClientMessage::Send(message) => {
                assert_eq!(message.message, "look");
                assert_eq!(message.attachments.len(), 1);
                assert!(message.thinking);
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert_eq!(session.transcript().turns()[0].role(), Role::User);
        assert!(session.transcript().is_streaming());
    }

    #[tokio::test]
    async fn events_for_another_conversation_are_ignored() {
        let (mut session, events, _sent) = session_with(FakeApi::default(), ConnectionState::Open);
        session.switch_conversation("conv-2").await.unwrap();

        events
            .send(TaggedEvent {
                conversation_id: "conv-1".to_string(),
                generation: 1,
                event: InboundEvent::Chunk("late".to_string()),
            })
            .await
            .unwrap();
        events
            .send(TaggedEvent {
                conversation_id: "conv-2".to_string(),
                generation: 1,
                event: InboundEvent::Chunk("fresh".to_string()),
            })
            .await
            .unwrap();

        assert!(session.next_effects().await.unwrap().is_empty());
        assert_eq!(
            session.next_effects().await.unwrap(),
            vec![Effect::TurnAppended { index: 0 }]
        );
        assert_eq!(session.snapshot().transcript.turns.len(), 1);
    }

    #[tokio::test]
    async fn frames_queued_by_an_earlier_socket_are_dropped_after_switching_back() {
        let api = FakeApi {
            history: vec![HistoryMessage::User {
                content: "hi".to_string(),
            }],
            ..Default::default()
        };
        let (mut session, events, _sent) = session_with(api, ConnectionState::Open);
        session.switch_conversation("conv-a").await.unwrap();
        let first_a = TaggedEvent {
            conversation_id: "conv-a".to_string(),
            generation: 1,
            event: InboundEvent::Chunk("from the old socket".to_string()),
        };

        session.switch_conversation("conv-b").await.unwrap();
        session.switch_conversation("conv-a").await.unwrap();
        events.send(first_a).await.unwrap();
        events
            .send(TaggedEvent {
                conversation_id: "conv-a".to_string(),
                generation: 3,
                event: InboundEvent::Chunk("live".to_string()),
            })
            .await
            .unwrap();

        assert!(session.next_effects().await.unwrap().is_empty());
        assert_eq!(session.transcript().turns().len(), 1);
        assert_eq!(
            session.next_effects().await.unwrap(),
            vec![Effect::TurnAppended { index: 1 }]
        );
        assert_eq!(session.transcript().turns()[0].id, "hist-0");
        assert_eq!(session.transcript().turns()[1].role(), Role::Assistant);
    }

    #[tokio::test]
    async fn stop_finishes_locally_and_sends_stop_frame() {
        let (mut session, _events, sent) = session_with(FakeApi::default(), ConnectionState::Open);
        session.switch_conversation("conv-1").await.unwrap();
        session
            .send_message("run it", &[], &SendOptions::default())
            .await
            .unwrap();
        session.apply(TaggedEvent {
            conversation_id: "conv-1".to_string(),
            generation: 1,
            event: InboundEvent::Chunk("working".to_string()),
        });

        let effects = session.stop().await;
        assert!(effects.contains(&Effect::StreamingFinished));
        assert!(!session.transcript().is_streaming());
        assert!(sent.lock().unwrap().iter().any(ClientMessage::is_stop));
    }
}
