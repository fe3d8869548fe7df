/// Chat client: identity, connection, room attachment, moderated sends
use crate::ai::{self, Assistant, TriggerPolicy};
use crate::chat_types::{MessageKey, MessageKind, MessageWrite, ModerationLevel, RoomEvent};
use crate::config::Config;
use crate::connection::{ConnectionEvent, ConnectionMachine, ConnectionState};
use crate::error::{ChatError, Result};
use crate::identity::{Identity, IdentityProvider};
use crate::moderation::{
    find_markup, ContentClassifier, Decision, ModerationPipeline, ModerationSession, RateLimiter,
};
use crate::store::MessageStore;
use crate::sync::{AttachmentHandle, EngineOptions, ReconciliationEngine, RoomAttachment, ViewSnapshot};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct ChatClient {
    config: Config,
    store: Arc<dyn MessageStore>,
    identity_provider: Arc<dyn IdentityProvider>,
    classifier: Option<Arc<dyn ContentClassifier>>,
    assistant: Option<Arc<dyn Assistant>>,
    connection: Arc<ConnectionMachine>,
    engine: ReconciliationEngine,
    pipeline: ModerationPipeline,
    session: ModerationSession,
    rate_limiter: RateLimiter,
    trigger: TriggerPolicy,
    events: broadcast::Sender<RoomEvent>,
    identity: Option<Identity>,
    room: Option<RoomAttachment>,
    last_room: Option<String>,
}

impl ChatClient {
    pub fn new(
        config: Config,
        store: Arc<dyn MessageStore>,
        identity_provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        let connection = Arc::new(ConnectionMachine::new());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let engine = ReconciliationEngine::new(
            store.clone(),
            connection.clone(),
            events.clone(),
            EngineOptions {
                view_limit: config.view_limit,
                dedup_tolerance: config.dedup_tolerance,
            },
        );

        Self {
            pipeline: ModerationPipeline::from_config(&config),
            rate_limiter: RateLimiter::per_minute(config.max_messages_per_minute),
            trigger: TriggerPolicy::from_config(&config),
            session: ModerationSession::new(),
            classifier: None,
            assistant: None,
            identity: None,
            room: None,
            last_room: None,
            config,
            store,
            identity_provider,
            connection,
            engine,
            events,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ContentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_assistant(mut self, assistant: Arc<dyn Assistant>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerPolicy) -> Self {
        self.trigger = trigger;
        self
    }

    // ─── Room lifecycle ──────────────────────────────────────────────────────

    /// Authenticate if needed and attach to `room_id`, leaving any current room
    pub async fn join(&mut self, room_id: &str) -> Result<()> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(ChatError::InvalidMessage("room name is empty".to_string()));
        }
        if self.session.is_banned() {
            return Err(ChatError::AutoBanned);
        }

        self.leave();
        self.last_room = Some(room_id.to_string());

        if !self.connection.is_ready() || self.identity.is_none() {
            let event = if self.connection.current() == ConnectionState::Idle {
                ConnectionEvent::JoinRequested
            } else {
                ConnectionEvent::RetryRequested
            };
            self.transition(event)?;
            self.authenticate().await?;
        }

        match self.engine.attach(room_id) {
            Ok(attachment) => {
                info!("Joined room {}", room_id);
                self.room = Some(attachment);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to subscribe to {}: {}", room_id, e);
                let _ = self.transition(ConnectionEvent::SubscriptionFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Re-run authentication and resubscribe to the last joined room
    pub async fn retry(&mut self) -> Result<()> {
        let room_id = self
            .last_room
            .clone()
            .ok_or_else(|| ChatError::NotConnected("no room to retry".to_string()))?;
        self.leave();
        self.transition(ConnectionEvent::RetryRequested)?;
        self.authenticate().await?;
        self.join(&room_id).await
    }

    /// Detach from the current room. The identity stays valid.
    pub fn leave(&mut self) {
        if let Some(mut room) = self.room.take() {
            room.detach();
            info!("Left room {}", room.room_id());
        }
    }

    /// The identity provider revoked the session: drop the room and identity
    pub fn identity_revoked(&mut self) {
        self.leave();
        self.identity = None;
        if let Err(e) = self.transition(ConnectionEvent::IdentityRevoked) {
            debug!("Identity revoked outside a session: {}", e);
        }
    }

    async fn authenticate(&mut self) -> Result<()> {
        match self.identity_provider.ensure_identity().await {
            Ok(identity) => {
                info!("👤 Signed in as {} ({})", identity.display_name, identity.uid);
                self.identity = Some(identity);
                self.transition(ConnectionEvent::IdentityEstablished)?;
                Ok(())
            }
            Err(e) => {
                error!("Identity failed: {}", e);
                let _ = self.transition(ConnectionEvent::IdentityFailed(e.to_string()));
                Err(ChatError::Authentication(e.to_string()))
            }
        }
    }

    fn transition(&self, event: ConnectionEvent) -> Result<ConnectionState> {
        let state = self.connection.fire(event)?;
        let _ = self.events.send(RoomEvent::ConnectionChanged {
            state: state.clone(),
        });
        Ok(state)
    }

    // ─── Sending ─────────────────────────────────────────────────────────────

    /// Validate, moderate and optimistically send `text`.
    ///
    /// The optimistic entry is queued before the append starts. If the echo still
    /// reaches the view first, the view adopts it and no pending copy appears.
    /// The append runs in the background and its result is available through
    /// [`PendingSend::outcome`].
    pub async fn send(&mut self, text: &str) -> Result<PendingSend> {
        if self.session.is_banned() {
            return Err(ChatError::AutoBanned);
        }
        let handle = self.ready_room()?;
        let author = self
            .identity
            .as_ref()
            .map(Identity::author)
            .ok_or_else(|| ChatError::NotConnected("no identity".to_string()))?;

        let composed = text.trim();
        if composed.is_empty() {
            return Err(ChatError::InvalidMessage("message is empty".to_string()));
        }
        let len = composed.chars().count();
        if len > self.config.max_message_len {
            return Err(ChatError::InvalidMessage(format!(
                "message is {} characters, limit is {}",
                len, self.config.max_message_len
            )));
        }
        if let Some(markup) = find_markup(composed) {
            return Err(ChatError::InvalidMessage(format!(
                "message contains {}",
                markup.describe()
            )));
        }
        if !self.rate_limiter.check(&author.id, Instant::now()) {
            return Err(ChatError::RateLimited(format!(
                "at most {} messages per minute",
                self.config.max_messages_per_minute
            )));
        }

        let decision = self
            .pipeline
            .evaluate_with(self.classifier.as_deref(), composed, &mut self.session)
            .await;
        let warning_count = self.session.warning_count();
        let level = decision.level();

        let clean_text = match decision {
            Decision::Block {
                message, auto_ban, ..
            } => {
                let _ = self.events.send(RoomEvent::Blocked {
                    message: message.clone(),
                    warning_count,
                });
                if auto_ban {
                    warn!("🚫 Auto-banned after {} warnings", warning_count);
                    self.leave();
                    let _ = self.events.send(RoomEvent::AutoBanned {
                        room_id: handle.room_id().to_string(),
                    });
                    return Err(ChatError::AutoBanned);
                }
                return Err(ChatError::ModerationBlocked(message));
            }
            Decision::Warn {
                clean_text,
                message,
            } => {
                let _ = self.events.send(RoomEvent::Warning {
                    message,
                    warning_count,
                });
                clean_text
            }
            Decision::Allow { clean_text } => clean_text,
        };

        let reply = self.assistant_job(handle.room_id(), &clean_text);
        let key = handle.submit_optimistic(clean_text.clone(), &author, level)?;
        let write = MessageWrite {
            room_id: handle.room_id().to_string(),
            author_id: author.id,
            author_name: author.name,
            content: clean_text,
            kind: MessageKind::User,
            moderation_level: level,
        };

        let task = tokio::spawn(deliver(
            self.store.clone(),
            handle,
            self.events.clone(),
            write,
            key.clone(),
            composed.to_string(),
            reply,
        ));

        Ok(PendingSend {
            key,
            level,
            composed: composed.to_string(),
            task,
        })
    }

    fn ready_room(&self) -> Result<AttachmentHandle> {
        let room = self
            .room
            .as_ref()
            .ok_or_else(|| ChatError::NotConnected("not in a room".to_string()))?;
        let state = self.connection.current();
        if !state.is_ready() {
            return Err(ChatError::NotConnected(format!("connection is {:?}", state)));
        }
        Ok(room.handle())
    }

    fn assistant_job(&mut self, room_id: &str, text: &str) -> Option<AssistantJob> {
        let assistant = self.assistant.clone()?;
        let view = self.view();
        if !self
            .trigger
            .should_respond(text, Utc::now(), ai::last_reply_at(&view))
        {
            return None;
        }
        Some(AssistantJob {
            assistant,
            prompt: ai::build_prompt(room_id, text, &view),
        })
    }

    // ─── Observation ─────────────────────────────────────────────────────────

    pub fn events(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.current()
    }

    pub fn connection(&self) -> Arc<ConnectionMachine> {
        self.connection.clone()
    }

    /// Ordered view of the current room; empty when not attached
    pub fn view(&self) -> ViewSnapshot {
        self.room
            .as_ref()
            .map(RoomAttachment::view)
            .unwrap_or_default()
    }

    /// Wait until the current room's view has applied everything queued so far
    pub async fn flush(&self) {
        if let Some(room) = &self.room {
            room.flush().await;
        }
    }

    pub fn room(&self) -> Option<&RoomAttachment> {
        self.room.as_ref()
    }

    pub fn moderation(&self) -> &ModerationSession {
        &self.session
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// A send whose append is still in flight
pub struct PendingSend {
    pub key: MessageKey,
    pub level: ModerationLevel,
    /// Text as composed, restored to the input if the write fails
    pub composed: String,
    task: JoinHandle<Result<String>>,
}

impl PendingSend {
    /// Wait for the append; resolves to the store-assigned id
    pub async fn outcome(self) -> Result<String> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ChatError::WriteFailed {
                reason: e.to_string(),
                restored_text: self.composed,
            }),
        }
    }
}

struct AssistantJob {
    assistant: Arc<dyn Assistant>,
    prompt: String,
}

async fn deliver(
    store: Arc<dyn MessageStore>,
    handle: AttachmentHandle,
    events: broadcast::Sender<RoomEvent>,
    write: MessageWrite,
    temp: MessageKey,
    composed: String,
    reply: Option<AssistantJob>,
) -> Result<String> {
    match store.append(write).await {
        Ok(id) => {
            if let Err(e) = handle.confirm(&temp, &id) {
                debug!("Confirmation for {} dropped: {}", temp, e);
            }
            if let Some(job) = reply {
                tokio::spawn(run_assistant(store, handle, job));
            }
            Ok(id)
        }
        Err(e) => {
            warn!("Send {} failed: {}", temp, e);
            if handle.reject(&temp).is_ok() {
                let _ = events.send(RoomEvent::SendFailed {
                    temp_id: temp.id.clone(),
                    restored_text: composed.clone(),
                    reason: e.to_string(),
                });
            }
            Err(ChatError::WriteFailed {
                reason: e.to_string(),
                restored_text: composed,
            })
        }
    }
}

async fn run_assistant(store: Arc<dyn MessageStore>, handle: AttachmentHandle, job: AssistantJob) {
    let reply = match job.assistant.respond(&job.prompt).await {
        Ok(reply) if !reply.trim().is_empty() => reply,
        Ok(_) => return,
        Err(e) => {
            warn!("Assistant failed: {}", e);
            return;
        }
    };
    if handle.is_detached() {
        debug!("Dropping assistant reply for detached room {}", handle.room_id());
        return;
    }

    let author = ai::assistant_author();
    let write = MessageWrite {
        room_id: handle.room_id().to_string(),
        author_id: author.id,
        author_name: author.name,
        content: reply,
        kind: MessageKind::Assistant,
        moderation_level: ModerationLevel::Clean,
    };
    if let Err(e) = store.append(write).await {
        warn!("Assistant reply not stored: {}", e);
    }
}
