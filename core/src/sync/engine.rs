/// Reconciliation engine: one view actor per room attachment
///
/// Stream deliveries and local commands (optimistic submit, confirm, reject)
/// are applied by a single task, so the view has one writer. Deliveries
/// already queued go first; an echo that overtakes its own submit is adopted
/// by the view when the submit lands.
use crate::chat_types::{Author, Message, MessageKey, ModerationLevel, RoomEvent};
use crate::connection::{ConnectionEvent, ConnectionMachine};
use crate::error::{ChatError, Result};
use crate::store::{MessageStore, StreamEvent, StreamUpdate, SubscribeOptions, SubscriptionGuard};
use crate::sync::view::RoomView;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type ViewSnapshot = Arc<Vec<Message>>;

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Most recent confirmed records kept in the view
    pub view_limit: usize,
    /// Max clock gap for matching a stream record to an optimistic entry
    pub dedup_tolerance: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            view_limit: crate::store::DEFAULT_SUBSCRIBE_LIMIT,
            dedup_tolerance: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
enum ViewCommand {
    Submit {
        key: MessageKey,
        content: String,
        author: Author,
        level: ModerationLevel,
        created_at: DateTime<Utc>,
    },
    Confirm {
        temp: MessageKey,
        id: String,
    },
    Reject {
        temp: MessageKey,
    },
    Stream(StreamUpdate),
    Flush(oneshot::Sender<()>),
}

pub struct ReconciliationEngine {
    store: Arc<dyn MessageStore>,
    connection: Arc<ConnectionMachine>,
    events: broadcast::Sender<RoomEvent>,
    options: EngineOptions,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn MessageStore>,
        connection: Arc<ConnectionMachine>,
        events: broadcast::Sender<RoomEvent>,
        options: EngineOptions,
    ) -> Self {
        Self {
            store,
            connection,
            events,
            options,
        }
    }

    /// Start consuming `room_id`'s stream. Requires a connected or offline state.
    pub fn attach(&self, room_id: &str) -> Result<RoomAttachment> {
        let state = self.connection.current();
        if !state.is_ready() {
            return Err(ChatError::NotConnected(format!(
                "cannot attach to {} while {:?}",
                room_id, state
            )));
        }

        let subscription = self.store.subscribe(
            room_id,
            SubscribeOptions {
                ascending: true,
                limit: self.options.view_limit,
            },
        )?;
        let (stream, guard) = subscription.split();

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ViewSnapshot::default());
        let detached = Arc::new(AtomicBool::new(false));

        let actor = ViewActor {
            view: RoomView::new(
                room_id,
                self.options.view_limit,
                self.options.dedup_tolerance,
            ),
            view_tx,
            detached: detached.clone(),
            connection: self.connection.clone(),
            events: self.events.clone(),
        };
        let task = tokio::spawn(actor.run(commands_rx, stream));

        info!("Attached to room {}", room_id);
        Ok(RoomAttachment {
            handle: AttachmentHandle {
                room_id: Arc::from(room_id),
                commands: commands_tx,
                detached,
            },
            view: view_rx,
            guard: Some(guard),
            task: Some(task),
        })
    }
}

/// Cloneable command side of an attachment, used by in-flight sends
#[derive(Clone)]
pub struct AttachmentHandle {
    room_id: Arc<str>,
    commands: mpsc::UnboundedSender<ViewCommand>,
    detached: Arc<AtomicBool>,
}

impl AttachmentHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Queue a pending entry stamped with the local clock. Never suspends.
    pub fn submit_optimistic(
        &self,
        content: String,
        author: &Author,
        level: ModerationLevel,
    ) -> Result<MessageKey> {
        let key = MessageKey::local(Uuid::new_v4().to_string());
        self.enqueue(ViewCommand::Submit {
            key: key.clone(),
            content,
            author: author.clone(),
            level,
            created_at: Utc::now(),
        })?;
        Ok(key)
    }

    pub fn confirm(&self, temp: &MessageKey, confirmed_id: &str) -> Result<()> {
        self.enqueue(ViewCommand::Confirm {
            temp: temp.clone(),
            id: confirmed_id.to_string(),
        })
    }

    pub fn reject(&self, temp: &MessageKey) -> Result<()> {
        self.enqueue(ViewCommand::Reject { temp: temp.clone() })
    }

    /// Feed one stream delivery through the view queue
    pub fn on_stream_update(&self, update: StreamUpdate) -> Result<()> {
        self.enqueue(ViewCommand::Stream(update))
    }

    /// Resolves once every command queued before it has been applied
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.enqueue(ViewCommand::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn enqueue(&self, command: ViewCommand) -> Result<()> {
        if self.is_detached() {
            return Err(ChatError::NotConnected(format!(
                "room {} is detached",
                self.room_id
            )));
        }
        self.commands
            .send(command)
            .map_err(|_| ChatError::NotConnected(format!("room {} view is closed", self.room_id)))
    }
}

/// Live attachment to one room. Detaches on drop.
pub struct RoomAttachment {
    handle: AttachmentHandle,
    view: watch::Receiver<ViewSnapshot>,
    guard: Option<SubscriptionGuard>,
    task: Option<JoinHandle<()>>,
}

impl RoomAttachment {
    pub fn room_id(&self) -> &str {
        self.handle.room_id()
    }

    pub fn handle(&self) -> AttachmentHandle {
        self.handle.clone()
    }

    /// Current ordered view
    pub fn view(&self) -> ViewSnapshot {
        self.view.borrow().clone()
    }

    /// Watch the ordered view for changes
    pub fn watch_view(&self) -> watch::Receiver<ViewSnapshot> {
        self.view.clone()
    }

    pub fn is_detached(&self) -> bool {
        self.handle.is_detached()
    }

    pub fn submit_optimistic(
        &self,
        content: String,
        author: &Author,
        level: ModerationLevel,
    ) -> Result<MessageKey> {
        self.handle.submit_optimistic(content, author, level)
    }

    pub fn confirm(&self, temp: &MessageKey, confirmed_id: &str) -> Result<()> {
        self.handle.confirm(temp, confirmed_id)
    }

    pub fn reject(&self, temp: &MessageKey) -> Result<()> {
        self.handle.reject(temp)
    }

    pub fn on_stream_update(&self, update: StreamUpdate) -> Result<()> {
        self.handle.on_stream_update(update)
    }

    pub async fn flush(&self) {
        self.handle.flush().await
    }

    /// Release the subscription and stop the view actor. Idempotent.
    pub fn detach(&mut self) {
        if self.handle.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut guard) = self.guard.take() {
            guard.release();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        info!("Detached from room {}", self.handle.room_id);
    }
}

impl Drop for RoomAttachment {
    fn drop(&mut self) {
        self.detach();
    }
}

// ─── Actor ───────────────────────────────────────────────────────────────────

struct ViewActor {
    view: RoomView,
    view_tx: watch::Sender<ViewSnapshot>,
    detached: Arc<AtomicBool>,
    connection: Arc<ConnectionMachine>,
    events: broadcast::Sender<RoomEvent>,
}

impl ViewActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ViewCommand>,
        mut stream: mpsc::UnboundedReceiver<StreamEvent>,
    ) {
        let mut stream_open = true;

        loop {
            // Store deliveries already queued win over local commands
            tokio::select! {
                biased;
                event = stream.recv(), if stream_open => match event {
                    Some(StreamEvent::Update(update)) => self.handle(ViewCommand::Stream(update)),
                    Some(StreamEvent::Error(reason)) => self.stream_failed(reason),
                    None => {
                        stream_open = false;
                        self.stream_failed("subscription closed".to_string());
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        debug!("View actor for {} stopped", self.view.room_id());
    }

    fn handle(&mut self, command: ViewCommand) {
        if self.detached.load(Ordering::SeqCst) {
            debug!("Discarding {:?} after detach", command);
            return;
        }

        let changed = match command {
            ViewCommand::Submit {
                key,
                content,
                author,
                level,
                created_at,
            } => {
                self.view
                    .insert_optimistic(key, content, &author, level, created_at)
            }
            ViewCommand::Confirm { temp, id } => self.view.confirm(&temp, &id),
            ViewCommand::Reject { temp } => self.view.reject(&temp),
            ViewCommand::Stream(update) => {
                let freshness = if update.from_cache {
                    ConnectionEvent::ServedFromCache
                } else {
                    ConnectionEvent::LiveUpdate
                };
                self.transition(freshness);
                self.view.apply(&update)
            }
            ViewCommand::Flush(reply) => {
                let _ = reply.send(());
                false
            }
        };

        if changed {
            self.publish();
        }
    }

    fn stream_failed(&mut self, reason: String) {
        if self.detached.load(Ordering::SeqCst) {
            return;
        }
        warn!(
            "Stream error in room {}: {} (keeping {} messages)",
            self.view.room_id(),
            reason,
            self.view.len()
        );
        let _ = self.events.send(RoomEvent::StreamError {
            room_id: self.view.room_id().to_string(),
            reason: reason.clone(),
        });
        self.transition(ConnectionEvent::SubscriptionFailed(reason));
    }

    fn transition(&self, event: ConnectionEvent) {
        match self.connection.fire(event) {
            Ok(state) => {
                let _ = self.events.send(RoomEvent::ConnectionChanged { state });
            }
            Err(e) => debug!("Connection unchanged: {}", e),
        }
    }

    fn publish(&self) {
        let messages = self.view.messages();
        let len = messages.len();
        self.view_tx.send_replace(Arc::new(messages));
        let _ = self.events.send(RoomEvent::ViewUpdated {
            room_id: self.view.room_id().to_string(),
            len,
        });
    }
}
