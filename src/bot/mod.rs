//! Bot framework layered on the RPC client
//!
//! Serializes outbound sends through a single-flight action queue,
//! buffers inbound messages while the queue drains, enforces per-user
//! command cooldowns, and cleans up temporary attachment files after
//! dispatch.

pub mod cooldown;
pub mod queue;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::common::config::QueueConfig;
use crate::common::Result;
use crate::rpc::{Client, ClientEvent, IncomingMessage};

use cooldown::CooldownLedger;
use queue::{ActionQueue, QueuedAction};

/// Reply sent when a non-admin invokes an admin-only command. The
/// asymmetry with cooldown handling is deliberate: cooldown violations
/// are dropped silently, permission violations get an explicit answer.
const PERMISSION_DENIED: &str = "You are not allowed to use this command";

/// A bot command handler
#[async_trait]
pub trait Command: Send + Sync {
    async fn execute(&self, bot: &Bot, msg: &IncomingMessage) -> Result<()>;
}

struct RegisteredCommand {
    handler: Arc<dyn Command>,
    admin_only: bool,
}

/// Builder for [`Bot`]
pub struct BotBuilder {
    client: Client,
    prefix: String,
    admins: HashSet<String>,
    commands: HashMap<String, RegisteredCommand>,
    queue_config: QueueConfig,
}

impl BotBuilder {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            prefix: "!".to_string(),
            admins: HashSet::new(),
            commands: HashMap::new(),
            queue_config: QueueConfig::default(),
        }
    }

    /// Command prefix, `!` by default
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Grant a user admin rights
    pub fn admin(mut self, user: &str) -> Self {
        self.admins.insert(user.to_string());
        self
    }

    /// Register a command available to everyone
    pub fn command(mut self, name: &str, handler: impl Command + 'static) -> Self {
        self.commands.insert(
            name.to_string(),
            RegisteredCommand {
                handler: Arc::new(handler),
                admin_only: false,
            },
        );
        self
    }

    /// Register a command restricted to admins
    pub fn admin_command(mut self, name: &str, handler: impl Command + 'static) -> Self {
        self.commands.insert(
            name.to_string(),
            RegisteredCommand {
                handler: Arc::new(handler),
                admin_only: true,
            },
        );
        self
    }

    /// Override queue timing (action delay, cleanup grace, cooldown)
    pub fn queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    pub fn build(self) -> Bot {
        Bot {
            inner: Arc::new(BotInner {
                client: self.client,
                prefix: self.prefix,
                admins: self.admins,
                commands: self.commands,
                queue_config: self.queue_config,
                queue: ActionQueue::new(),
                buffered: Mutex::new(VecDeque::new()),
                cooldowns: Mutex::new(CooldownLedger::new()),
                cleanup_tasks: Mutex::new(Vec::new()),
                drain_task: Mutex::new(None),
                run_task: Mutex::new(None),
            }),
        }
    }
}

struct BotInner {
    client: Client,
    prefix: String,
    admins: HashSet<String>,
    commands: HashMap<String, RegisteredCommand>,
    queue_config: QueueConfig,
    queue: ActionQueue,
    /// Inbound messages held back while the queue drains
    buffered: Mutex<VecDeque<IncomingMessage>>,
    cooldowns: Mutex<CooldownLedger>,
    /// Delayed attachment-cleanup timers, cancelled on stop
    cleanup_tasks: Mutex<Vec<JoinHandle<()>>>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
    run_task: Mutex<Option<JoinHandle<()>>>,
}

/// A bot instance
///
/// Cheap to clone; all clones share one queue, one cooldown ledger,
/// and one client.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

impl Bot {
    /// The underlying RPC client
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Start consuming client events
    ///
    /// Spawns a task that feeds every inbound message through the
    /// command pipeline until [`Bot::stop`] is called or the event
    /// stream ends.
    pub async fn run(&self) {
        let bot = self.clone();
        let mut events = self.inner.client.subscribe();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ClientEvent::Message(msg)) => bot.handle_incoming(msg).await,
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "bot fell behind on client events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        *self.inner.run_task.lock().await = Some(task);
    }

    /// Stop event processing and cancel all pending timers
    ///
    /// Scheduled attachment cleanups are cancelled, the queue and the
    /// inbound buffer are discarded. The client connection is left to
    /// the caller.
    pub async fn stop(&self) {
        if let Some(task) = self.inner.run_task.lock().await.take() {
            task.abort();
        }
        // Cancel the inter-action delay along with the drain loop
        if let Some(task) = self.inner.drain_task.lock().await.take() {
            task.abort();
            self.inner.queue.end_drain();
        }
        for task in self.inner.cleanup_tasks.lock().await.drain(..) {
            task.abort();
        }
        self.inner.queue.clear().await;
        self.inner.buffered.lock().await.clear();
        tracing::debug!("bot stopped");
    }

    /// Feed one inbound message through the bot
    ///
    /// While the queue drains, messages are buffered and replayed in
    /// arrival order once it empties, so command side-effects never
    /// interleave with in-flight sends.
    pub async fn handle_incoming(&self, msg: IncomingMessage) {
        if self.inner.queue.is_draining() {
            self.inner.buffered.lock().await.push_back(msg);
            return;
        }
        self.process_message(&msg).await;
    }

    /// Run the command pipeline on one message
    async fn process_message(&self, msg: &IncomingMessage) {
        let Some(name) = self.parse_command_name(&msg.text) else {
            return;
        };
        let Some(command) = self.inner.commands.get(&name) else {
            tracing::debug!(command = %name, "unknown command");
            return;
        };

        if command.admin_only && !self.inner.admins.contains(&msg.source) {
            tracing::debug!(user = %msg.source, command = %name, "denied admin command");
            self.reply(msg, PERMISSION_DENIED).await;
            return;
        }

        let allowed = self
            .inner
            .cooldowns
            .lock()
            .await
            .check_and_update(&msg.source, self.inner.queue_config.cooldown());
        if !allowed {
            // Cooldown violations are dropped without a reply
            tracing::debug!(user = %msg.source, command = %name, "cooldown drop");
            return;
        }

        if let Err(e) = command.handler.execute(self, msg).await {
            tracing::warn!(command = %name, "command failed: {e}");
        }
    }

    fn parse_command_name(&self, text: &str) -> Option<String> {
        let stripped = text.strip_prefix(&self.inner.prefix)?;
        let name = stripped.split_whitespace().next()?;
        if name.is_empty() {
            return None;
        }
        Some(name.to_string())
    }

    // === Queuing API ===

    /// Queue a text message
    pub async fn send_message(&self, recipient: &str, text: &str) {
        self.enqueue(QueuedAction::SendMessage {
            recipient: recipient.to_string(),
            text: text.to_string(),
        })
        .await;
    }

    /// Queue a message with attachments
    ///
    /// Paths listed in `cleanup` are deleted after the cleanup grace
    /// period once the action has been dispatched.
    pub async fn send_message_with_attachment(
        &self,
        recipient: &str,
        text: &str,
        attachments: Vec<PathBuf>,
        cleanup: Vec<PathBuf>,
    ) {
        self.enqueue(QueuedAction::SendMessageWithAttachment {
            recipient: recipient.to_string(),
            text: text.to_string(),
            attachments,
            cleanup,
        })
        .await;
    }

    /// Queue a reaction
    pub async fn send_reaction(
        &self,
        recipient: &str,
        emoji: &str,
        target_author: &str,
        target_timestamp: u64,
    ) {
        self.enqueue(QueuedAction::SendReaction {
            recipient: recipient.to_string(),
            emoji: emoji.to_string(),
            target_author: target_author.to_string(),
            target_timestamp,
        })
        .await;
    }

    /// Queue a reply to an inbound message (group-aware)
    pub async fn reply(&self, msg: &IncomingMessage, text: &str) {
        self.send_message(msg.reply_recipient(), text).await;
    }

    /// Append an action and start the drain loop when idle
    async fn enqueue(&self, action: QueuedAction) {
        self.inner.queue.push(action).await;
        if self.inner.queue.try_begin_drain() {
            let bot = self.clone();
            let task = tokio::spawn(async move { bot.drain_loop().await });
            *self.inner.drain_task.lock().await = Some(task);
        }
    }

    // === Drain loop ===

    /// Single-flight consumer of the action queue
    ///
    /// Pops and dispatches actions head-first with a fixed delay
    /// between them. Dispatch failures are logged and the loop moves
    /// on; a failed send never blocks subsequent queued sends.
    //
    // Returns a boxed future rather than an `async fn` so its opaque
    // return type does not recurse through the queuing API
    // (drain_loop -> replay_buffered -> process_message -> reply ->
    // send_message -> enqueue -> drain_loop), which would otherwise
    // defeat `Send` inference when the drain loop is spawned.
    fn drain_loop<'a>(
        &'a self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(self.drain_loop_inner())
    }

    async fn drain_loop_inner(&self) {
        loop {
            while let Some(action) = self.inner.queue.pop().await {
                self.dispatch(action).await;
                tokio::time::sleep(self.inner.queue_config.action_delay()).await;
            }

            self.inner.queue.end_drain();
            self.replay_buffered().await;

            // An enqueue may have slipped in between the last pop and
            // releasing the guard; reclaim and keep draining if so
            if self.inner.queue.is_empty().await || !self.inner.queue.try_begin_drain() {
                break;
            }
        }
    }

    /// Replay messages buffered during the drain, in arrival order
    async fn replay_buffered(&self) {
        loop {
            let msg = self.inner.buffered.lock().await.pop_front();
            let Some(msg) = msg else { break };
            self.process_message(&msg).await;
        }
    }

    /// Dispatch one action through the client
    async fn dispatch(&self, action: QueuedAction) {
        match action {
            QueuedAction::SendMessage { recipient, text } => {
                if let Err(e) = self.inner.client.send_message(&recipient, &text, &[]).await {
                    tracing::warn!(recipient = %recipient, "send failed: {e}");
                }
            }
            QueuedAction::SendMessageWithAttachment {
                recipient,
                text,
                attachments,
                cleanup,
            } => {
                let paths: Vec<&std::path::Path> =
                    attachments.iter().map(PathBuf::as_path).collect();
                match self
                    .inner
                    .client
                    .send_message(&recipient, &text, &paths)
                    .await
                {
                    Ok(_) => self.schedule_cleanup(cleanup).await,
                    Err(e) => {
                        tracing::warn!(recipient = %recipient, "attachment send failed: {e}");
                        // The daemon never saw the files; remove them now
                        remove_files(&cleanup).await;
                    }
                }
            }
            QueuedAction::SendReaction {
                recipient,
                emoji,
                target_author,
                target_timestamp,
            } => {
                if let Err(e) = self
                    .inner
                    .client
                    .send_reaction(&recipient, &emoji, &target_author, target_timestamp, false)
                    .await
                {
                    tracing::warn!(recipient = %recipient, "reaction failed: {e}");
                }
            }
        }
    }

    /// Delete temp files after the grace period, so the daemon has
    /// finished reading them
    async fn schedule_cleanup(&self, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        let grace = self.inner.queue_config.cleanup_grace();
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            remove_files(&paths).await;
        });

        let mut tasks = self.inner.cleanup_tasks.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::debug!(path = %path.display(), "cleanup failed: {e}");
        }
    }
}
