//! Outbound action queue
//!
//! Side-effecting sends are serialized through a FIFO queue drained by
//! a single loop per bot instance. The queue itself is a dumb
//! container plus the drain guard; the drain loop lives in the bot.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// One queued outbound action
#[derive(Debug, Clone)]
pub enum QueuedAction {
    SendMessage {
        recipient: String,
        text: String,
    },
    SendMessageWithAttachment {
        recipient: String,
        text: String,
        attachments: Vec<PathBuf>,
        /// Temporary files to delete after the grace period
        cleanup: Vec<PathBuf>,
    },
    SendReaction {
        recipient: String,
        emoji: String,
        target_author: String,
        target_timestamp: u64,
    },
}

/// FIFO queue with a single-flight drain guard
#[derive(Debug, Default)]
pub struct ActionQueue {
    actions: Mutex<VecDeque<QueuedAction>>,
    draining: AtomicBool,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action to the tail
    pub async fn push(&self, action: QueuedAction) {
        self.actions.lock().await.push_back(action);
    }

    /// Remove and return the head action
    pub async fn pop(&self) -> Option<QueuedAction> {
        self.actions.lock().await.pop_front()
    }

    pub async fn is_empty(&self) -> bool {
        self.actions.lock().await.is_empty()
    }

    /// Discard all queued actions
    pub async fn clear(&self) {
        self.actions.lock().await.clear();
    }

    /// Claim the drain loop; returns false when one is already running
    pub fn try_begin_drain(&self) -> bool {
        !self.draining.swap(true, Ordering::SeqCst)
    }

    /// Release the drain guard
    pub fn end_drain(&self) {
        self.draining.store(false, Ordering::SeqCst);
    }

    /// Whether a drain loop is currently running
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}
