//! Per-user command cooldown ledger

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks when each user last ran a command
///
/// Entries are created and updated on dispatch and never removed, so
/// the map stays bounded by distinct-user cardinality.
#[derive(Debug, Default)]
pub struct CooldownLedger {
    last_command: HashMap<String, Instant>,
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the window and record the dispatch in one step
    ///
    /// Returns false when the user is still inside the cooldown
    /// window; the ledger is only updated when the command is allowed
    /// through, so hammering a command does not extend the cooldown.
    pub fn check_and_update(&mut self, user: &str, window: Duration) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_command.get(user) {
            if now.duration_since(*last) < window {
                return false;
            }
        }
        self.last_command.insert(user.to_string(), now);
        true
    }
}
