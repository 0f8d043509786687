pub mod connection;
pub mod dispatcher;

use std::sync::Arc;

use twofold_db::Database;

use crate::dispatcher::Dispatcher;

/// Toggles for behaviour that older clients may depend on.
/// The defaults reproduce the legacy permissive, fire-and-forget behaviour.
#[derive(Debug, Clone, Copy)]
pub struct ChatPolicy {
    /// Require room membership for explicit joins and history reads.
    pub strict_membership: bool,
    /// Send `SendFailed` back to the sender when a message is not stored.
    pub ack_send_failures: bool,
    /// Allow a user to open a room with themselves.
    pub allow_self_chat: bool,
}

impl Default for ChatPolicy {
    fn default() -> Self {
        Self {
            strict_membership: false,
            ack_send_failures: false,
            allow_self_chat: true,
        }
    }
}

/// Everything a live connection needs.
#[derive(Clone)]
pub struct Gateway {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub policy: ChatPolicy,
}

impl Gateway {
    pub fn new(db: Arc<Database>, policy: ChatPolicy) -> Self {
        Self {
            db,
            dispatcher: Dispatcher::new(),
            policy,
        }
    }
}
