//! Chat history collaborator.
//!
//! The session store itself (SQLite, a hosted backend, …) lives outside the
//! core; the dispatch loop only calls `append_message` at each turn
//! boundary. `&mut self` expresses that stores are stateful; mutation is
//! serialised through `HistoryHandle`'s `parking_lot::Mutex`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// Contract for chat history backends.
pub trait ChatHistory: Send + 'static {
    /// Append one message to the history of `session_id`.
    ///
    /// # Errors
    /// Returns an error if the backing store rejects the write. The
    /// dispatch loop logs and continues — a failed history write never
    /// interrupts the audio session.
    fn append_message(&mut self, session_id: &str, role: Role, text: &str) -> Result<()>;
}

/// Thread-safe reference-counted handle to any `ChatHistory` implementor.
#[derive(Clone)]
pub struct HistoryHandle(pub Arc<Mutex<dyn ChatHistory>>);

impl HistoryHandle {
    pub fn new<H: ChatHistory>(history: H) -> Self {
        Self(Arc::new(Mutex::new(history)))
    }
}

impl std::fmt::Debug for HistoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryHandle").finish_non_exhaustive()
    }
}

/// In-memory history, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    messages: HashMap<String, Vec<(Role, String)>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages recorded for a session, in append order.
    pub fn messages(&self, session_id: &str) -> &[(Role, String)] {
        self.messages
            .get(session_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl ChatHistory for MemoryHistory {
    fn append_message(&mut self, session_id: &str, role: Role, text: &str) -> Result<()> {
        self.messages
            .entry(session_id.to_string())
            .or_default()
            .push((role, text.to_string()));
        Ok(())
    }
}
