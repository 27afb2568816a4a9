//! Message reconciliation.
//!
//! A [`MessageLog`] is the ordered conversation as the user sees it.  Every
//! entry carries a stable [`EntryId`] so that a streamed reply can be tied to
//! the user message that triggered it.  A [`Turn`] accumulates the reply text
//! of one send and writes it into the log after each chunk: the first chunk
//! inserts an assistant entry immediately after the turn's user message, later
//! chunks overwrite that entry with the full accumulated text.

use crate::{ChatMessage, MessageRole, TurnStatus};

/// Stable identity of a log entry.
///
/// Identifiers are never reused within one log, even across
/// [`MessageLog::replace_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

#[derive(Debug, Clone)]
struct Entry {
    id: EntryId,
    message: ChatMessage,
}

/// The ordered conversation log.
///
/// Insertion order is the only ordering; there are no sequence numbers.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<Entry>,
    next_id: u64,
}

impl MessageLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// A log holding `messages` in order.
    pub fn from_messages(messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        let mut log = Self::new();
        log.extend(messages);
        log
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the log holds no messages.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the messages in order.
    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter().map(|e| &e.message)
    }

    /// Snapshot of the messages in order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.iter().cloned().collect()
    }

    /// Look up a message by identity.
    pub fn get(&self, id: EntryId) -> Option<&ChatMessage> {
        self.position(id).map(|idx| &self.entries[idx].message)
    }

    /// Current index of an entry, if it is still in the log.
    pub fn position(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Append a message.
    pub fn push(&mut self, message: ChatMessage) -> EntryId {
        let id = self.allocate();
        self.entries.push(Entry { id, message });
        id
    }

    /// Append a user message; the returned id anchors that message's reply.
    pub fn push_user(&mut self, content: impl Into<String>, checkpoint_id: Option<String>) -> EntryId {
        self.push(ChatMessage::new(MessageRole::User, content, checkpoint_id))
    }

    /// Remove an entry.
    pub fn remove(&mut self, id: EntryId) -> Option<ChatMessage> {
        let idx = self.position(id)?;
        Some(self.entries.remove(idx).message)
    }

    /// Replace the whole log, e.g. after reloading history from the server.
    ///
    /// Identities held by in-flight turns no longer resolve afterwards.
    pub fn replace_all(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.entries.clear();
        self.extend(messages);
    }

    /// Write a reply into the log relative to its anchor.
    ///
    /// If `reply` still resolves, its content is overwritten with `text`.
    /// Otherwise a new assistant entry, tagged with the anchor's checkpoint, is
    /// inserted immediately after `anchor`, or appended at the end if the
    /// anchor is gone.  Returns the reply's identity.
    pub fn reconcile_reply(&mut self, anchor: EntryId, reply: Option<EntryId>, text: &str) -> EntryId {
        if let Some(idx) = reply.and_then(|id| self.position(id)) {
            let entry = &mut self.entries[idx];
            entry.message.content.clear();
            entry.message.content.push_str(text);
            return entry.id;
        }
        match self.position(anchor) {
            Some(idx) => {
                let checkpoint_id = self.entries[idx].message.checkpoint_id.clone();
                self.insert(idx + 1, ChatMessage::assistant(text).with_checkpoint(checkpoint_id))
            }
            None => self.push(ChatMessage::assistant(text)),
        }
    }

    /// Write a reply after the most recent user message.
    ///
    /// This is the positional rule: the reply lands in the slot following the
    /// last user message, overwriting an assistant message already there.
    /// With more than one send in flight it attributes every reply to the
    /// newest user message; [`MessageLog::reconcile_reply`] does not.
    pub fn reconcile_after_last_user(&mut self, text: &str) -> EntryId {
        let Some(user_idx) = self.entries.iter().rposition(|e| e.message.is_user()) else {
            return self.push(ChatMessage::assistant(text));
        };
        match self.entries.get_mut(user_idx + 1) {
            Some(entry) if entry.message.is_assistant() => {
                entry.message.content.clear();
                entry.message.content.push_str(text);
                entry.id
            }
            _ => self.insert(user_idx + 1, ChatMessage::assistant(text)),
        }
    }

    fn insert(&mut self, idx: usize, message: ChatMessage) -> EntryId {
        let id = self.allocate();
        self.entries.insert(idx, Entry { id, message });
        id
    }

    fn allocate(&mut self) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl Extend<ChatMessage> for MessageLog {
    fn extend<I: IntoIterator<Item = ChatMessage>>(&mut self, iter: I) {
        for message in iter {
            self.push(message);
        }
    }
}

/// The reply state of one send.
///
/// The accumulator is authoritative: each chunk appends to it and the whole
/// accumulated text is written into the log, so the reply entry always equals
/// the concatenation of the chunks received so far.
#[derive(Debug, Clone)]
pub struct Turn {
    anchor: EntryId,
    reply: Option<EntryId>,
    accumulated: String,
    status: TurnStatus,
    failed: bool,
}

impl Turn {
    /// Start a turn for the user message `anchor`.
    pub fn new(anchor: EntryId) -> Self {
        Self {
            anchor,
            reply: None,
            accumulated: String::new(),
            status: TurnStatus::default(),
            failed: false,
        }
    }

    /// Append a user message to `log` and start its turn.
    pub fn begin(log: &mut MessageLog, content: impl Into<String>, checkpoint_id: Option<String>) -> Self {
        Self::new(log.push_user(content, checkpoint_id))
    }

    /// The user message this turn answers.
    pub fn anchor(&self) -> EntryId {
        self.anchor
    }

    /// The reply entry, once the first chunk has arrived.
    pub fn reply(&self) -> Option<EntryId> {
        self.reply
    }

    /// Reply text received so far.
    pub fn text(&self) -> &str {
        &self.accumulated
    }

    /// The assistant's coarse state.
    pub fn status(&self) -> &TurnStatus {
        &self.status
    }

    /// Record a status change.
    pub fn set_status(&mut self, status: TurnStatus) {
        self.status = status;
    }

    /// Record an error reported inside the reply stream.
    pub fn fail(&mut self) {
        self.failed = true;
    }

    /// Returns true if the stream reported an error.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Returns true until the server reports the reply complete or an error.
    ///
    /// A status received after an error does not resume loading.
    pub fn is_loading(&self) -> bool {
        !self.failed && !self.status.is_complete()
    }

    /// Add a fragment and write the accumulated reply into `log`.
    pub fn apply_chunk(&mut self, log: &mut MessageLog, fragment: &str) -> EntryId {
        self.accumulated.push_str(fragment);
        let id = log.reconcile_reply(self.anchor, self.reply, &self.accumulated);
        self.reply = Some(id);
        id
    }
}
