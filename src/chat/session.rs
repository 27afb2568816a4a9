//! Core chat session management.
//!
//! This module provides the `ChatSession` struct which owns the conversation
//! log of one tutoring session and drives each turn: the user message is
//! appended immediately, the reply stream is consumed, and every chunk is
//! reconciled into the log next to the message that triggered it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::ChatBackend;
use crate::error::{Error, Result};
use crate::observability::{CHAT_TURN_DURATION, CHAT_TURN_ERRORS, CHAT_TURNS};
use crate::reconcile::{MessageLog, Turn};
use crate::{CaseStudy, ChatMessage, CheckpointProgress, Renderer, StreamEvent, TurnStatus};

/// Error shown when a turn fails in transport.
pub const SEND_FAILED: &str = "Failed to send message";

/// Error shown when the history cannot be loaded.
pub const LOAD_FAILED: &str = "Failed to load messages";

/// A snapshot of what presentation renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    /// The conversation log, in order.
    pub messages: Vec<ChatMessage>,
    /// True while waiting on the network or while the assistant is composing.
    pub loading: bool,
    /// The error to display, if any.
    pub error: Option<String>,
    /// The assistant's coarse state for the current or last turn.
    pub status: TurnStatus,
}

struct Inner {
    log: MessageLog,
    loading: bool,
    error: Option<String>,
    status: TurnStatus,
    checkpoint_id: Option<String>,
    greeting: Option<String>,
    case_study: Option<CaseStudy>,
    progress: CheckpointProgress,
}

/// Marks a send as in flight until dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A chat session that manages conversation state and server interactions.
///
/// All methods take `&self`; state lives behind a mutex that is never held
/// across a suspension point, and each change is published to subscribers.
/// At most one send is in flight at a time.
pub struct ChatSession<B: ChatBackend> {
    backend: B,
    session_id: i64,
    inner: Mutex<Inner>,
    state: watch::Sender<ChatState>,
    in_flight: AtomicBool,
}

impl<B: ChatBackend> ChatSession<B> {
    /// Creates a chat session for an existing server session.
    pub fn new(backend: B, session_id: i64) -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self {
            backend,
            session_id,
            inner: Mutex::new(Inner {
                log: MessageLog::new(),
                loading: false,
                error: None,
                status: TurnStatus::default(),
                checkpoint_id: None,
                greeting: None,
                case_study: None,
                progress: CheckpointProgress::new(),
            }),
            state,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Sets the greeting shown when the session has no history.
    pub fn with_greeting(self, greeting: impl Into<String>) -> Self {
        self.set_greeting(Some(greeting.into()));
        self
    }

    /// Sets the checkpoint user messages are tagged with.
    pub fn with_checkpoint(self, checkpoint_id: Option<String>) -> Self {
        self.lock().checkpoint_id = checkpoint_id;
        self
    }

    /// The server's session identifier.
    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    /// The backend this session talks to.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Subscribe to state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    /// The current state snapshot.
    pub fn state(&self) -> ChatState {
        self.state.borrow().clone()
    }

    /// The conversation log, in order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().log.messages()
    }

    /// Returns true while a send is in flight.
    pub fn is_sending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Checkpoints the server has judged complete, as of the last refresh.
    pub fn progress(&self) -> CheckpointProgress {
        self.lock().progress.clone()
    }

    /// The case study, once loaded.
    pub fn case_study(&self) -> Option<CaseStudy> {
        self.lock().case_study.clone()
    }

    /// The checkpoint new messages are tagged with.
    pub fn checkpoint_id(&self) -> Option<String> {
        self.lock().checkpoint_id.clone()
    }

    /// Sets or clears the greeting shown when the session has no history.
    pub fn set_greeting(&self, greeting: Option<String>) {
        self.lock().greeting = greeting;
    }

    /// Switch the checkpoint new messages are tagged with.
    ///
    /// When the case study is loaded the checkpoint must be one of its own.
    pub fn set_checkpoint(&self, checkpoint_id: Option<String>) -> Result<()> {
        let mut inner = self.lock();
        if let (Some(id), Some(case_study)) = (&checkpoint_id, &inner.case_study)
            && case_study.checkpoint(id).is_none()
        {
            return Err(Error::validation(
                format!("unknown checkpoint: {id}"),
                Some("checkpoint_id".to_string()),
            ));
        }
        inner.checkpoint_id = checkpoint_id;
        Ok(())
    }

    /// Load the conversation history.
    ///
    /// An empty history with a greeting set becomes a log holding only the
    /// greeting; the greeting is never sent to the server.
    pub async fn mount(&self) -> Result<()> {
        match self.backend.get_messages(self.session_id).await {
            Ok(history) => {
                let mut inner = self.lock();
                match inner.greeting.clone().filter(|_| history.is_empty()) {
                    Some(greeting) => {
                        let greeting = ChatMessage::assistant(greeting)
                            .with_checkpoint(inner.checkpoint_id.clone());
                        inner.log.replace_all([greeting]);
                    }
                    None => inner.log.replace_all(history),
                }
                inner.error = None;
                self.publish(&inner);
                Ok(())
            }
            Err(err) => {
                warn!(session_id = self.session_id, error = %err, "failed to load messages");
                let mut inner = self.lock();
                inner.error = Some(LOAD_FAILED.to_string());
                self.publish(&inner);
                Err(err)
            }
        }
    }

    /// Fetch the session's case study and checkpoint progress.
    pub async fn load_context(&self) -> Result<CaseStudy> {
        let session = self.backend.get_session(self.session_id).await?;
        let case_study = self
            .backend
            .get_case_study(session.session.case_study_id)
            .await?;
        let mut inner = self.lock();
        inner.progress = session.progress();
        inner.case_study = Some(case_study.clone());
        Ok(case_study)
    }

    /// Refetch the checkpoints the server has judged complete.
    pub async fn refresh_progress(&self) -> Result<CheckpointProgress> {
        let session = self.backend.get_session(self.session_id).await?;
        let progress = session.progress();
        self.lock().progress = progress.clone();
        Ok(progress)
    }

    /// Explicitly complete a checkpoint, then refresh progress.
    pub async fn complete_checkpoint(&self, checkpoint_id: &str) -> Result<CheckpointProgress> {
        self.backend
            .complete_checkpoint(self.session_id, checkpoint_id)
            .await?;
        self.refresh_progress().await
    }

    /// Sends a user message and streams the response.
    ///
    /// This method:
    /// 1. Appends the user message to the log
    /// 2. Opens the reply stream
    /// 3. Reconciles reply chunks into the log as they arrive
    /// 4. Refreshes checkpoint progress
    ///
    /// # Errors
    ///
    /// Returns [`Error::SendInFlight`] without touching the log if another
    /// send is running, or the transport error if the turn failed.  An error
    /// event in the stream is not an `Err`; it is reported through the state.
    pub async fn send_message(&self, content: &str, renderer: &mut dyn Renderer) -> Result<()> {
        self.send_message_with_cancel(content, renderer, &CancellationToken::new())
            .await
    }

    /// As [`ChatSession::send_message`], stopping early when `cancel` fires.
    ///
    /// A cancelled turn keeps whatever reply was already reconciled and
    /// returns [`Error::Interrupted`].
    pub async fn send_message_with_cancel(
        &self,
        content: &str,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            return Err(Error::send_in_flight(self.session_id));
        };
        CHAT_TURNS.click();
        let start = Instant::now();

        let (mut turn, checkpoint_id) = {
            let mut inner = self.lock();
            let checkpoint_id = inner.checkpoint_id.clone();
            let turn = Turn::begin(&mut inner.log, content, checkpoint_id.clone());
            inner.error = None;
            inner.loading = true;
            inner.status = TurnStatus::Thinking;
            self.publish(&inner);
            (turn, checkpoint_id)
        };

        let result = self
            .drive_turn(&mut turn, content, checkpoint_id.as_deref(), renderer, cancel)
            .await;

        {
            let mut inner = self.lock();
            inner.loading = false;
            match &result {
                Ok(()) => {}
                Err(err) if err.is_interrupted() => inner.status = TurnStatus::Interrupted,
                Err(_) => inner.error = Some(SEND_FAILED.to_string()),
            }
            self.publish(&inner);
        }
        match &result {
            Ok(()) => renderer.finish_response(),
            Err(err) if err.is_interrupted() => renderer.print_interrupted(),
            Err(err) => {
                CHAT_TURN_ERRORS.click();
                warn!(session_id = self.session_id, error = %err, "failed to send message");
                renderer.print_error(SEND_FAILED);
            }
        }
        CHAT_TURN_DURATION.add(start.elapsed().as_secs_f64());

        if let Err(err) = self.refresh_progress().await {
            warn!(session_id = self.session_id, error = %err, "failed to refresh checkpoint progress");
        }
        result
    }

    async fn drive_turn(
        &self,
        turn: &mut Turn,
        content: &str,
        checkpoint_id: Option<&str>,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::interrupted("send cancelled before the reply started"));
            }
            stream = self.backend.send_message(self.session_id, content, checkpoint_id) => stream?,
        };
        {
            let mut inner = self.lock();
            inner.loading = false;
            self.publish(&inner);
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(Error::interrupted("reply interrupted"));
                }
                next = stream.next() => next,
            };
            let Some(event) = next else {
                break;
            };
            match event? {
                StreamEvent::Status { state, message } => {
                    renderer.print_status(&state, message.as_deref());
                    turn.set_status(state.clone());
                    let mut inner = self.lock();
                    inner.loading = turn.is_loading();
                    inner.status = state;
                    self.publish(&inner);
                }
                StreamEvent::Chunk(text) => {
                    renderer.print_text(&text);
                    let mut inner = self.lock();
                    turn.apply_chunk(&mut inner.log, &text);
                    self.publish(&inner);
                }
                StreamEvent::Error(message) => {
                    CHAT_TURN_ERRORS.click();
                    renderer.print_error(&message);
                    turn.fail();
                    let mut inner = self.lock();
                    inner.error = Some(message);
                    inner.loading = turn.is_loading();
                    self.publish(&inner);
                }
                StreamEvent::Start | StreamEvent::End => {}
                StreamEvent::Malformed { line, .. } => {
                    debug!(session_id = self.session_id, line = %line, "ignored malformed reply event");
                }
            }
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.state.send_replace(ChatState {
            messages: inner.log.messages(),
            loading: inner.loading,
            error: inner.error.clone(),
            status: inner.status.clone(),
        });
    }
}

/// The greeting shown at the start of a new session on `case_study`.
pub fn welcome_message(case_study: &CaseStudy) -> String {
    let objectives = case_study
        .learning_objectives
        .iter()
        .enumerate()
        .map(|(i, objective)| format!("{}. {}", i + 1, objective))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Welcome! I'm here to help you analyze the {}. Let's start by discussing the historical context of this landmark decision.\n\n\
         To help guide our discussion, here are some key aspects we can explore:\n\
         {}\n\n\
         Feel free to ask any questions!",
        case_study.title, objectives
    )
}
