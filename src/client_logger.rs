//! Logging trait for CaseBreaker client operations.
//!
//! This module provides the [`ClientLogger`] trait that allows users to capture
//! and log all API interactions passing through the [`CaseBreaker`] client.
//!
//! [`CaseBreaker`]: crate::CaseBreaker

use serde_json::Value;

use crate::{ChatMessage, StreamEvent};

/// A trait for logging CaseBreaker client operations.
///
/// Implement this trait to capture and record all API interactions,
/// including the requests sent, fetched histories and individual reply
/// events.
///
/// # Example
///
/// ```rust,ignore
/// use casebreaker::{ChatMessage, ClientLogger, StreamEvent};
/// use std::io::Write;
/// use std::sync::Mutex;
///
/// struct FileLogger {
///     file: Mutex<std::fs::File>,
/// }
///
/// impl ClientLogger for FileLogger {
///     fn log_request(&self, method: &str, url: &str, body: Option<&serde_json::Value>) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "{method} {url} {body:?}").unwrap();
///     }
///
///     fn log_stream_event(&self, session_id: i64, event: &StreamEvent) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "session {session_id}: {event:?}").unwrap();
///     }
///
///     fn log_messages(&self, session_id: i64, messages: &[ChatMessage]) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "session {session_id}: {} messages", messages.len()).unwrap();
///     }
/// }
/// ```
pub trait ClientLogger: Send + Sync {
    /// Log an outgoing request.
    ///
    /// Called once per attempt, so a retried request is logged each time it
    /// is sent.
    fn log_request(&self, method: &str, url: &str, body: Option<&Value>);

    /// Log an individual reply event.
    ///
    /// Called for each [`StreamEvent`] decoded from a `send_message` reply,
    /// malformed lines included.
    fn log_stream_event(&self, session_id: i64, event: &StreamEvent);

    /// Log a fetched message history.
    fn log_messages(&self, session_id: i64, messages: &[ChatMessage]);
}
