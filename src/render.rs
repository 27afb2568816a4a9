//! Output rendering for chat sessions.
//!
//! This module provides the [`Renderer`] trait the chat controller reports
//! to, and a plain-text implementation for terminals.

use std::io::{self, Stdout, Write};

use crate::{CaseStudy, ChatMessage, CheckpointProgress, MessageRole, TurnStatus};

/// ANSI escape code for dim text (used for status lines).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for bold text (used for speaker labels).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the assistant label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for completed checkpoints).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering chat output.
///
/// The chat controller calls into a renderer as a turn progresses:
/// [`Renderer::print_status`] when the assistant's state changes,
/// [`Renderer::print_text`] for every reply fragment, and
/// [`Renderer::finish_response`] once the turn is over.
pub trait Renderer: Send {
    /// Print a fragment of the assistant's reply.
    ///
    /// This is called incrementally as chunks are streamed from the server.
    fn print_text(&mut self, text: &str);

    /// Report a change of the assistant's coarse state.
    fn print_status(&mut self, status: &TurnStatus, message: Option<&str>) {
        _ = status;
        _ = message;
    }

    /// Print one complete message of the conversation log.
    fn print_message(&mut self, message: &ChatMessage);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print the checkpoints of a case study with their completion state.
    fn print_checkpoints(
        &mut self,
        case_study: &CaseStudy,
        progress: &CheckpointProgress,
        active: Option<&str>,
    );

    /// Called when a reply is complete.
    ///
    /// Used to ensure proper newlines after streaming.
    fn finish_response(&mut self);

    /// Called when the turn is interrupted by the user.
    fn print_interrupted(&mut self) {}
}

/// Plain text renderer with optional ANSI styling.
///
/// Writes to stdout unless another writer is supplied.
pub struct PlainTextRenderer<W: Write + Send = Stdout> {
    out: W,
    use_color: bool,
    in_reply: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }
}

impl<W: Write + Send> PlainTextRenderer<W> {
    /// Creates a renderer that writes to `out`.
    pub fn with_writer(out: W, use_color: bool) -> Self {
        Self {
            out,
            use_color,
            in_reply: false,
        }
    }

    /// Consume the renderer, returning its writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn styled(&self, style: &str, text: &str) -> String {
        if self.use_color {
            format!("{style}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn speaker(&self, role: MessageRole) -> String {
        match role {
            MessageRole::User => self.styled(ANSI_BOLD, "You: "),
            MessageRole::Assistant => self.styled(ANSI_CYAN, "Tutor: "),
        }
    }

    /// Terminate a partially printed reply before other output.
    fn end_reply(&mut self) {
        if self.in_reply {
            let _ = writeln!(self.out);
            self.in_reply = false;
        }
    }

    /// Flushes output to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.out.flush();
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> Renderer for PlainTextRenderer<W> {
    fn print_text(&mut self, text: &str) {
        if !self.in_reply {
            let label = self.speaker(MessageRole::Assistant);
            let _ = write!(self.out, "{label}");
            self.in_reply = true;
        }
        let _ = write!(self.out, "{text}");
        self.flush();
    }

    fn print_status(&mut self, status: &TurnStatus, message: Option<&str>) {
        if self.in_reply || status.is_complete() {
            return;
        }
        let line = match message {
            Some(message) => format!("[{status}: {message}]"),
            None => format!("[{status}]"),
        };
        let line = self.styled(ANSI_DIM, &line);
        let _ = writeln!(self.out, "{line}");
        self.flush();
    }

    fn print_message(&mut self, message: &ChatMessage) {
        self.end_reply();
        let label = self.speaker(message.role);
        let _ = writeln!(self.out, "{label}{}", message.content);
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        self.end_reply();
        let line = self.styled(ANSI_RED, &format!("Error: {error}"));
        let _ = writeln!(self.out, "{line}");
        self.flush();
    }

    fn print_info(&mut self, info: &str) {
        self.end_reply();
        let _ = writeln!(self.out, "{info}");
        self.flush();
    }

    fn print_checkpoints(
        &mut self,
        case_study: &CaseStudy,
        progress: &CheckpointProgress,
        active: Option<&str>,
    ) {
        self.end_reply();
        if case_study.checkpoints.is_empty() {
            let _ = writeln!(self.out, "No checkpoints defined for this case study.");
            self.flush();
            return;
        }
        let done = case_study
            .checkpoints
            .iter()
            .filter(|cp| progress.is_complete(&cp.id))
            .count();
        let _ = writeln!(
            self.out,
            "Checkpoints ({done}/{} complete):",
            case_study.checkpoints.len()
        );
        for checkpoint in &case_study.checkpoints {
            let mark = if progress.is_complete(&checkpoint.id) {
                self.styled(ANSI_GREEN, "[x]")
            } else {
                "[ ]".to_string()
            };
            let pointer = if active == Some(checkpoint.id.as_str()) {
                ">"
            } else {
                " "
            };
            let _ = writeln!(
                self.out,
                "{pointer} {mark} {} ({})",
                checkpoint.title, checkpoint.id
            );
        }
        self.flush();
    }

    fn finish_response(&mut self) {
        self.end_reply();
        self.flush();
    }

    fn print_interrupted(&mut self) {
        self.end_reply();
        let _ = writeln!(self.out, "[interrupted]");
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Checkpoint;

    fn render(f: impl FnOnce(&mut PlainTextRenderer<Vec<u8>>)) -> String {
        let mut renderer = PlainTextRenderer::with_writer(Vec::new(), false);
        f(&mut renderer);
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color);
    }

    #[test]
    fn renderer_without_color() {
        let renderer = PlainTextRenderer::with_color(false);
        assert!(!renderer.use_color);
    }

    #[test]
    fn streamed_reply_is_labelled_once() {
        let out = render(|r| {
            r.print_status(&TurnStatus::Thinking, None);
            r.print_text("The ");
            r.print_text("ruling");
            r.finish_response();
        });
        assert_eq!(out, "[thinking]\nTutor: The ruling\n");
    }

    #[test]
    fn error_ends_partial_reply() {
        let out = render(|r| {
            r.print_text("partial");
            r.print_error("model unavailable");
        });
        assert_eq!(out, "Tutor: partial\nError: model unavailable\n");
    }

    #[test]
    fn checkpoints_show_progress_and_active() {
        let case_study = CaseStudy {
            checkpoints: vec![
                Checkpoint {
                    id: "cp1".to_string(),
                    title: "Facts".to_string(),
                    description: String::new(),
                    hints: Vec::new(),
                },
                Checkpoint {
                    id: "cp2".to_string(),
                    title: "Holding".to_string(),
                    description: String::new(),
                    hints: Vec::new(),
                },
            ],
            ..CaseStudy::default()
        };
        let progress: CheckpointProgress = ["cp1".to_string()].into_iter().collect();
        let out = render(|r| r.print_checkpoints(&case_study, &progress, Some("cp2")));
        assert_eq!(
            out,
            "Checkpoints (1/2 complete):\n  [x] Facts (cp1)\n> [ ] Holding (cp2)\n"
        );
    }

    #[test]
    fn history_messages() {
        let out = render(|r| {
            r.print_message(&ChatMessage::user("What was the ruling?"));
            r.print_message(&ChatMessage::assistant("It was 7-2."));
        });
        assert_eq!(out, "You: What was the ruling?\nTutor: It was 7-2.\n");
    }
}
