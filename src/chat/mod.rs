//! Chat application module for tutoring conversations about a case study.
//!
//! This module provides the session controller and REPL plumbing built on
//! top of the casebreaker client library. It supports:
//!
//! - Streaming replies with real-time display
//! - Checkpoint tagging and progress tracking
//! - Slash commands for session control
//!
//! # Architecture
//!
//! The module is organized into several components:
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: The conversation controller and its observable state
//! - [`commands`]: Slash command parsing and handling

mod commands;
mod config;
mod session;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use session::{ChatSession, ChatState, LOAD_FAILED, SEND_FAILED, welcome_message};
