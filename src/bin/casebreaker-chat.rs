//! Interactive chat application for working through a case study with the
//! CaseBreaker tutor.
//!
//! # Usage
//!
//! ```bash
//! # Start a new session on case study 7
//! casebreaker-chat --case-study 7
//!
//! # Pick up this device's latest session on case study 7
//! casebreaker-chat --case-study 7 --resume
//!
//! # Continue a known session against another server
//! casebreaker-chat --session 42 --base-url http://tutor.example:8000
//! ```
//!
//! While chatting, type `/help` for the available slash commands.

use std::sync::{Arc, Mutex};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use casebreaker::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, PlainTextRenderer, Renderer, help_text,
    parse_command, welcome_message,
};
use casebreaker::{CaseBreaker, CaseStudy, DeviceIdentity, FileDeviceStore};

/// Main entry point for the casebreaker-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("casebreaker-chat [OPTIONS]");
    let config = ChatConfig::from(args);
    config.validate()?;

    let client = CaseBreaker::with_config(config.client_config()?)?;
    let identity = DeviceIdentity::new(FileDeviceStore::new(config.device_store_path()));
    let session_id = resolve_session(&client, &identity, &config).await?;

    let session = ChatSession::new(client, session_id);
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let case_study = session.load_context().await?;
    let checkpoint = config
        .checkpoint_id
        .clone()
        .or_else(|| case_study.first_checkpoint().map(|cp| cp.id.clone()));
    session.set_checkpoint(checkpoint)?;
    session.set_greeting(Some(welcome_message(&case_study)));

    println!("CaseBreaker: {} (session {})", case_study.title, session_id);
    println!("Type /help for commands, /quit to exit\n");
    if session.mount().await.is_err() {
        renderer.print_error(casebreaker::chat::LOAD_FAILED);
    }
    for message in session.messages() {
        renderer.print_message(&message);
    }

    // The token of the turn currently streaming, if any.
    let current: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
    let current_clone = Arc::clone(&current);
    ctrlc::set_handler(move || {
        if let Ok(guard) = current_clone.lock()
            && let Some(token) = guard.as_ref()
        {
            token.cancel();
        }
    })?;

    let mut rl = DefaultEditor::new()?;
    loop {
        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {}", line);
                            }
                        }
                        ChatCommand::Checkpoints => {
                            let checkpoint = session.checkpoint_id();
                            renderer.print_checkpoints(
                                &case_study,
                                &session.progress(),
                                checkpoint.as_deref(),
                            );
                        }
                        ChatCommand::Context => print_context(&case_study),
                        ChatCommand::Objectives => print_objectives(&case_study),
                        ChatCommand::Checkpoint(checkpoint) => {
                            let label = checkpoint.clone();
                            match session.set_checkpoint(checkpoint) {
                                Ok(()) => match label {
                                    Some(id) => {
                                        renderer.print_info(&format!("Checkpoint set to {id}"))
                                    }
                                    None => renderer.print_info("Checkpoint cleared."),
                                },
                                Err(err) => renderer.print_error(&err.to_string()),
                            }
                        }
                        ChatCommand::Complete(checkpoint) => {
                            match session.complete_checkpoint(&checkpoint).await {
                                Ok(progress) => renderer.print_info(&format!(
                                    "Checkpoint {checkpoint} complete ({} done).",
                                    progress.len()
                                )),
                                Err(err) => renderer.print_error(&format!(
                                    "Failed to complete checkpoint: {err}"
                                )),
                            }
                        }
                        ChatCommand::Reload => match session.mount().await {
                            Ok(()) => {
                                for message in session.messages() {
                                    renderer.print_message(&message);
                                }
                            }
                            Err(_) => renderer.print_error(casebreaker::chat::LOAD_FAILED),
                        },
                        ChatCommand::History => {
                            for message in session.messages() {
                                renderer.print_message(&message);
                            }
                        }
                        ChatCommand::Status => {
                            let state = session.state();
                            println!("    Session {}", session.session_id());
                            println!("      Case study: {}", case_study.title);
                            println!("      Messages: {}", state.messages.len());
                            println!(
                                "      Checkpoints: {}/{} complete",
                                session.progress().len(),
                                case_study.checkpoints.len()
                            );
                            match session.checkpoint_id() {
                                Some(id) => println!("      Active checkpoint: {id}"),
                                None => println!("      Active checkpoint: (none)"),
                            }
                            println!("      Assistant: {}", state.status);
                        }
                        ChatCommand::Invalid(message) => {
                            renderer.print_error(&message);
                        }
                    }
                    continue;
                }

                let token = CancellationToken::new();
                if let Ok(mut guard) = current.lock() {
                    *guard = Some(token.clone());
                }
                // Failures are reported through the renderer and the state.
                let _ = session
                    .send_message_with_cancel(line, &mut renderer, &token)
                    .await;
                if let Ok(mut guard) = current.lock() {
                    *guard = None;
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

/// Pick the session to talk in: an explicit one, this device's latest on the
/// case study, or a new one.
async fn resolve_session(
    client: &CaseBreaker,
    identity: &DeviceIdentity,
    config: &ChatConfig,
) -> casebreaker::Result<i64> {
    if let Some(session_id) = config.session_id {
        return Ok(session_id);
    }
    let Some(case_study_id) = config.case_study_id else {
        return Err(casebreaker::Error::validation(
            "either --case-study or --session is required",
            Some("case_study".to_string()),
        ));
    };
    if config.resume {
        let sessions = client.list_sessions(identity.device_id()?).await?;
        if let Some(latest) = sessions
            .iter()
            .filter(|s| s.case_study_id == case_study_id)
            .max_by_key(|s| s.id)
        {
            return Ok(latest.id);
        }
    }
    Ok(client.start_session(case_study_id, identity).await?.id)
}

fn print_context(case_study: &CaseStudy) {
    let context = &case_study.context_materials;
    println!("    Background:");
    for line in context.background.lines() {
        println!("      {line}");
    }
    if !context.key_concepts.is_empty() {
        println!("    Key concepts:");
        for concept in &context.key_concepts {
            println!("      - {concept}");
        }
    }
    if !context.required_reading.is_empty() {
        println!("    Required reading:");
        for line in context.required_reading.lines() {
            println!("      {line}");
        }
    }
}

fn print_objectives(case_study: &CaseStudy) {
    if case_study.learning_objectives.is_empty() {
        println!("    No learning objectives listed.");
        return;
    }
    println!("    Learning objectives:");
    for objective in &case_study.learning_objectives {
        println!("      - {objective}");
    }
}
