use futures::stream::{ FuturesUnordered, StreamExt };
use log::{ error, info };
use std::error::Error;
use std::io::{ self, Write };
use std::sync::Arc;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::task::JoinHandle;

use crate::boundary::ErrorBoundary;
use crate::config::persona::{ Persona, PersonaId };
use crate::llm::chat::ChatClient;
use crate::models::chat::{ Message, Sender };
use crate::session::{ ChatRooms, ChatSession, RejectReason, SubmitOutcome };

const HELP: &str =
    "Commands:\n\
  /persona <id>  switch persona (security, random, security2)\n\
  /history       show this conversation again\n\
  /clear         delete this conversation\n\
  /models        list upstream models\n\
  /retry         leave the error view\n\
  /quit          exit\n\
Anything else is sent as a message.";

#[derive(Debug, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Clear,
    Persona(String),
    History,
    Models,
    Retry,
    Quit,
    Say(String),
}

pub fn parse_command(line: &str) -> ReplCommand {
    let trimmed = line.trim();
    if !trimmed.starts_with('/') {
        return ReplCommand::Say(line.to_string());
    }
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().unwrap_or_default().trim();
    match name {
        "/help" | "/?" => ReplCommand::Help,
        "/clear" => ReplCommand::Clear,
        "/persona" => ReplCommand::Persona(arg.to_string()),
        "/history" => ReplCommand::History,
        "/models" => ReplCommand::Models,
        "/retry" => ReplCommand::Retry,
        "/quit" | "/exit" => ReplCommand::Quit,
        _ => ReplCommand::Say(line.to_string()),
    }
}

pub fn render_header<W: Write>(w: &mut W, persona: &Persona) -> io::Result<()> {
    writeln!(w, "=== {} ({}) · {} ===", persona.name, persona.id, persona.model)
}

pub fn render_message<W: Write>(w: &mut W, persona: &Persona, message: &Message) -> io::Result<()> {
    match message.sender {
        Sender::User => writeln!(w, "you > {}", message.text),
        Sender::Bot => writeln!(w, "{} > {}", persona.name, message.text),
    }
}

pub fn render_conversation<W: Write>(w: &mut W, session: &ChatSession) -> io::Result<()> {
    let persona = session.persona();
    render_header(w, persona)?;
    let history = session.history();
    if history.is_empty() {
        writeln!(w, "(no messages yet, say hello to {})", persona.name)?;
    }
    for message in &history {
        render_message(w, persona, message)?;
    }
    Ok(())
}

/// Work finished in the background while the prompt stayed live.
pub enum ReplEvent {
    Reply(Arc<ChatSession>, SubmitOutcome),
    Models(String),
}

pub fn spawn_submit(session: Arc<ChatSession>, text: String) -> JoinHandle<ReplEvent> {
    tokio::spawn(async move {
        let outcome = session.submit(&text).await;
        ReplEvent::Reply(session, outcome)
    })
}

pub fn spawn_models_listing(client: Arc<dyn ChatClient>) -> JoinHandle<ReplEvent> {
    tokio::spawn(async move {
        let listing = match client.list_models().await {
            Ok(models) =>
                serde_json::to_string_pretty(&models).unwrap_or_else(|e| format!("Could not render models: {}", e)),
            Err(e) => format!("Could not list models: {}", e),
        };
        ReplEvent::Models(listing)
    })
}

/// Terminal chat loop. Input stays live while a reply is pending; lines
/// typed meanwhile reach the session and are turned away there.
pub async fn run_repl(rooms: Arc<ChatRooms>, persona: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut current = rooms.resolve(persona).ok_or("no chat session available")?;
    let mut boundary = ErrorBoundary::new();
    let mut out = io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: FuturesUnordered<JoinHandle<ReplEvent>> = FuturesUnordered::new();

    boundary.render(&mut out, |w| {
        render_conversation(w, &current)?;
        writeln!(w, "Type /help for commands.")
    });

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_command(&line) {
                    ReplCommand::Quit => {
                        break;
                    }
                    ReplCommand::Help => boundary.render(&mut out, |w| writeln!(w, "{}", HELP)),
                    ReplCommand::Clear => {
                        current.clear().await;
                        boundary.render(&mut out, |w| writeln!(w, "History cleared."));
                    }
                    ReplCommand::Persona(raw) => {
                        let id = PersonaId::resolve(&raw);
                        if let Some(session) = rooms.get(id) {
                            current = session;
                        }
                        info!("Switched to persona {}", current.persona().id);
                        boundary.render(&mut out, |w| render_conversation(w, &current));
                    }
                    ReplCommand::History => {
                        boundary.render(&mut out, |w| render_conversation(w, &current));
                    }
                    ReplCommand::Models => {
                        pending.push(spawn_models_listing(Arc::clone(rooms.client())));
                    }
                    ReplCommand::Retry => {
                        boundary.reset();
                        boundary.render(&mut out, |w| render_conversation(w, &current));
                    }
                    ReplCommand::Say(text) => {
                        pending.push(spawn_submit(Arc::clone(&current), text));
                    }
                }
            }
            Some(done) = pending.next(), if !pending.is_empty() => {
                match done {
                    Ok(ReplEvent::Reply(session, SubmitOutcome::Replied(reply))) => {
                        boundary.render(&mut out, |w| render_message(w, session.persona(), &reply));
                    }
                    Ok(ReplEvent::Reply(session, SubmitOutcome::Rejected(RejectReason::Busy))) => {
                        let name = session.persona().name.clone();
                        boundary.render(&mut out, |w| writeln!(w, "Still waiting for {} to reply...", name));
                    }
                    Ok(ReplEvent::Reply(_, SubmitOutcome::Rejected(RejectReason::EmptyInput))) => {}
                    Ok(ReplEvent::Models(listing)) => {
                        boundary.render(&mut out, |w| writeln!(w, "{}", listing));
                    }
                    Err(e) => error!("Background task failed: {}", e),
                }
            }
        }
    }

    info!("Leaving chat");
    Ok(())
}
