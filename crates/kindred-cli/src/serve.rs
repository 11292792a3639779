use std::sync::Arc;

use anyhow::{Context, Result};
use kindred_bus::{EventBus, Topic};
use kindred_core::{InMemoryDirectory, Responder, SessionManager};
use kindred_scheduler::InitiativeScheduler;
use kindred_schema::{ChatEvent, InboundChat, PersonalityTag};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::KindredConfig;

/// One line of newline-delimited JSON on stdin.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServeInput {
    Chat(InboundChat),
    Typing {
        user_id: String,
        conversation_id: String,
        is_typing: bool,
    },
    Activate {
        identity_id: String,
        #[serde(default)]
        personality: Option<PersonalityTag>,
    },
    Deactivate {
        identity_id: String,
    },
    Initiate {
        conversation_id: String,
    },
    Clear {
        conversation_id: String,
    },
    Stats,
}

/// Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ServeInput>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .with_context(|| format!("invalid input line: {line}"))
}

pub fn event_line(event: &ChatEvent) -> Value {
    json!({
        "event": event.event_name(),
        "data": event,
    })
}

/// Runs one non-chat command and describes its outcome.
pub async fn apply(session: &SessionManager, input: ServeInput) -> Result<Value> {
    let value = match input {
        ServeInput::Chat(msg) => {
            let disposition = session.handle_incoming(&msg).await?;
            json!({ "op": "chat", "handled": disposition.is_handled() })
        }
        ServeInput::Typing {
            user_id,
            conversation_id,
            is_typing,
        } => {
            session
                .note_typing(&user_id, &conversation_id, is_typing)
                .await?;
            json!({ "op": "typing", "ok": true })
        }
        ServeInput::Activate {
            identity_id,
            personality,
        } => {
            let ok = session.activate(&identity_id, personality).await;
            json!({ "op": "activate", "identity_id": identity_id, "ok": ok })
        }
        ServeInput::Deactivate { identity_id } => {
            let ok = session.deactivate(&identity_id).await;
            json!({ "op": "deactivate", "identity_id": identity_id, "ok": ok })
        }
        ServeInput::Initiate { conversation_id } => {
            let disposition = session.initiate(&conversation_id).await?;
            json!({
                "op": "initiate",
                "conversation_id": conversation_id,
                "handled": disposition.is_handled(),
            })
        }
        ServeInput::Clear { conversation_id } => {
            let ok = session.clear_conversation(&conversation_id).await;
            json!({ "op": "clear", "conversation_id": conversation_id, "ok": ok })
        }
        ServeInput::Stats => {
            json!({ "op": "stats", "stats": session.stats().await })
        }
    };
    Ok(value)
}

/// Chat and initiate wait out a typing delay, so they run as tasks and the
/// input loop moves on. Everything else answers inline.
pub async fn dispatch(session: &Arc<SessionManager>, input: ServeInput) -> Option<JoinHandle<()>> {
    match input {
        ServeInput::Chat(_) | ServeInput::Initiate { .. } => {
            let session = Arc::clone(session);
            Some(tokio::spawn(async move {
                print_outcome(apply(&session, input).await)
            }))
        }
        other => {
            print_outcome(apply(session, other).await);
            None
        }
    }
}

fn print_outcome(outcome: Result<Value>) {
    match outcome {
        Ok(result) => println!("{result}"),
        Err(e) => tracing::warn!("command failed: {e:#}"),
    }
}

pub async fn serve(config: KindredConfig) -> Result<()> {
    let dir = Arc::new(InMemoryDirectory::new());
    config.seed.populate(&dir).await;

    let bus = Arc::new(EventBus::new(config.bus.capacity));
    let mut events = bus.subscribe(Topic::All).await;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", event_line(&event));
        }
    });

    let session = Arc::new(
        SessionManager::new(
            config.session.clone(),
            dir.clone(),
            dir.clone(),
            dir.clone(),
            bus.clone(),
        )
        .with_reply_source(Arc::new(Responder::new(config.templates()))),
    );
    let activated = session.activate_all().await?;
    tracing::info!("serving with {activated} scripted identities");

    let shutdown = CancellationToken::new();
    let scheduler = Arc::new(InitiativeScheduler::new(
        session.clone(),
        config.initiative.clone(),
    ));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    let mut pending: Vec<JoinHandle<()>> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match parse_line(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("{e:#}");
                continue;
            }
        };
        if let Some(handle) = dispatch(&session, input).await {
            pending.push(handle);
        }
        pending.retain(|handle| !handle.is_finished());
    }

    tracing::info!("stdin closed, waiting for {} pending replies", pending.len());
    for handle in pending {
        if let Err(e) = handle.await {
            tracing::warn!("command task failed: {e}");
        }
    }

    shutdown.cancel();
    scheduler_task.await.context("initiative scheduler task failed")?;
    drop(session);
    drop(bus);
    printer.await.context("event printer task failed")?;
    Ok(())
}
