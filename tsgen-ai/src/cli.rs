//! Line-oriented review loop for `tsgen-ai review`

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tsgen_common::events::SessionEvent;
use uuid::Uuid;

use crate::session::SessionManager;
use crate::types::{ExtractedField, ReviewPriority};

pub const HELP: &str = "\
Commands:
  list [all]                    fields needing review (or every field)
  show <section.field>          value, source, reasoning and conflicts
  set <section.field> <value>   set a value (JSON or plain text; null clears)
  confirm <section.field>       accept the current value
  pick <section.field> <n>      take conflict n as the value
  preview                       render the current draft
  finalize                      write the final document
  help                          this text
  quit                          leave without finalizing";

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewCommand {
    List { all: bool },
    Show { section: String, field: String },
    Set { section: String, field: String, value: Value },
    Confirm { section: String, field: String },
    Pick { section: String, field: String, index: usize },
    Preview,
    Finalize,
    Help,
    Quit,
}

fn split_path(path: &str) -> Result<(String, String), String> {
    match path.split_once('.') {
        Some((section, field)) if !section.is_empty() && !field.is_empty() => {
            Ok((section.to_string(), field.to_string()))
        }
        _ => Err(format!("expected <section.field>, got '{}'", path)),
    }
}

impl ReviewCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match verb.to_lowercase().as_str() {
            "list" | "ls" => Ok(ReviewCommand::List { all: rest == "all" }),
            "show" => {
                let (section, field) = split_path(rest)?;
                Ok(ReviewCommand::Show { section, field })
            }
            "set" => {
                let (path, raw) = rest
                    .split_once(char::is_whitespace)
                    .ok_or("usage: set <section.field> <value>")?;
                let (section, field) = split_path(path)?;
                let raw = raw.trim();
                let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                Ok(ReviewCommand::Set { section, field, value })
            }
            "confirm" | "ok" => {
                let (section, field) = split_path(rest)?;
                Ok(ReviewCommand::Confirm { section, field })
            }
            "pick" => {
                let (path, index) = rest
                    .split_once(char::is_whitespace)
                    .ok_or("usage: pick <section.field> <n>")?;
                let (section, field) = split_path(path)?;
                let index = index
                    .trim()
                    .parse()
                    .map_err(|_| format!("conflict index must be a number, got '{}'", index.trim()))?;
                Ok(ReviewCommand::Pick { section, field, index })
            }
            "preview" => Ok(ReviewCommand::Preview),
            "finalize" => Ok(ReviewCommand::Finalize),
            "help" | "?" => Ok(ReviewCommand::Help),
            "quit" | "exit" | "q" => Ok(ReviewCommand::Quit),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command '{}', try 'help'", other)),
        }
    }
}

fn describe(section: &str, name: &str, field: &ExtractedField) -> String {
    let value = field
        .value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "(none)".to_string());
    let mut out = format!(
        "{}.{} = {}  [confidence {:.1}]\n",
        section,
        name,
        value,
        field.confidence.as_f64()
    );
    if let Some(source) = &field.source {
        out.push_str(&format!("  source: {}\n", source));
    }
    if field.derived_from_policy {
        out.push_str("  default from firm policy\n");
    }
    if let Some(reasoning) = &field.reasoning {
        out.push_str(&format!("  reasoning: {}\n", reasoning));
    }
    for (i, conflict) in field.conflicts.iter().enumerate() {
        out.push_str(&format!("  conflict {}: {} from {}\n", i, conflict.value, conflict.source));
    }
    out
}

async fn say<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> Result<()> {
    out.write_all(text.as_bytes()).await?;
    if !text.ends_with('\n') {
        out.write_all(b"\n").await?;
    }
    out.flush().await?;
    Ok(())
}

/// Print extraction progress events for one session until extraction completes
pub fn spawn_progress_printer(manager: &SessionManager, session_id: Uuid) -> tokio::task::JoinHandle<()> {
    let mut rx = manager.event_bus().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if event.session_id() != session_id {
                continue;
            }
            match event {
                SessionEvent::SectionStarted { section, index, total, .. } => {
                    println!("[{}/{}] extracting {}", index, total, section);
                }
                SessionEvent::SectionFailed { section, error, .. } => {
                    println!("      {} failed: {}", section, error);
                }
                SessionEvent::ExtractionCompleted { resolved, unresolved, .. } => {
                    println!("extraction done: {} resolved, {} need review", resolved, unresolved);
                    break;
                }
                _ => {}
            }
        }
    })
}

/// Run the review loop over `input` until finalize or quit
///
/// Returns true when the session was finalized.
pub async fn review_loop<R, W>(
    manager: Arc<SessionManager>,
    session_id: Uuid,
    input: R,
    mut out: W,
) -> Result<bool>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    say(&mut out, HELP).await?;

    loop {
        out.write_all(b"> ").await?;
        out.flush().await?;
        let Some(line) = lines.next_line().await.context("reading command")? else {
            return Ok(false);
        };

        let command = match ReviewCommand::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                say(&mut out, &message).await?;
                continue;
            }
        };

        let result: Result<Option<String>> = match command {
            ReviewCommand::List { all } => {
                let session = manager.get(session_id).await?;
                let mut text = String::new();
                for (section, name, field) in session.fields().iter() {
                    let priority = field.review_priority();
                    if all || priority != ReviewPriority::Auto {
                        let value = field.value.as_ref().map(|v| v.to_string()).unwrap_or_default();
                        text.push_str(&format!(
                            "{:<8} {}.{} {}\n",
                            format!("{:?}", priority).to_lowercase(),
                            section,
                            name,
                            value
                        ));
                    }
                }
                if text.is_empty() {
                    text = "every field is resolved; run 'finalize'".to_string();
                }
                Ok(Some(text))
            }
            ReviewCommand::Show { section, field } => {
                let session = manager.get(session_id).await?;
                session
                    .fields()
                    .get(&section, &field)
                    .map(|f| Some(describe(&section, &field, f)))
                    .ok_or_else(|| anyhow!("no field {}.{}", section, field))
            }
            ReviewCommand::Set { section, field, value } => manager
                .update_field(session_id, &section, &field, value, None)
                .await
                .map(|f| Some(describe(&section, &field, &f)))
                .map_err(Into::into),
            ReviewCommand::Confirm { section, field } => manager
                .confirm_field(session_id, &section, &field, None)
                .await
                .map(|f| Some(describe(&section, &field, &f)))
                .map_err(Into::into),
            ReviewCommand::Pick { section, field, index } => manager
                .resolve_conflict(session_id, &section, &field, index, None)
                .await
                .map(|f| Some(describe(&section, &field, &f)))
                .map_err(Into::into),
            ReviewCommand::Preview => manager.preview(session_id).await.map(Some).map_err(Into::into),
            ReviewCommand::Finalize => match manager.finalize(session_id).await {
                Ok(artifacts) => {
                    say(&mut out, &artifacts.document).await?;
                    say(
                        &mut out,
                        &format!(
                            "finalized; {} decisions, estimated model cost ${:.4}",
                            artifacts.decisions.len(),
                            artifacts.execution.estimated_cost_usd
                        ),
                    )
                    .await?;
                    return Ok(true);
                }
                Err(e) => Err(e.into()),
            },
            ReviewCommand::Help => Ok(Some(HELP.to_string())),
            ReviewCommand::Quit => return Ok(false),
        };

        match result {
            Ok(Some(text)) => say(&mut out, &text).await?,
            Ok(None) => {}
            Err(e) => say(&mut out, &format!("error: {}", e)).await?,
        }
    }
}
