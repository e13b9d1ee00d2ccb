//! Line-oriented staff console.
//!
//! The first line of a connection is the shared secret. Every later line is
//! one command, answered with a single `ok <json>` or `err <message>` line:
//!
//! ```text
//! peek-counter <business>
//! reset-counter <business>
//! set-status <business> <reference_id> <status>
//! assign <business> <reference_id> <consultant_id>
//! cancel <business> <reference_id>
//! upsert-consultant <business> <consultant json>
//! consultant-status <business> <consultant_id> active|inactive
//! add-unavailable <business> <consultant_id> <slot json>
//! remove-unavailable <business> <consultant_id> <index>
//! run-reminders
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::admin::Admin;
use crate::engine::EngineError;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PeekCounter {
        business: String,
    },
    ResetCounter {
        business: String,
    },
    SetStatus {
        business: String,
        reference_id: String,
        status: BookingStatus,
    },
    Assign {
        business: String,
        reference_id: String,
        consultant_id: String,
    },
    Cancel {
        business: String,
        reference_id: String,
    },
    UpsertConsultant {
        business: String,
        consultant: Consultant,
    },
    SetConsultantStatus {
        business: String,
        consultant_id: String,
        status: ConsultantStatus,
    },
    AddUnavailable {
        business: String,
        consultant_id: String,
        slot: UnavailableSlot,
    },
    RemoveUnavailable {
        business: String,
        consultant_id: String,
        index: usize,
    },
    RunReminders,
}

fn take_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    Some(s.split_once(char::is_whitespace).unwrap_or((s, "")))
}

struct Args<'a>(&'a str);

impl Args<'_> {
    fn word(&mut self, name: &str) -> Result<String, String> {
        let (word, rest) = take_word(self.0).ok_or_else(|| format!("missing {name}"))?;
        self.0 = rest;
        Ok(word.to_string())
    }

    /// A bare word read as a snake_case enum label.
    fn label<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, String> {
        let word = self.word(name)?;
        serde_json::from_value(Value::String(word.clone())).map_err(|_| format!("invalid {name}: {word}"))
    }

    /// Everything left on the line, as one JSON document.
    fn json<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, String> {
        let raw = std::mem::take(&mut self.0).trim();
        if raw.is_empty() {
            return Err(format!("missing {name}"));
        }
        serde_json::from_str(raw).map_err(|e| format!("invalid {name}: {e}"))
    }

    fn finish(&self) -> Result<(), String> {
        match self.0.trim() {
            "" => Ok(()),
            extra => Err(format!("unexpected argument: {extra}")),
        }
    }
}

pub fn parse(line: &str) -> Result<Command, String> {
    let (verb, rest) = take_word(line).ok_or("empty command")?;
    let mut args = Args(rest);
    let command = match verb {
        "peek-counter" => Command::PeekCounter {
            business: args.word("business")?,
        },
        "reset-counter" => Command::ResetCounter {
            business: args.word("business")?,
        },
        "set-status" => Command::SetStatus {
            business: args.word("business")?,
            reference_id: args.word("reference id")?,
            status: args.label("status")?,
        },
        "assign" => Command::Assign {
            business: args.word("business")?,
            reference_id: args.word("reference id")?,
            consultant_id: args.word("consultant id")?,
        },
        "cancel" => Command::Cancel {
            business: args.word("business")?,
            reference_id: args.word("reference id")?,
        },
        "upsert-consultant" => Command::UpsertConsultant {
            business: args.word("business")?,
            consultant: args.json("consultant")?,
        },
        "consultant-status" => Command::SetConsultantStatus {
            business: args.word("business")?,
            consultant_id: args.word("consultant id")?,
            status: args.label("status")?,
        },
        "add-unavailable" => Command::AddUnavailable {
            business: args.word("business")?,
            consultant_id: args.word("consultant id")?,
            slot: args.json("unavailable slot")?,
        },
        "remove-unavailable" => Command::RemoveUnavailable {
            business: args.word("business")?,
            consultant_id: args.word("consultant id")?,
            index: {
                let word = args.word("index")?;
                word.parse().map_err(|_| format!("invalid index: {word}"))?
            },
        },
        "run-reminders" => Command::RunReminders,
        other => return Err(format!("unknown command: {other}")),
    };
    args.finish()?;
    Ok(command)
}

pub async fn execute(admin: &Admin, token: &str, command: Command) -> Result<Value, EngineError> {
    let reply = match command {
        Command::PeekCounter { business } => json!(admin.peek_counter(token, &business).await?),
        Command::ResetCounter { business } => {
            admin.reset_counter(token, &business).await?;
            Value::Null
        }
        Command::SetStatus {
            business,
            reference_id,
            status,
        } => json!(admin.set_status(token, &business, &reference_id, status).await?),
        Command::Assign {
            business,
            reference_id,
            consultant_id,
        } => json!(admin.assign(token, &business, &reference_id, &consultant_id).await?),
        Command::Cancel {
            business,
            reference_id,
        } => json!(admin.cancel(token, &business, &reference_id).await?),
        Command::UpsertConsultant { business, consultant } => {
            admin.upsert_consultant(token, &business, consultant).await?;
            Value::Null
        }
        Command::SetConsultantStatus {
            business,
            consultant_id,
            status,
        } => json!(
            admin
                .set_consultant_status(token, &business, &consultant_id, status)
                .await?
        ),
        Command::AddUnavailable {
            business,
            consultant_id,
            slot,
        } => json!(admin.add_unavailable_slot(token, &business, &consultant_id, slot).await?),
        Command::RemoveUnavailable {
            business,
            consultant_id,
            index,
        } => json!(
            admin
                .remove_unavailable_slot(token, &business, &consultant_id, index)
                .await?
        ),
        Command::RunReminders => {
            let (coarse, fine) = admin.run_reminders_now(token).await?;
            json!({
                "coarse_sent": coarse.sent(),
                "fine_sent": fine.sent(),
                "scan_errors": coarse.scan_errors + fine.scan_errors,
            })
        }
    };
    Ok(reply)
}

/// Serve one console session until the peer hangs up.
pub async fn serve_connection<S>(stream: S, admin: Arc<Admin>) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    let Some(token) = lines.next_line().await? else {
        return Ok(());
    };
    let token = token.trim().to_string();
    if let Err(e) = admin.authorize(&token) {
        writer.write_all(format!("err {e}\n").as_bytes()).await?;
        return Ok(());
    }
    writer.write_all(b"ok ready\n").await?;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        debug!("admin console: {}", line.split_whitespace().next().unwrap_or_default());
        let reply = match parse(&line) {
            Err(e) => format!("err {e}"),
            Ok(command) => match execute(&admin, &token, command).await {
                Ok(value) => format!("ok {value}"),
                Err(e) => format!("err {e}"),
            },
        };
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

/// Accept console connections forever, one task each.
pub async fn run(listener: TcpListener, admin: Arc<Admin>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("admin console accept error: {e}");
                continue;
            }
        };
        info!("admin console connection from {peer}");
        let admin = admin.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(socket, admin).await {
                warn!("admin console connection from {peer}: {e}");
            }
        });
    }
}
