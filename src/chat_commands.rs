use tracing::{error, info};

use crate::runtime::AppState;
use parabot_core::error::ParabotError;
use parabot_core::text::{channel_mention, format_day_month, user_mention};
use parabot_remote::sync::UploadOutcome;
use parabot_storage::db::{call_blocking, UpsertOutcome};

pub const SETCHANNEL: &str = "setchannel";
pub const ADDBIRTHDAY: &str = "addbirthday";
pub const LISTBIRTHDAYS: &str = "listbirthdays";
pub const SYNCDB: &str = "syncdb";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetChannel { channel_id: String },
    AddBirthday { user_id: String, day: i64, month: i64 },
    ListBirthdays,
    SyncDb,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetChannel { .. } => SETCHANNEL,
            Command::AddBirthday { .. } => ADDBIRTHDAY,
            Command::ListBirthdays => LISTBIRTHDAYS,
            Command::SyncDb => SYNCDB,
        }
    }

    /// Commands whose reply depends on a network round trip.
    pub fn needs_deferral(&self) -> bool {
        matches!(self, Command::SyncDb)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberPermissions {
    pub administrator: bool,
    pub manage_guild: bool,
}

/// A command as delivered by the chat gateway.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// `None` when invoked from a direct message.
    pub guild_id: Option<String>,
    pub invoker_id: String,
    pub permissions: MemberPermissions,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub content: String,
    pub ephemeral: bool,
}

impl CommandReply {
    fn public(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
        }
    }

    fn private(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }
}

/// Reply plus the upload the caller still owes once the reply is out.
#[derive(Debug)]
pub struct Routed {
    pub reply: CommandReply,
    pub upload_reason: Option<&'static str>,
}

impl Routed {
    fn done(reply: CommandReply) -> Self {
        Self {
            reply,
            upload_reason: None,
        }
    }

    fn then_upload(reply: CommandReply, reason: &'static str) -> Self {
        Self {
            reply,
            upload_reason: Some(reason),
        }
    }
}

/// Run a command to completion, including any follow-up upload.
pub async fn handle_command(state: &AppState, invocation: Invocation) -> CommandReply {
    let routed = route(state, invocation).await;
    if let Some(reason) = routed.upload_reason {
        state.upload_or_log(reason).await;
    }
    routed.reply
}

/// Validate and apply a command against the local store.
///
/// Mutations are committed before this returns; the upload they require is
/// left to the caller through `upload_reason` so the reply is not held up by
/// the network. `syncdb` is the exception: its reply is the upload result.
pub async fn route(state: &AppState, invocation: Invocation) -> Routed {
    let Some(guild_id) = invocation.guild_id.clone() else {
        return Routed::done(CommandReply::private(
            "This command can only be used inside a server.",
        ));
    };
    info!(
        "Command /{} from {} in guild {guild_id}",
        invocation.command.name(),
        invocation.invoker_id
    );

    match invocation.command {
        Command::SetChannel { channel_id } => {
            let perms = invocation.permissions;
            if !perms.administrator && !perms.manage_guild {
                return Routed::done(CommandReply::private(
                    "You need the Administrator or Manage Server permission.",
                ));
            }
            let binding_channel = channel_id.clone();
            match call_blocking(state.db.clone(), move |db| {
                db.upsert_channel_binding(&guild_id, &binding_channel)
            })
            .await
            {
                Ok(()) => Routed::then_upload(
                    CommandReply::public(format!(
                        "Channel set to {}",
                        channel_mention(&channel_id)
                    )),
                    SETCHANNEL,
                ),
                Err(e) => {
                    error!("setchannel failed: {e}");
                    Routed::done(CommandReply::private(format!(
                        "Failed to save the channel: {e}"
                    )))
                }
            }
        }
        Command::AddBirthday {
            user_id,
            day,
            month,
        } => {
            let record_user = user_id.clone();
            let result = call_blocking(state.db.clone(), move |db| {
                db.upsert_birthday(&guild_id, &record_user, day, month)
            })
            .await;
            match result {
                Ok(outcome) => {
                    let verb = match outcome {
                        UpsertOutcome::Inserted => "registered for",
                        UpsertOutcome::Updated => "updated to",
                    };
                    // Validation passed, so both values fit in u32.
                    let date = format_day_month(day as u32, month as u32);
                    Routed::then_upload(
                        CommandReply::public(format!(
                            "Birthday of {} {verb} {date}.",
                            user_mention(&user_id)
                        )),
                        ADDBIRTHDAY,
                    )
                }
                Err(ParabotError::InvalidInput(msg)) => Routed::done(CommandReply::private(msg)),
                Err(e) => {
                    error!("addbirthday failed: {e}");
                    Routed::done(CommandReply::private(format!(
                        "Failed to save the birthday: {e}"
                    )))
                }
            }
        }
        Command::ListBirthdays => {
            match call_blocking(state.db.clone(), move |db| db.list_birthdays(&guild_id)).await {
                Ok(records) if records.is_empty() => Routed::done(CommandReply::private(
                    "No birthdays configured in this server.",
                )),
                Ok(records) => {
                    let lines: Vec<String> = records
                        .iter()
                        .map(|r| {
                            format!(
                                "{} — {}",
                                user_mention(&r.user_id),
                                format_day_month(r.day, r.month)
                            )
                        })
                        .collect();
                    Routed::done(CommandReply::public(lines.join("\n")))
                }
                Err(e) => {
                    error!("listbirthdays failed: {e}");
                    Routed::done(CommandReply::private(format!(
                        "Failed to read birthdays: {e}"
                    )))
                }
            }
        }
        Command::SyncDb => {
            if !invocation.permissions.administrator {
                return Routed::done(CommandReply::private(
                    "Only administrators can use this command.",
                ));
            }
            let reply = match state.upload_now().await {
                Ok(UploadOutcome::Created { remote_id }) => {
                    format!("✅ Database synced (created remote copy {remote_id}).")
                }
                Ok(_) => "✅ Database synced successfully!".to_string(),
                Err(e) => {
                    error!("Manual sync failed: {e}");
                    format!("❌ Sync failed: {e}")
                }
            };
            Routed::done(CommandReply::private(reply))
        }
    }
}
