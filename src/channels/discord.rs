use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use serenity::all::{
    Command as GlobalCommand, CommandDataOption, CommandDataOptionValue, CommandInteraction,
    CommandOptionType, CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseFollowup, CreateInteractionResponseMessage, EditInteractionResponse,
    Interaction, Permissions, Ready,
};
use serenity::async_trait;
use serenity::prelude::*;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::chat_commands::{
    self, Command, CommandReply, Invocation, MemberPermissions, ADDBIRTHDAY, LISTBIRTHDAYS,
    SETCHANNEL, SYNCDB,
};
use crate::runtime::AppState;
use parabot_channels::channel_adapter::ChannelAdapter;
use parabot_core::text::{split_lines, DISCORD_MESSAGE_LIMIT};

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

fn build_http(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    #[serde(default)]
    guild_id: Option<String>,
}

/// REST-only sender used by the scheduler; it does not need the gateway session.
pub struct DiscordAdapter {
    token: String,
    http_client: reqwest::Client,
    api_base: String,
    /// (guild, channel) pairs already confirmed to belong together.
    verified: Mutex<HashSet<(String, String)>>,
}

impl DiscordAdapter {
    pub fn new(token: String) -> Result<Self, reqwest::Error> {
        Ok(DiscordAdapter {
            token,
            http_client: build_http(SEND_TIMEOUT)?,
            api_base: DISCORD_API_BASE.into(),
            verified: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn is_verified(&self, key: &(String, String)) -> bool {
        self.verified
            .lock()
            .map(|set| set.contains(key))
            .unwrap_or(false)
    }

    async fn verify_channel(&self, guild_id: &str, channel_id: &str) -> Result<(), String> {
        let key = (guild_id.to_string(), channel_id.to_string());
        if self.is_verified(&key) {
            return Ok(());
        }

        let resp = self
            .http_client
            .get(format!("{}/channels/{channel_id}", self.api_base))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .send()
            .await
            .map_err(|e| format!("Failed to look up Discord channel {channel_id}: {e}"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!(
                "Discord channel {channel_id} unavailable: HTTP {status} {}",
                body.chars().take(300).collect::<String>()
            ));
        }
        let info: ChannelInfo = resp
            .json()
            .await
            .map_err(|e| format!("Invalid Discord channel payload: {e}"))?;
        check_channel_guild(guild_id, channel_id, info.guild_id.as_deref())?;

        if let Ok(mut set) = self.verified.lock() {
            set.insert(key);
        }
        Ok(())
    }
}

fn check_channel_guild(
    guild_id: &str,
    channel_id: &str,
    actual: Option<&str>,
) -> Result<(), String> {
    match actual {
        Some(actual) if actual == guild_id => Ok(()),
        Some(actual) => Err(format!(
            "Channel {channel_id} belongs to guild {actual}, not {guild_id}"
        )),
        None => Err(format!("Channel {channel_id} is not a guild channel")),
    }
}

#[async_trait]
impl ChannelAdapter for DiscordAdapter {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send_text(&self, guild_id: &str, channel_id: &str, text: &str) -> Result<(), String> {
        let discord_channel_id = channel_id
            .parse::<u64>()
            .map_err(|_| format!("Invalid Discord channel id '{channel_id}'"))?;
        self.verify_channel(guild_id, channel_id).await?;

        let url = format!("{}/channels/{discord_channel_id}/messages", self.api_base);
        let body = json!({
            "content": text,
            "allowed_mentions": { "parse": ["users"] },
        });
        let resp = self
            .http_client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Failed to send Discord message: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!(
                "Failed to send Discord message: HTTP {status} {}",
                body.chars().take(300).collect::<String>()
            ));
        }
        Ok(())
    }
}

pub fn command_definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new(SETCHANNEL)
            .description("Set the channel for birthday messages in this server")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::Channel,
                    "channel",
                    "Channel where the bot will post",
                )
                .required(true),
            ),
        CreateCommand::new(ADDBIRTHDAY)
            .description("Add or update a member's birthday in this server")
            .add_option(
                CreateCommandOption::new(CommandOptionType::User, "user", "Member").required(true),
            )
            .add_option(
                CreateCommandOption::new(CommandOptionType::Integer, "day", "Day (1-31)")
                    .required(true),
            )
            .add_option(
                CreateCommandOption::new(CommandOptionType::Integer, "month", "Month (1-12)")
                    .required(true),
            ),
        CreateCommand::new(LISTBIRTHDAYS).description("List birthdays configured in this server"),
        CreateCommand::new(SYNCDB).description("Force a database sync with Google Drive (Admin)"),
    ]
}

#[derive(Debug, Default)]
struct CommandArgs {
    channels: HashMap<String, String>,
    users: HashMap<String, String>,
    integers: HashMap<String, i64>,
}

fn collect_args(options: &[CommandDataOption]) -> CommandArgs {
    let mut args = CommandArgs::default();
    for opt in options {
        match &opt.value {
            CommandDataOptionValue::Channel(id) => {
                args.channels.insert(opt.name.clone(), id.get().to_string());
            }
            CommandDataOptionValue::User(id) => {
                args.users.insert(opt.name.clone(), id.get().to_string());
            }
            CommandDataOptionValue::Integer(v) => {
                args.integers.insert(opt.name.clone(), *v);
            }
            _ => {}
        }
    }
    args
}

fn parse_command(name: &str, args: &CommandArgs) -> Result<Command, String> {
    let missing = |option: &str| format!("Missing option '{option}' for /{name}");
    match name {
        SETCHANNEL => Ok(Command::SetChannel {
            channel_id: args
                .channels
                .get("channel")
                .cloned()
                .ok_or_else(|| missing("channel"))?,
        }),
        ADDBIRTHDAY => Ok(Command::AddBirthday {
            user_id: args
                .users
                .get("user")
                .cloned()
                .ok_or_else(|| missing("user"))?,
            day: *args.integers.get("day").ok_or_else(|| missing("day"))?,
            month: *args.integers.get("month").ok_or_else(|| missing("month"))?,
        }),
        LISTBIRTHDAYS => Ok(Command::ListBirthdays),
        SYNCDB => Ok(Command::SyncDb),
        other => Err(format!("Unknown command /{other}")),
    }
}

fn member_permissions(perms: Option<Permissions>) -> MemberPermissions {
    let perms = perms.unwrap_or_else(Permissions::empty);
    MemberPermissions {
        administrator: perms.administrator(),
        manage_guild: perms.manage_guild(),
    }
}

async fn respond(ctx: &Context, cmd: &CommandInteraction, reply: &CommandReply) {
    let mut chunks = split_lines(&reply.content, DISCORD_MESSAGE_LIMIT).into_iter();
    let first = chunks.next().unwrap_or_default();
    let message = CreateInteractionResponseMessage::new()
        .content(first)
        .ephemeral(reply.ephemeral);
    if let Err(e) = cmd
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await
    {
        error!("Failed to reply to /{}: {e}", cmd.data.name);
        return;
    }
    for chunk in chunks {
        let followup = CreateInteractionResponseFollowup::new()
            .content(chunk)
            .ephemeral(reply.ephemeral);
        if let Err(e) = cmd.create_followup(&ctx.http, followup).await {
            error!("Failed to send follow-up for /{}: {e}", cmd.data.name);
            return;
        }
    }
}

struct Handler {
    app_state: Arc<AppState>,
    ready_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Handler {
    async fn handle_command(&self, ctx: &Context, cmd: &CommandInteraction) {
        let args = collect_args(&cmd.data.options);
        let command = match parse_command(&cmd.data.name, &args) {
            Ok(command) => command,
            Err(e) => {
                warn!("{e}");
                respond(
                    ctx,
                    cmd,
                    &CommandReply {
                        content: e,
                        ephemeral: true,
                    },
                )
                .await;
                return;
            }
        };
        let deferred = command.needs_deferral();
        let invocation = Invocation {
            guild_id: cmd.guild_id.map(|id| id.get().to_string()),
            invoker_id: cmd.user.id.get().to_string(),
            permissions: member_permissions(cmd.member.as_ref().and_then(|m| m.permissions)),
            command,
        };

        if deferred {
            if let Err(e) = cmd.defer_ephemeral(&ctx.http).await {
                error!("Failed to defer /{}: {e}", cmd.data.name);
                return;
            }
        }

        let routed = chat_commands::route(&self.app_state, invocation).await;

        if deferred {
            let edit = EditInteractionResponse::new().content(routed.reply.content.clone());
            if let Err(e) = cmd.edit_response(&ctx.http, edit).await {
                error!("Failed to edit reply for /{}: {e}", cmd.data.name);
            }
        } else {
            respond(ctx, cmd, &routed.reply).await;
        }

        if let Some(reason) = routed.upload_reason {
            self.app_state.upload_or_log(reason).await;
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            "Discord bot connected as {} ({} guild(s))",
            ready.user.name,
            ready.guilds.len()
        );

        match GlobalCommand::set_global_commands(&ctx.http, command_definitions()).await {
            Ok(commands) => info!("Registered {} slash command(s)", commands.len()),
            Err(e) => error!("Failed to register slash commands: {e}"),
        }

        // Reconnects fire `ready` again; only the first one starts the boot scan.
        let tx = self.ready_tx.lock().ok().and_then(|mut slot| slot.take());
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(cmd) = interaction {
            self.handle_command(&ctx, &cmd).await;
        }
    }
}

/// Gateway client with the command handler installed. `ready_tx` fires on the first `ready`.
pub async fn build_discord_client(
    app_state: Arc<AppState>,
    ready_tx: oneshot::Sender<()>,
) -> Result<Client, serenity::Error> {
    if let Some(app_id) = &app_state.config.application_id {
        info!("Discord application id: {app_id}");
    }
    let token = app_state.config.discord_token.clone();
    let handler = Handler {
        app_state,
        ready_tx: Mutex::new(Some(ready_tx)),
    };
    Client::builder(&token, GatewayIntents::GUILDS)
        .event_handler(handler)
        .await
}
