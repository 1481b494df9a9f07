use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Local, Utc};
use dotenvy::dotenv;
use log::{debug, error, info, warn};
use serenity::http::Http;
use serenity::model::channel::{Channel, Message};
use serenity::model::gateway::Ready;
use serenity::model::id::ChannelId;
use serenity::prelude::*;
use std::sync::Arc;

use companion::core::Config;
use companion::features::reminders::format::{
    format_duration, format_reminder_list, MESSAGE_LIMIT,
};
use companion::features::reminders::time_parser::{local_now, local_to_utc};
use companion::features::reminders::{
    parse_time_expression, NotificationSink, OwnerProfile, ProfileLookup, Reminder,
    ReminderService, ReminderStore,
};
use companion::features::{get_bot_version, get_features};

/// Delivers reminder text to the Discord channel the reminder was created in
struct DiscordSink {
    http: Arc<Http>,
}

#[async_trait]
impl NotificationSink for DiscordSink {
    async fn send(&self, owner_id: &str, text: &str) -> Result<()> {
        let channel_id = parse_channel_id(owner_id)?;
        channel_id.say(&self.http, text).await?;
        Ok(())
    }
}

/// Resolves channel owners through the REST API
struct DiscordProfiles {
    http: Arc<Http>,
}

#[async_trait]
impl ProfileLookup for DiscordProfiles {
    async fn get_profile(&self, owner_id: &str) -> Option<OwnerProfile> {
        let channel_id = parse_channel_id(owner_id).ok()?;
        match self.http.get_channel(channel_id.0).await {
            Ok(Channel::Private(dm)) => Some(OwnerProfile {
                owner_id: owner_id.to_string(),
                display_name: Some(dm.recipient.name.clone()),
            }),
            Ok(_) => Some(OwnerProfile {
                owner_id: owner_id.to_string(),
                display_name: None,
            }),
            Err(e) => {
                warn!("Channel {owner_id} is unreachable: {e}");
                None
            }
        }
    }
}

fn parse_channel_id(owner_id: &str) -> Result<ChannelId> {
    owner_id
        .parse::<u64>()
        .map(ChannelId)
        .map_err(|_| anyhow!("Owner id {owner_id:?} is not a Discord channel id"))
}

struct Handler {
    service: Arc<ReminderService>,
    prefix: String,
}

impl Handler {
    fn new(service: Arc<ReminderService>, prefix: String) -> Self {
        Handler { service, prefix }
    }

    async fn handle_command(&self, ctx: &Context, msg: &Message, input: &str) -> Result<()> {
        let owner_id = msg.channel_id.0.to_string();
        let (name, args) = match input.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (input, ""),
        };

        match name.to_lowercase().as_str() {
            "remind" => {
                let reply = match self.service.create_from_command(&owner_id, input).await {
                    Ok(Some(reminder)) => confirmation(&reminder),
                    Ok(None) => invalid_format(&self.prefix),
                    Err(e) => format!("❌ {e}"),
                };
                msg.channel_id.say(&ctx.http, reply).await?;
            }
            "reminders" => {
                let reminders = self.service.list_reminders(&owner_id).await;
                for chunk in format_reminder_list(&reminders, Utc::now(), MESSAGE_LIMIT) {
                    msg.channel_id.say(&ctx.http, chunk).await?;
                }
            }
            "cancel" => {
                let id = args.trim_start_matches('#');
                if id.is_empty() {
                    msg.channel_id
                        .say(&ctx.http, format!("Usage: `{}cancel <id>`", self.prefix))
                        .await?;
                    return Ok(());
                }
                let reply = if self.service.delete_reminder(&owner_id, id).await? {
                    format!("✅ Reminder #{id} has been cancelled.")
                } else {
                    format!("❌ Reminder #{id} not found or already delivered.")
                };
                msg.channel_id.say(&ctx.http, reply).await?;
            }
            "snooze" => {
                let (id, expr) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
                let id = id.trim_start_matches('#');
                let Some(due_at) =
                    parse_time_expression(expr.trim(), local_now()).and_then(local_to_utc)
                else {
                    msg.channel_id
                        .say(
                            &ctx.http,
                            format!(
                                "Usage: `{}snooze <id> <time>`, e.g. `{}snooze 1700000000000 in 10 minutes`",
                                self.prefix, self.prefix
                            ),
                        )
                        .await?;
                    return Ok(());
                };
                let reply = match self.service.reschedule_reminder(&owner_id, id, due_at).await {
                    Ok(true) => format!(
                        "💤 Reminder #{id} moved to {}.",
                        due_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                    ),
                    Ok(false) => format!("❌ Reminder #{id} not found or already delivered."),
                    Err(e) => format!("❌ {e}"),
                };
                msg.channel_id.say(&ctx.http, reply).await?;
            }
            other => debug!("Ignoring unknown command {other:?}"),
        }
        Ok(())
    }
}

fn confirmation(reminder: &Reminder) -> String {
    let seconds = reminder
        .due_at
        .signed_duration_since(Utc::now())
        .num_seconds()
        .max(0);
    let repeat = reminder
        .recurrence
        .as_ref()
        .map(|kind| format!(" (repeats {kind})"))
        .unwrap_or_default();

    format!(
        "⏰ Got it! I'll remind you in **{}**{repeat} about:\n> {}\n\n*Reminder ID: #{}*",
        format_duration(seconds),
        reminder.text,
        reminder.id
    )
}

fn invalid_format(prefix: &str) -> String {
    format!(
        "❌ I couldn't work out when to remind you. Try:\n\
         `{prefix}remind in 30 minutes to stretch`\n\
         `{prefix}remind call mom at tomorrow at 3pm daily`\n\
         `{prefix}remind 1h30m to check the oven`"
    )
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(input) = msg.content.strip_prefix(&self.prefix) else {
            return;
        };
        let input = input.trim();
        if input.is_empty() {
            return;
        }

        debug!(
            "Command from {} in channel {}: {input}",
            msg.author.name, msg.channel_id
        );
        if let Err(e) = self.handle_command(&ctx, &msg, input).await {
            error!("Error handling command {input:?}: {e}");
            if let Err(e) = msg
                .channel_id
                .say(&ctx.http, "❌ Something went wrong handling that command.")
                .await
            {
                warn!("Failed to send error reply to channel {}: {e}", msg.channel_id);
            }
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🎉 {} is connected and ready!", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());
        if let Some(shard) = ready.shard {
            info!("⚡ Shard: {}/{}", shard[0] + 1, shard[1]);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let config = Config::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Starting companion bot v{}...", get_bot_version());
    for feature in get_features() {
        info!("   - {} v{} (since {})", feature.name, feature.version, feature.since);
    }
    info!("📁 Reminders file: {}", config.reminders_path.display());
    info!("⏳ Past-due policy: {}", config.past_due_policy);

    let http = Arc::new(Http::new(&config.discord_token));
    let service = Arc::new(ReminderService::new(
        ReminderStore::new(&config.reminders_path),
        Arc::new(DiscordSink { http: http.clone() }),
        Arc::new(DiscordProfiles { http }),
        config.past_due_policy,
    ));

    let report = service.recover().await;
    if report.skipped > 0 {
        warn!("{} past-due reminders were not re-armed", report.skipped);
    }
    tokio::spawn(service.clone().run());

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(Handler::new(service.clone(), config.command_prefix.clone()))
        .await
        .map_err(|e| {
            error!("Failed to create Discord client: {e}");
            anyhow!("Client creation failed: {}", e)
        })?;

    let shard_manager = client.shard_manager.clone();
    let shutdown_service = service.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
            return;
        }
        info!("Shutting down...");
        shutdown_service.shutdown();
        shard_manager.lock().await.shutdown_all().await;
    });

    info!("Establishing WebSocket connection to Discord gateway...");
    if let Err(why) = client.start().await {
        error!("Gateway connection failed: {why:?}");
        return Err(anyhow!("Failed to establish gateway connection: {}", why));
    }

    Ok(())
}
