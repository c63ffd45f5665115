use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{self, Context as AnyhowContext};
use dotenv::dotenv;
use serenity::async_trait;
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::application::interaction::autocomplete::AutocompleteInteraction;
use serenity::model::application::interaction::Interaction;
use serenity::model::gateway::Ready;
use serenity::model::guild::{Guild as DiscordGuild, UnavailableGuild};
use serenity::model::prelude::GuildId;
use serenity::prelude::*;

mod catalog;
mod codec;
mod commands;
mod db;
mod error;
mod fuzzy;
mod notifier;
mod store;
mod types;

use catalog::FileTeamCatalog;
use commands::{AutocompleteRequest, CommandInteraction, Dispatcher, InteractionPayload};
use db::BotDb;
use notifier::FileMatchSchedule;
use store::SubscriptionStore;

#[derive(Debug)]
struct Config {
    discord_token: String,
    db_path: String,
    teams_path: String,
    matches_path: String,
    default_region: String,
    notify_interval: tokio::time::Duration,
    notify_window: chrono::Duration,
}

struct Handler {
    is_loop_running: AtomicBool,
    config: Arc<Config>,
    store: Arc<SubscriptionStore<BotDb>>,
    dispatcher: Dispatcher<BotDb, FileTeamCatalog>,
    schedule: Arc<FileMatchSchedule>,
}

impl Handler {
    fn new(config: Arc<Config>, db: BotDb) -> Self {
        let store = Arc::new(SubscriptionStore::new(db));
        let catalog = FileTeamCatalog::new(&config.teams_path);

        Self {
            is_loop_running: AtomicBool::new(false),
            dispatcher: Dispatcher::new(store.clone(), catalog),
            schedule: Arc::new(FileMatchSchedule::new(&config.matches_path)),
            store,
            config,
        }
    }

    async fn handle_command(
        &self,
        ctx: &Context,
        command: ApplicationCommandInteraction,
    ) -> anyhow::Result<()> {
        let payload =
            InteractionPayload::Command(CommandInteraction::from_application_command(&command));
        let reply = self
            .dispatcher
            .dispatch(payload)
            .await
            .with_context(|| format!("Failed to handle /{} command", command.data.name))?;

        commands::respond_to_command(&ctx.http, &command, reply)
            .await
            .context("Failed to send command response")?;

        Ok(())
    }

    async fn handle_autocomplete(
        &self,
        ctx: &Context,
        autocomplete: AutocompleteInteraction,
    ) -> anyhow::Result<()> {
        let request =
            AutocompleteRequest::from_interaction(&autocomplete, &self.config.default_region);
        let reply = self
            .dispatcher
            .dispatch(InteractionPayload::Autocomplete(request))
            .await
            .context("Failed to autocomplete team name")?;

        commands::respond_to_autocomplete(&ctx.http, &autocomplete, reply)
            .await
            .context("Failed to send autocomplete response")?;

        Ok(())
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        log::info!("Connected as {}", ready.user.name);

        match commands::register_commands(&ctx.http).await {
            Ok(registered) => log::info!("Registered {} slash commands", registered.len()),
            Err(err) => log::error!("Failed to register slash commands: {:?}", err),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let result = match interaction {
            Interaction::ApplicationCommand(command) => self.handle_command(&ctx, command).await,
            Interaction::Autocomplete(autocomplete) => {
                self.handle_autocomplete(&ctx, autocomplete).await
            }
            _ => Ok(()),
        };

        if let Err(err) = result {
            log::error!("{:?}", err);
        }
    }

    async fn guild_create(&self, _ctx: Context, guild: DiscordGuild, _is_new: bool) {
        match self.store.register(&guild.id.to_string()).await {
            Ok(true) => log::info!("Registered guild {} ({})", guild.id, guild.name),
            Ok(false) => {}
            Err(err) => log::error!("Failed to register guild {}: {:?}", guild.id, err),
        }
    }

    async fn guild_delete(
        &self,
        _ctx: Context,
        incomplete: UnavailableGuild,
        _full: Option<DiscordGuild>,
    ) {
        // An unavailable guild is an outage, not a removal.
        if incomplete.unavailable {
            return;
        }

        log::info!("Left guild {}, removing its subscriptions", incomplete.id);

        if let Err(err) = self.store.unregister(&incomplete.id.to_string()).await {
            log::error!("Failed to unregister guild {}: {:?}", incomplete.id, err);
        }
    }

    async fn cache_ready(&self, ctx: Context, _guilds: Vec<GuildId>) {
        if self.is_loop_running.swap(true, Ordering::Relaxed) {
            return;
        }

        let store = self.store.clone();
        let schedule = self.schedule.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            loop {
                let result = notifier::notify_subscribers(
                    &ctx,
                    store.as_ref(),
                    schedule.as_ref(),
                    config.notify_window,
                )
                .await;

                if let Err(err) = result {
                    log::error!("Failed to notify subscribers: {:?}", err);
                }

                tokio::time::sleep(config.notify_interval).await;
            }
        });
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn get_config_from_env() -> anyhow::Result<Config> {
    let token =
        env::var("MATCHBOT_DISCORD_TOKEN").context("Expected MATCHBOT_DISCORD_TOKEN env var")?;

    let notify_interval =
        parse_notify_interval(&env_or("MATCHBOT_NOTIFY_INTERVAL_SECONDS", "86400"))?;
    let notify_window = parse_notify_window(&env_or("MATCHBOT_NOTIFY_WINDOW_HOURS", "24"))?;

    Ok(Config {
        discord_token: token,
        db_path: env_or("MATCHBOT_DB_PATH", "matchbot.db"),
        teams_path: env_or("MATCHBOT_TEAMS_PATH", "teams.json"),
        matches_path: env_or("MATCHBOT_MATCHES_PATH", "matches.json"),
        default_region: env_or("MATCHBOT_DEFAULT_REGION", "global"),
        notify_interval,
        notify_window,
    })
}

fn parse_notify_interval(seconds: &str) -> anyhow::Result<tokio::time::Duration> {
    let seconds = seconds
        .trim()
        .parse::<u64>()
        .context("Invalid notify interval")?;
    anyhow::ensure!(seconds > 0, "Notify interval must be at least one second");

    Ok(tokio::time::Duration::from_secs(seconds))
}

fn parse_notify_window(hours: &str) -> anyhow::Result<chrono::Duration> {
    let hours = hours
        .trim()
        .parse::<i64>()
        .context("Invalid notify window")?;
    anyhow::ensure!(hours > 0, "Notify window must be at least one hour");

    chrono::Duration::try_hours(hours)
        .with_context(|| format!("Notify window of {} hours is too large", hours))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    pretty_env_logger::init();

    let config = get_config_from_env()?;

    log::info!("Loading {}", config.db_path);

    let db = BotDb::open(&config.db_path)?;

    log::info!("Migrating database");

    db.migrate().await?;

    log::info!("Creating Discord client");

    let intents = GatewayIntents::GUILDS;
    let mut client = Client::builder(config.discord_token.clone(), intents)
        .event_handler(Handler::new(Arc::new(config), db))
        .await?;

    if let Err(why) = client.start().await {
        log::error!("An error occurred while running the client: {:?}", why);
    }

    Ok(())
}
