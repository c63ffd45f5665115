use std::sync::Arc;

use serenity::builder::CreateApplicationCommandOption;
use serenity::http::Http;
use serenity::model::application::command::{Command, CommandOptionType};
use serenity::model::application::interaction::application_command::{
    ApplicationCommandInteraction, CommandDataOption,
};
use serenity::model::application::interaction::autocomplete::AutocompleteInteraction;
use serenity::model::application::interaction::InteractionResponseType;

use crate::catalog::TeamCatalog;
use crate::db::KvStore;
use crate::error::{CatalogError, DispatchError, Rejection, StoreError};
use crate::fuzzy::{FuzzySearch, MAX_RESULTS};
use crate::store::{AlreadyUnfollowed, SubscriptionStore};

pub const FOLLOW: &str = "follow";
pub const UNFOLLOW: &str = "unfollow";
pub const LIST: &str = "follows";

pub const TEAM_OPTION: &str = "team_name";
pub const REGION_OPTION: &str = "region";
const EXTRA_TEAM_OPTIONS: [&str; 2] = ["team_name_2", "team_name_3"];

const FOLLOWED: &str = "Okay, I will now notify you those teams' matches.";
const UNFOLLOWED: &str = "Okay, you will no longer receive notifications for that team.";
const NOTHING_FOLLOWED: &str =
    "This channel is not following any teams. Follow some with '/follow <team>'!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Follow,
    Unfollow,
    List,
}

impl CommandKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            FOLLOW => Some(Self::Follow),
            UNFOLLOW => Some(Self::Unfollow),
            LIST => Some(Self::List),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    String(String),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOption {
    pub name: String,
    pub value: OptionValue,
}

impl CommandOption {
    fn from_data(option: &CommandDataOption) -> Self {
        let value = match (option.kind, option.value.as_ref().and_then(|v| v.as_str())) {
            (CommandOptionType::String, Some(value)) => OptionValue::String(value.to_owned()),
            _ => OptionValue::Other,
        };

        Self {
            name: option.name.clone(),
            value,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            OptionValue::String(value) => Some(value),
            OptionValue::Other => None,
        }
    }

    /// The option's text as a team name: surrounding whitespace removed, blank
    /// values treated as absent.
    fn team_name(&self) -> Option<&str> {
        self.as_str()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    fn is_team(&self) -> bool {
        self.name == TEAM_OPTION || EXTRA_TEAM_OPTIONS.contains(&self.name.as_str())
    }
}

/// A submitted slash command, stripped down to what the handlers read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInteraction {
    pub name: String,
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub options: Vec<CommandOption>,
}

impl CommandInteraction {
    pub fn from_application_command(command: &ApplicationCommandInteraction) -> Self {
        Self {
            name: command.data.name.clone(),
            guild_id: command.guild_id.map(|id| id.to_string()),
            channel_id: command.channel_id.to_string(),
            options: command
                .data
                .options
                .iter()
                .map(CommandOption::from_data)
                .collect(),
        }
    }

    fn team_option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .filter(|option| option.name == name)
            .find_map(CommandOption::team_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutocompleteRequest {
    pub country: String,
    pub value: String,
}

impl AutocompleteRequest {
    /// The focused option carries the partial text; `region` picks the roster
    /// and falls back to `default_region`.
    pub fn from_interaction(autocomplete: &AutocompleteInteraction, default_region: &str) -> Self {
        let options: Vec<(CommandOption, bool)> = autocomplete
            .data
            .options
            .iter()
            .map(|option| (CommandOption::from_data(option), option.focused))
            .collect();

        let value = options
            .iter()
            .find(|(_, focused)| *focused)
            .and_then(|(option, _)| option.as_str())
            .unwrap_or_default();
        let country = options
            .iter()
            .filter(|(option, _)| option.name == REGION_OPTION)
            .find_map(|(option, _)| option.as_str())
            .filter(|region| !region.trim().is_empty())
            .unwrap_or(default_region);

        Self {
            country: country.to_owned(),
            value: value.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionPayload {
    Command(CommandInteraction),
    Autocomplete(AutocompleteRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyType {
    MessageWithSource,
    AutocompleteResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Message { ephemeral: bool, content: String },
    Rejected(Rejection),
    Autocomplete { choices: Vec<Choice> },
}

impl Reply {
    fn ephemeral(content: impl Into<String>) -> Self {
        Self::Message {
            ephemeral: true,
            content: content.into(),
        }
    }

    pub fn reply_type(&self) -> ReplyType {
        match self {
            Self::Message { .. } | Self::Rejected(_) => ReplyType::MessageWithSource,
            Self::Autocomplete { .. } => ReplyType::AutocompleteResult,
        }
    }

    /// Rejections render as ephemeral messages. `None` for autocomplete results.
    pub fn into_message(self) -> Option<(bool, String)> {
        match self {
            Self::Message { ephemeral, content } => Some((ephemeral, content)),
            Self::Rejected(rejection) => Some((true, rejection.to_string())),
            Self::Autocomplete { .. } => None,
        }
    }
}

enum Failure {
    Rejected(Rejection),
    Fatal(DispatchError),
}

impl From<Rejection> for Failure {
    fn from(rejection: Rejection) -> Self {
        Self::Rejected(rejection)
    }
}

impl From<AlreadyUnfollowed> for Failure {
    fn from(_: AlreadyUnfollowed) -> Self {
        Self::Rejected(Rejection::NotSubscribed)
    }
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        Self::Fatal(err.into())
    }
}

impl From<CatalogError> for Failure {
    fn from(err: CatalogError) -> Self {
        Self::Fatal(err.into())
    }
}

/// Turns one interaction into exactly one reply.
pub struct Dispatcher<K, C> {
    store: Arc<SubscriptionStore<K>>,
    catalog: C,
}

impl<K, C> Dispatcher<K, C>
where
    K: KvStore,
    C: TeamCatalog,
{
    pub fn new(store: Arc<SubscriptionStore<K>>, catalog: C) -> Self {
        Self { store, catalog }
    }

    /// User mistakes come back as [`Reply::Rejected`]; only storage and
    /// catalog faults are errors.
    pub async fn dispatch(&self, payload: InteractionPayload) -> Result<Reply, DispatchError> {
        let result = match payload {
            InteractionPayload::Command(command) => self.handle_command(&command).await,
            InteractionPayload::Autocomplete(request) => self.handle_autocomplete(&request).await,
        };

        match result {
            Ok(reply) => Ok(reply),
            Err(Failure::Rejected(rejection)) => {
                log::warn!("Rejected interaction ({:?}): {}", rejection.kind(), rejection);
                Ok(Reply::Rejected(rejection))
            }
            Err(Failure::Fatal(err)) => Err(err),
        }
    }

    async fn handle_command(&self, command: &CommandInteraction) -> Result<Reply, Failure> {
        let kind = CommandKind::from_name(&command.name)
            .ok_or_else(|| Rejection::UnknownCommand(command.name.clone()))?;
        let guild_id = command.guild_id.as_deref().ok_or(Rejection::NotInGuild)?;

        log::info!(
            "Received {} command in guild {} channel {}",
            command.name,
            guild_id,
            command.channel_id
        );

        match kind {
            CommandKind::Follow => self.handle_follow(guild_id, command).await,
            CommandKind::Unfollow => self.handle_unfollow(guild_id, command).await,
            CommandKind::List => self.handle_list(guild_id, command).await,
        }
    }

    async fn handle_follow(
        &self,
        guild_id: &str,
        command: &CommandInteraction,
    ) -> Result<Reply, Failure> {
        let team_names: Vec<&str> = command
            .options
            .iter()
            .filter(|option| option.is_team())
            .filter_map(CommandOption::team_name)
            .collect();

        if team_names.is_empty() {
            return Err(Rejection::MissingParameter("team name").into());
        }

        let _guard = self.store.lock_guild(guild_id).await;
        let mut guild = self
            .store
            .load_guild(guild_id)
            .await?
            .ok_or(Rejection::GuildNotRegistered)?;

        guild.follow(&command.channel_id, team_names.iter().copied());
        self.store.persist(guild_id, &guild).await?;

        log::info!("Channel {} now follows {:?}", command.channel_id, team_names);

        Ok(Reply::ephemeral(FOLLOWED))
    }

    async fn handle_unfollow(
        &self,
        guild_id: &str,
        command: &CommandInteraction,
    ) -> Result<Reply, Failure> {
        let team_name = command
            .team_option(TEAM_OPTION)
            .ok_or(Rejection::MissingParameter("team name"))?;

        let _guard = self.store.lock_guild(guild_id).await;
        let mut guild = self
            .store
            .load_guild(guild_id)
            .await?
            .ok_or(Rejection::GuildNotRegistered)?;

        guild.unfollow(&command.channel_id, team_name)?;
        self.store.persist(guild_id, &guild).await?;

        log::info!("Channel {} unfollowed {}", command.channel_id, team_name);

        Ok(Reply::ephemeral(UNFOLLOWED))
    }

    async fn handle_list(
        &self,
        guild_id: &str,
        command: &CommandInteraction,
    ) -> Result<Reply, Failure> {
        let guild = self
            .store
            .load_guild(guild_id)
            .await?
            .ok_or(Rejection::GuildNotRegistered)?;

        let follows = guild.channel_follows(&command.channel_id);
        if follows.is_empty() {
            return Ok(Reply::ephemeral(NOTHING_FOLLOWED));
        }

        Ok(Reply::Message {
            ephemeral: false,
            content: format!("This channel is following:\n```\n{}\n```", follows.join("\n")),
        })
    }

    async fn handle_autocomplete(&self, request: &AutocompleteRequest) -> Result<Reply, Failure> {
        let teams = self.catalog.teams(&request.country).await?;
        let choices = FuzzySearch::new()
            .search(teams.iter().map(String::as_str), &request.value)
            .into_iter()
            .take(MAX_RESULTS)
            .map(|team| Choice {
                name: team.clone(),
                value: team,
            })
            .collect();

        Ok(Reply::Autocomplete { choices })
    }
}

pub async fn respond_to_command(
    http: impl AsRef<Http>,
    command: &ApplicationCommandInteraction,
    reply: Reply,
) -> serenity::Result<()> {
    if reply.reply_type() != ReplyType::MessageWithSource {
        log::warn!("Dropping autocomplete reply to command {}", command.data.name);
        return Ok(());
    }
    let Some((ephemeral, content)) = reply.into_message() else {
        return Ok(());
    };

    command
        .create_interaction_response(http, |response| {
            response
                .kind(InteractionResponseType::ChannelMessageWithSource)
                .interaction_response_data(|message| message.content(content).ephemeral(ephemeral))
        })
        .await
}

pub async fn respond_to_autocomplete(
    http: impl AsRef<Http>,
    autocomplete: &AutocompleteInteraction,
    reply: Reply,
) -> serenity::Result<()> {
    if reply.reply_type() != ReplyType::AutocompleteResult {
        log::warn!("Dropping non-autocomplete reply to {}", autocomplete.data.name);
        return Ok(());
    }
    let Reply::Autocomplete { choices } = reply else {
        return Ok(());
    };

    autocomplete
        .create_autocomplete_response(http, |response| {
            for choice in choices {
                response.add_string_choice(choice.name, choice.value);
            }
            response
        })
        .await
}

fn team_option<'a>(
    option: &'a mut CreateApplicationCommandOption,
    name: &str,
    required: bool,
) -> &'a mut CreateApplicationCommandOption {
    option
        .name(name)
        .description("Team name")
        .kind(CommandOptionType::String)
        .required(required)
        .set_autocomplete(true)
}

fn region_option(
    option: &mut CreateApplicationCommandOption,
) -> &mut CreateApplicationCommandOption {
    option
        .name(REGION_OPTION)
        .description("Region to suggest teams from")
        .kind(CommandOptionType::String)
        .required(false)
}

/// Replaces the bot's global slash commands.
pub async fn register_commands(http: impl AsRef<Http>) -> serenity::Result<Vec<Command>> {
    Command::set_global_application_commands(http, |commands| {
        commands
            .create_application_command(|command| {
                command
                    .name(FOLLOW)
                    .description("Get notified about teams' upcoming matches in this channel")
                    .create_option(|option| team_option(option, TEAM_OPTION, true))
                    .create_option(|option| team_option(option, EXTRA_TEAM_OPTIONS[0], false))
                    .create_option(|option| team_option(option, EXTRA_TEAM_OPTIONS[1], false))
                    .create_option(region_option)
            })
            .create_application_command(|command| {
                command
                    .name(UNFOLLOW)
                    .description("Stop notifications for a team in this channel")
                    .create_option(|option| team_option(option, TEAM_OPTION, true))
                    .create_option(region_option)
            })
            .create_application_command(|command| {
                command
                    .name(LIST)
                    .description("List the teams this channel follows")
            })
    })
    .await
}
