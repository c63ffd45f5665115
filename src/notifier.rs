use std::path::PathBuf;

use anyhow::Context as AnyhowContext;
use chrono::{DateTime, Duration, Local, Utc};
use serenity::async_trait;
use serenity::model::prelude::ChannelId;
use serenity::prelude::*;

use crate::db::KvStore;
use crate::store::SubscriptionStore;
use crate::types::Match;

/// Discord rejects messages past 2000 characters.
const MAX_MATCHES_PER_POST: usize = 20;

/// One day, in minutes.
const THREAD_AUTO_ARCHIVE_MINUTES: u16 = 1440;

#[async_trait]
pub trait MatchSchedule: Send + Sync {
    async fn upcoming(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Match>>;
}

/// Match list kept in a JSON file, re-read on every tick.
pub struct FileMatchSchedule {
    path: PathBuf,
}

impl FileMatchSchedule {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MatchSchedule for FileMatchSchedule {
    async fn upcoming(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> anyhow::Result<Vec<Match>> {
        let raw = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read match schedule {}", self.path.display()))?;
        let matches: Vec<Match> =
            serde_json::from_slice(&raw).context("Failed to parse match schedule")?;

        Ok(matches
            .into_iter()
            .filter(|m| m.starts_at >= from && m.starts_at < until)
            .collect())
    }
}

/// Matches involving any of `follows`, earliest first.
pub fn matches_for<'a>(follows: &[String], matches: &'a [Match]) -> Vec<&'a Match> {
    let mut selected: Vec<&Match> = matches
        .iter()
        .filter(|m| follows.iter().any(|team| m.involves(team)))
        .collect();
    selected.sort_by(|a, b| {
        a.starts_at
            .cmp(&b.starts_at)
            .then_with(|| a.team_a.cmp(&b.team_a))
    });
    selected
}

fn upcoming_until(now: DateTime<Utc>, window: Duration) -> anyhow::Result<DateTime<Utc>> {
    now.checked_add_signed(window)
        .with_context(|| format!("Notify window {} reaches past the supported date range", window))
}

pub fn thread_name(now: DateTime<Local>) -> String {
    format!("Match Schedule {}", now.format("%b %d"))
}

pub fn render_schedule(matches: &[&Match]) -> String {
    let mut lines: Vec<String> = matches
        .iter()
        .take(MAX_MATCHES_PER_POST)
        .map(|m| {
            format!(
                "<t:{}:f> **{}** vs **{}** ({})",
                m.starts_at.timestamp(),
                m.team_a,
                m.team_b,
                m.league
            )
        })
        .collect();

    if matches.len() > MAX_MATCHES_PER_POST {
        lines.push(format!("...and {} more", matches.len() - MAX_MATCHES_PER_POST));
    }

    lines.join("\n")
}

async fn post_schedule(ctx: &Context, channel_id: &str, matches: &[&Match]) -> anyhow::Result<()> {
    let channel_id = ChannelId(
        channel_id
            .parse::<u64>()
            .with_context(|| format!("Invalid channel id {}", channel_id))?,
    );
    let name = thread_name(Local::now());

    log::info!("Creating thread in {}", channel_id);

    let header = channel_id.say(&ctx.http, &name).await?;
    let thread = channel_id
        .create_public_thread(&ctx.http, header.id, |thread| {
            thread
                .name(&name)
                .auto_archive_duration(THREAD_AUTO_ARCHIVE_MINUTES)
        })
        .await?;

    log::info!("Sending message to {}", thread.id);

    thread.id.say(&ctx.http, render_schedule(matches)).await?;

    Ok(())
}

/// Posts the upcoming matches of every channel's followed teams. A failure in
/// one guild or channel is logged and does not stop the others.
pub async fn notify_subscribers<K, S>(
    ctx: &Context,
    store: &SubscriptionStore<K>,
    schedule: &S,
    window: Duration,
) -> anyhow::Result<()>
where
    K: KvStore,
    S: MatchSchedule,
{
    let now = Utc::now();
    let until = upcoming_until(now, window)?;
    let matches = schedule.upcoming(now, until).await?;

    if matches.is_empty() {
        log::info!("No upcoming matches, nothing to post");
        return Ok(());
    }

    let guild_ids = store
        .guild_ids()
        .await
        .context("Failed to list registered guilds")?;

    for guild_id in guild_ids {
        let guild = match store.load_guild(&guild_id).await {
            Ok(Some(guild)) => guild,
            Ok(None) => continue,
            Err(err) => {
                log::error!("Failed to load guild {}: {:?}", guild_id, err);
                continue;
            }
        };

        for (channel_id, follows) in &guild.subscriptions {
            let selected = matches_for(follows, &matches);
            if selected.is_empty() {
                continue;
            }

            if let Err(err) = post_schedule(ctx, channel_id, &selected).await {
                log::warn!(
                    "Failed to post schedule to channel {} in guild {}: {:?}",
                    channel_id,
                    guild_id,
                    err
                );
            }
        }
    }

    Ok(())
}
