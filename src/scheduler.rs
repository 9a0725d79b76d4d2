use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::runtime::AppState;
use parabot_channels::channel::deliver_celebration;
use parabot_channels::channel_adapter::ChannelAdapter;
use parabot_core::error::ParabotError;
use parabot_storage::db::{call_blocking, Database};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub matched: usize,
    pub delivered: usize,
    /// Matches in guilds that never ran `setchannel`.
    pub skipped: usize,
    pub failed: usize,
}

/// Calendar day and month of `now` as seen in `tz`.
pub fn day_month_in(tz: Tz, now: DateTime<Utc>) -> (u32, u32) {
    let local = now.with_timezone(&tz);
    (local.day(), local.month())
}

pub fn pick_media<'a, R: Rng + ?Sized>(media: &'a [String], rng: &mut R) -> Option<&'a str> {
    media.choose(rng).map(String::as_str)
}

/// Next firing of `schedule` strictly after `now`, evaluated in `tz`.
pub fn next_fire(schedule: &cron::Schedule, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&now.with_timezone(&tz))
        .next()
        .map(|t| t.with_timezone(&Utc))
}

/// One Scanning → Dispatching pass for `day`/`month`.
///
/// A failed delivery is logged and counted; it never stops the remaining records.
pub async fn scan_and_dispatch(
    db: Arc<Database>,
    adapter: &dyn ChannelAdapter,
    day: u32,
    month: u32,
    media: &[String],
) -> Result<ScanReport, ParabotError> {
    let matches = call_blocking(db, move |db| db.find_matching(day, month)).await?;
    let mut report = ScanReport {
        matched: matches.len(),
        ..Default::default()
    };

    for m in matches {
        let Some(channel_id) = m.channel_id.as_deref() else {
            info!(
                "Birthday of {} in guild {} skipped: no channel configured",
                m.user_id, m.guild_id
            );
            report.skipped += 1;
            continue;
        };
        let media_url = pick_media(media, &mut rand::thread_rng()).map(str::to_string);
        let delivery = deliver_celebration(
            adapter,
            &m.guild_id,
            channel_id,
            &m.user_id,
            media_url.as_deref(),
        );
        match delivery.await {
            Ok(()) => {
                info!(
                    "Birthday message sent for {} in guild {} (channel {channel_id})",
                    m.user_id, m.guild_id
                );
                report.delivered += 1;
            }
            Err(e) => {
                error!(
                    "Failed to send birthday message for {} in guild {}: {e}",
                    m.user_id, m.guild_id
                );
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Scan for today in the configured timezone and log the outcome.
pub async fn run_notification_cycle(state: &AppState, adapter: &dyn ChannelAdapter, trigger: &str) {
    let tz = match state.config.tz() {
        Ok(tz) => tz,
        Err(e) => {
            error!("Notification scan ({trigger}) aborted: {e}");
            return;
        }
    };
    let (day, month) = day_month_in(tz, Utc::now());
    info!("Checking birthdays for {day:02}/{month:02} ({trigger})");
    match scan_and_dispatch(
        state.db.clone(),
        adapter,
        day,
        month,
        &state.config.celebration_media,
    )
    .await
    {
        Ok(report) => info!(
            "Notification scan ({trigger}): {} matched, {} delivered, {} skipped, {} failed",
            report.matched, report.delivered, report.skipped, report.failed
        ),
        Err(e) => error!("Notification scan ({trigger}) failed: {e}"),
    }
}

/// Sleep until the next firing of `schedule`. Returns false when the schedule has no future run.
async fn sleep_until_next(schedule: &cron::Schedule, tz: Tz) -> bool {
    let now = Utc::now();
    let Some(next) = next_fire(schedule, tz, now) else {
        return false;
    };
    let wait = (next - now).to_std().unwrap_or_default();
    tokio::time::sleep(wait).await;
    true
}

/// Boot scan once the gateway is ready, then the daily scan.
pub fn spawn_notifier(
    state: Arc<AppState>,
    adapter: Arc<dyn ChannelAdapter>,
    ready: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if ready.await.is_err() {
            warn!("Notifier: gateway never became ready; boot scan skipped");
        } else {
            run_notification_cycle(&state, adapter.as_ref(), "boot").await;
        }

        let (schedule, tz) = match (state.config.notify_schedule(), state.config.tz()) {
            (Ok(s), Ok(tz)) => (s, tz),
            (Err(e), _) | (_, Err(e)) => {
                error!("Notifier disabled: {e}");
                return;
            }
        };
        info!("Notifier scheduled ({} in {tz})", state.config.notify_cron);
        while sleep_until_next(&schedule, tz).await {
            run_notification_cycle(&state, adapter.as_ref(), "daily").await;
        }
        warn!("Notifier: schedule has no further runs");
    })
}

/// Periodic upload of the local database.
pub fn spawn_sync_job(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (schedule, tz) = match (state.config.sync_schedule(), state.config.tz()) {
            (Ok(s), Ok(tz)) => (s, tz),
            (Err(e), _) | (_, Err(e)) => {
                error!("Periodic sync disabled: {e}");
                return;
            }
        };
        info!("Periodic sync scheduled ({})", state.config.sync_cron);
        while sleep_until_next(&schedule, tz).await {
            info!("Syncing database with remote...");
            state.upload_or_log("periodic").await;
        }
    })
}
