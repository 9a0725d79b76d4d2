use tracing::warn;

use crate::channel_adapter::ChannelAdapter;
use parabot_core::text::user_mention;

pub fn celebration_text(user_id: &str) -> String {
    format!(
        "🎉 Today is a special day: it's {}'s birthday! May it be full of joy, achievements and unforgettable moments. Happy birthday! 🎂",
        user_mention(user_id)
    )
}

/// Greeting first, then the media link as its own message. The media message
/// is only attempted once the greeting went through.
pub async fn deliver_celebration(
    adapter: &dyn ChannelAdapter,
    guild_id: &str,
    channel_id: &str,
    user_id: &str,
    media_url: Option<&str>,
) -> Result<(), String> {
    adapter
        .send_text(guild_id, channel_id, &celebration_text(user_id))
        .await?;
    if let Some(url) = media_url {
        if let Err(e) = adapter.send_text(guild_id, channel_id, url).await {
            warn!(
                "{}: greeting sent to {channel_id} but media failed: {e}",
                adapter.name()
            );
        }
    }
    Ok(())
}
