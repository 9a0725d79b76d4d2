use async_trait::async_trait;

/// Outbound side of a chat platform: the bot only ever needs to post text
/// into a channel of a given community.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique name, e.g. "discord".
    fn name(&self) -> &str;

    /// Post `text` to `channel_id`. Implementations must refuse channels that
    /// do not belong to `guild_id`.
    async fn send_text(&self, guild_id: &str, channel_id: &str, text: &str) -> Result<(), String>;
}
