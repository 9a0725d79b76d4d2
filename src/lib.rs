pub mod channels;
pub mod chat_commands;
pub mod config;
pub mod runtime;
pub mod scheduler;
pub mod tools;

pub use channels::discord;
pub use parabot_app::logging;
pub use parabot_channels::channel;
pub use parabot_channels::channel_adapter;
pub use parabot_core::error;
pub use parabot_core::text;
pub use parabot_storage::db;
