pub mod channel;
pub mod channel_adapter;
