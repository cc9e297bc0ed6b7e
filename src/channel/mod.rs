mod hub;
mod message;
mod resilient;
#[cfg(test)]
mod tests;

pub use hub::{HubEndpoint, MessageHub};
pub use message::{Message, MessageHandler, MessageTransport};
pub use resilient::{ChannelSender, ChannelStats, ChannelStatsSnapshot, ResilientChannel};
