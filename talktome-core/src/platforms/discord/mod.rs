pub mod content;
pub mod runtime;

pub use runtime::{ConnectionStatus, DiscordEvent, DiscordPlatform, SlashCommand};
