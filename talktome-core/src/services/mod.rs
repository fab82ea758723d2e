pub mod command_service;
pub mod conversation;
pub mod dispatcher;
pub mod message_service;

pub use command_service::{CommandService, QuotaCommand, TOKEN_USAGE_SLASH_COMMAND};
pub use conversation::ConversationAssembler;
pub use dispatcher::ChannelDispatcher;
pub use message_service::{MessageService, MessageServiceConfig};
