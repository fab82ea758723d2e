pub mod ai_traits;
pub mod platform_traits;
pub mod repository_traits;

pub use ai_traits::{ChatModel, ModerationService};
pub use platform_traits::{ChannelHistory, ReplySink};
pub use repository_traits::QuotaLedger;
