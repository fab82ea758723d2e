pub mod models;
pub mod provider;

// Re-export public APIs
pub use models::{ProviderConfig, ProviderKind};
pub use provider::{AnthropicProvider, OpenAIProvider, Provider};
