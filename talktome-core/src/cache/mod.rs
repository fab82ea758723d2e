// File: src/cache/mod.rs

pub mod message_cache;

pub use message_cache::{AddOutcome, MessageCache};
