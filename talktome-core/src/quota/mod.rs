// File: src/quota/mod.rs

pub mod engine;

pub use engine::{QuotaEngine, QuotaPolicy};
