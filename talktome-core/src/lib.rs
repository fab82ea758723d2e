// src/lib.rs

pub mod cache;
pub mod db;
pub mod moderation;
pub mod platforms;
pub mod prompts;
pub mod quota;
pub mod repositories;
pub mod services;
pub mod tasks;
pub mod test_utils;

pub use db::Database;
pub use talktome_common::error::Error;
