// File: src/prompts.rs

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use crate::Error;

pub const CONVERSATION_PROMPT: &str = "DISCORD_CONVERSATION_PROMPT";
pub const NOT_AUTHORIZED_PROMPT: &str = "DISCORD_YOU_ARE_NOT_AUTHORIZED";
pub const LIMIT_REACHED_PROMPT: &str = "DISCORD_TOKEN_USAGE_LIMIT_REACHED";

const REQUIRED_PROMPTS: [&str; 3] =
    [CONVERSATION_PROMPT, NOT_AUTHORIZED_PROMPT, LIMIT_REACHED_PROMPT];

/// Named prompt texts loaded from a flat JSON object of strings.
#[derive(Debug, Clone)]
pub struct Prompts {
    prompts: HashMap<String, String>,
}

impl Prompts {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let prompts = Self::from_json(&raw)?;
        info!("Loaded {} prompts from {}", prompts.prompts.len(), path.display());
        Ok(prompts)
    }

    /// Fails when the JSON is malformed or a required prompt is missing.
    pub fn from_json(raw: &str) -> Result<Self, Error> {
        let prompts: HashMap<String, String> = serde_json::from_str(raw)?;
        let loaded = Self { prompts };
        for name in REQUIRED_PROMPTS {
            loaded.get(name)?;
        }
        Ok(loaded)
    }

    pub fn get(&self, name: &str) -> Result<&str, Error> {
        self.prompts
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::NotFound(format!("prompt {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r#"{
        "DISCORD_CONVERSATION_PROMPT": "You are a friendly bot.",
        "DISCORD_YOU_ARE_NOT_AUTHORIZED": "Nope.",
        "DISCORD_TOKEN_USAGE_LIMIT_REACHED": "Out of tokens, try later.",
        "EXTRA": "kept"
    }"#;

    #[test]
    fn loads_named_prompts() {
        let prompts = Prompts::from_json(VALID).unwrap();
        assert_eq!(prompts.get(CONVERSATION_PROMPT).unwrap(), "You are a friendly bot.");
        assert_eq!(prompts.get("EXTRA").unwrap(), "kept");
        assert!(matches!(prompts.get("MISSING"), Err(Error::NotFound(_))));
    }

    #[test]
    fn missing_required_prompt_is_rejected() {
        let err = Prompts::from_json(r#"{"DISCORD_CONVERSATION_PROMPT": "hi"}"#).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(Prompts::from_json("[1, 2"), Err(Error::Json(_))));
    }

    #[test]
    fn reads_prompts_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let prompts = Prompts::from_path(file.path()).unwrap();
        assert_eq!(prompts.get(LIMIT_REACHED_PROMPT).unwrap(), "Out of tokens, try later.");
        assert!(matches!(Prompts::from_path("/nonexistent/prompts.json"), Err(Error::Io(_))));
    }
}
