// talktome-core/src/platforms/discord/content.rs

/// Discord rejects messages longer than this many characters.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Replaces `<@id>` and `<@!id>` mentions with the given display names.
/// Mentions of unknown ids are left as they are.
pub fn resolve_mentions(content: &str, names: &[(u64, String)]) -> String {
    let mut resolved = content.to_string();
    for (id, name) in names {
        resolved = resolved
            .replace(&format!("<@{}>", id), name)
            .replace(&format!("<@!{}>", id), name);
    }
    resolved
}

/// Splits `text` into chunks of at most `max_chars` characters, preferring
/// to cut after a newline. Empty input yields no chunks.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars.max(1) {
        let hard_cut = rest
            .char_indices()
            .nth(max_chars.max(1))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let cut = match rest[..hard_cut].rfind('\n') {
            Some(newline) if newline > 0 => newline + 1,
            _ => hard_cut,
        };
        chunks.push(rest[..cut].trim_end_matches('\n').to_string());
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}
