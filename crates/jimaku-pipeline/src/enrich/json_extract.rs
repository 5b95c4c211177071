//! Salvaging JSON out of chat-model replies.
//!
//! Models wrap JSON in prose and markdown fences often enough that the
//! callers first cut the reply down to the outermost array/object
//! before handing it to serde.

/// The outermost `[...]` slice of a reply, fences stripped.
pub(crate) fn extract_array(content: &str) -> Option<&str> {
    let trimmed = strip_fences(content);
    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    (start < end).then(|| &trimmed[start..=end])
}

/// The outermost `{...}` slice of a reply, fences stripped.
pub(crate) fn extract_object(content: &str) -> Option<&str> {
    let trimmed = strip_fences(content);
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}

fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") and the closing fence.
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.trim().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_array_passes_through() {
        assert_eq!(extract_array(r#"[{"a":1}]"#), Some(r#"[{"a":1}]"#));
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let content = "```json\n[1, 2]\n```";
        assert_eq!(extract_array(content), Some("[1, 2]"));
    }

    #[test]
    fn surrounding_prose_is_cut() {
        let content = "Here is the result:\n[1]\nHope that helps!";
        assert_eq!(extract_array(content), Some("[1]"));
        let content = "Result: {\"0\": \"x\"} done";
        assert_eq!(extract_object(content), Some("{\"0\": \"x\"}"));
    }

    #[test]
    fn missing_json_is_none() {
        assert_eq!(extract_array("no json here"), None);
        assert_eq!(extract_object("]["), None);
    }
}
