//! Splitting embedded reasoning out of model output.

use crate::config::ThinkingTags;

/// Split `content` at the first end tag.
///
/// Returns `(answer, reasoning)`, both trimmed, or `None` when the end tag
/// does not occur. When the content opens with the start tag, reasoning is
/// the text between the two tags; otherwise it is everything before the end
/// tag, a stray start tag included (models that omit the opening tag).
pub fn split_reasoning(content: &str, tags: &ThinkingTags) -> Option<(String, String)> {
    let end_at = content.find(&tags.end)?;
    let head = &content[..end_at];
    let reasoning = tags
        .start
        .as_deref()
        .and_then(|start| head.strip_prefix(start))
        .unwrap_or(head);
    let answer = &content[end_at + tags.end.len()..];
    Some((answer.trim().to_string(), reasoning.trim().to_string()))
}
