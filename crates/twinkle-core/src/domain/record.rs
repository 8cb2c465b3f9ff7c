//! Per-question answer records, the unit persisted in shard logs.

use serde::{Deserialize, Deserializer, Serialize};

/// Token accounting reported by the model endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "usage_completion_tokens", default)]
    pub completion: u64,
    #[serde(rename = "usage_prompt_tokens", default)]
    pub prompt: u64,
    #[serde(rename = "usage_total_tokens", default)]
    pub total: u64,
}

/// Outcome of evaluating one question. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Ordinal of the originating question within its file.
    #[serde(default)]
    pub question_id: usize,
    /// Rendered prompt sent to the model.
    #[serde(rename = "question", default, deserialize_with = "null_as_empty")]
    pub question_text: String,
    /// Expected label, trimmed and upper-cased.
    #[serde(rename = "correct_answer", default, deserialize_with = "null_as_empty")]
    pub correct_label: String,
    /// Model output with any embedded reasoning removed.
    #[serde(rename = "llm_output", default, deserialize_with = "null_as_empty")]
    pub raw_output: String,
    #[serde(rename = "llm_reasoning_output", default)]
    pub reasoning_text: Option<String>,
    #[serde(rename = "predicted_answer", default)]
    pub predicted_label: Option<String>,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(flatten)]
    pub token_usage: TokenUsage,
    /// Question file the record came from. Absent in legacy shards.
    #[serde(default, alias = "file", skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

/// Case-insensitive, whitespace-trimmed label comparison. A missing
/// prediction is never correct.
pub fn is_correct(predicted: Option<&str>, correct: &str) -> bool {
    match predicted {
        Some(p) => p.trim().to_uppercase() == correct.trim().to_uppercase(),
        None => false,
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> AnswerRecord {
        AnswerRecord {
            question_id: 4,
            question_text: "Q\nA: x\nB: y".to_string(),
            correct_label: "B".to_string(),
            raw_output: "The answer is (B)".to_string(),
            reasoning_text: None,
            predicted_label: Some("B".to_string()),
            is_correct: true,
            token_usage: TokenUsage {
                completion: 5,
                prompt: 20,
                total: 25,
            },
            source_file: Some("mmlu/anatomy.json".to_string()),
        }
    }

    #[test]
    fn is_correct_requires_prediction() {
        assert!(!is_correct(None, "A"));
        assert!(is_correct(Some("a"), "A"));
        assert!(is_correct(Some(" B \n"), " b"));
        assert!(!is_correct(Some("C"), "A"));
        assert!(!is_correct(Some(""), "A"));
    }

    #[test]
    fn persisted_field_names() {
        let v = serde_json::to_value(sample()).expect("serialize");
        let obj = v.as_object().expect("object");
        for key in [
            "question_id",
            "question",
            "correct_answer",
            "llm_output",
            "llm_reasoning_output",
            "predicted_answer",
            "is_correct",
            "usage_completion_tokens",
            "usage_prompt_tokens",
            "usage_total_tokens",
            "source_file",
        ] {
            assert!(obj.contains_key(key), "missing key: {key}");
        }
        assert_eq!(v["usage_total_tokens"], json!(25));
    }

    #[test]
    fn legacy_record_without_source_file_or_usage() {
        let line = json!({
            "question_id": 2,
            "question": "q",
            "correct_answer": "A",
            "llm_output": null,
            "predicted_answer": null,
            "is_correct": false
        });
        let record: AnswerRecord = serde_json::from_value(line).expect("deserialize");
        assert_eq!(record.question_id, 2);
        assert_eq!(record.raw_output, "");
        assert_eq!(record.source_file, None);
        assert_eq!(record.token_usage, TokenUsage::default());
    }

    #[test]
    fn file_alias_is_accepted_for_source_file() {
        let line = json!({"question_id": 0, "file": "x.json", "is_correct": true});
        let record: AnswerRecord = serde_json::from_value(line).expect("deserialize");
        assert_eq!(record.source_file.as_deref(), Some("x.json"));
    }
}
