//! Answer extraction: raw model text to a predicted option label.

use std::sync::Arc;

use regex::Regex;

use crate::domain::ConfigError;

pub trait AnswerExtractor: Send + Sync {
    /// The predicted label, or `None` when the text commits to no option.
    fn extract_answer(&self, text: &str) -> Option<String>;

    /// Evaluation method name used in config.
    fn name(&self) -> &'static str;
}

/// Recognises "The answer is (X)", "Answer: X", "答案是 X", a bare label, and
/// finally the first parenthesised label.
pub struct PatternExtractor {
    phrases: Vec<Regex>,
    bare: Regex,
    parenthesised: Regex,
}

impl PatternExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            phrases: vec![
                Regex::new(r"(?:[Aa]nswer|ANSWER)\s*(?:is|IS|:|：)\s*[:：]?\s*[(（]?\s*([A-Z]{1,2})\b")?,
                Regex::new(r"答案\s*(?:是|為|为)?\s*[:：]?\s*[(（]?\s*([A-Z]{1,2})\b")?,
            ],
            bare: Regex::new(r"^\s*[(（]?([A-Z]{1,2})[)）]?[.。]?\s*$")?,
            parenthesised: Regex::new(r"[(（]([A-Z]{1,2})[)）]")?,
        })
    }
}

impl AnswerExtractor for PatternExtractor {
    fn extract_answer(&self, text: &str) -> Option<String> {
        for phrase in &self.phrases {
            if let Some(caps) = phrase.captures_iter(text).last() {
                return Some(caps[1].to_string());
            }
        }
        if let Some(caps) = self.bare.captures(text) {
            return Some(caps[1].to_string());
        }
        self.parenthesised
            .captures(text)
            .map(|caps| caps[1].to_string())
    }

    fn name(&self) -> &'static str {
        "pattern"
    }
}

/// Recognises LaTeX-style `\boxed{X}` (last occurrence wins).
pub struct BoxExtractor {
    boxed: Regex,
}

impl BoxExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            boxed: Regex::new(r"\\box(?:ed)?\s*\{\s*(?:\\text\{)?\s*\(?([A-Za-z]{1,2})\)?\s*\}?\s*\}")?,
        })
    }
}

impl AnswerExtractor for BoxExtractor {
    fn extract_answer(&self, text: &str) -> Option<String> {
        self.boxed
            .captures_iter(text)
            .last()
            .map(|caps| caps[1].to_uppercase())
    }

    fn name(&self) -> &'static str {
        "box"
    }
}

/// Build the extractor named by `evaluation.evaluation_method`.
pub fn extractor_for(method: &str) -> Result<Arc<dyn AnswerExtractor>, ConfigError> {
    let invalid = |e: regex::Error| ConfigError::InvalidField {
        field: "evaluation.evaluation_method".to_string(),
        reason: e.to_string(),
    };
    match method {
        "pattern" => Ok(Arc::new(PatternExtractor::new().map_err(invalid)?)),
        "box" => Ok(Arc::new(BoxExtractor::new().map_err(invalid)?)),
        other => Err(ConfigError::UnknownEvaluationMethod(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(text: &str) -> Option<String> {
        PatternExtractor::new().unwrap().extract_answer(text)
    }

    #[test]
    fn pattern_answer_phrases() {
        assert_eq!(pattern("Let me think. The answer is (C).").as_deref(), Some("C"));
        assert_eq!(pattern("Answer: B").as_deref(), Some("B"));
        assert_eq!(pattern("answer is AB").as_deref(), Some("AB"));
        assert_eq!(pattern("經過分析，答案是 D").as_deref(), Some("D"));
        assert_eq!(pattern("答案：（A）").as_deref(), Some("A"));
    }

    #[test]
    fn pattern_prefers_last_stated_answer() {
        let text = "At first the answer is (A). On reflection the answer is (B).";
        assert_eq!(pattern(text).as_deref(), Some("B"));
    }

    #[test]
    fn pattern_bare_and_parenthesised() {
        assert_eq!(pattern("  B. ").as_deref(), Some("B"));
        assert_eq!(pattern("I would pick (D) here").as_deref(), Some("D"));
    }

    #[test]
    fn pattern_no_answer() {
        assert_eq!(pattern("I am not sure."), None);
        assert_eq!(pattern("The answer is Bob"), None);
        assert_eq!(pattern(""), None);
    }

    #[test]
    fn boxed_answers() {
        let b = BoxExtractor::new().unwrap();
        assert_eq!(b.extract_answer(r"so \boxed{c}").as_deref(), Some("C"));
        assert_eq!(b.extract_answer(r"\boxed{A} wait \boxed{(B)}").as_deref(), Some("B"));
        assert_eq!(b.extract_answer(r"\boxed{\text{D}}").as_deref(), Some("D"));
        assert_eq!(b.extract_answer("no box here"), None);
    }

    #[test]
    fn extractor_for_known_methods() {
        assert_eq!(extractor_for("pattern").unwrap().name(), "pattern");
        assert_eq!(extractor_for("box").unwrap().name(), "box");
        assert!(extractor_for("judge").is_err());
    }
}
