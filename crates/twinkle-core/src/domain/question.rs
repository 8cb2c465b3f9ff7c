//! Multiple-choice questions and option label numbering.
//!
//! Option labels are bijective base-26 letter codes: `A`..`Z`, then
//! `AA`, `AB`, ... Ordering by label index is the same as ordering by
//! `(length, lexicographic)`.

use serde::{Deserialize, Serialize};

/// Convert a 0-based option index into its letter label (`0 -> A`, `26 -> AA`).
pub fn index_to_label(idx: usize) -> String {
    let mut n = idx + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Inverse of [`index_to_label`]. Returns `None` for anything that is not an
/// upper-case letter code.
pub fn label_to_index(label: &str) -> Option<usize> {
    if label.is_empty() {
        return None;
    }
    let mut n: usize = 0;
    for b in label.bytes() {
        if !b.is_ascii_uppercase() {
            return None;
        }
        n = n.checked_mul(26)?.checked_add((b - b'A') as usize + 1)?;
    }
    Some(n - 1)
}

/// The first `count` option labels in order.
pub fn option_labels(count: usize) -> Vec<String> {
    (0..count).map(index_to_label).collect()
}

/// A non-question, non-answer field of a question record, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionField {
    pub key: String,
    pub text: String,
}

impl QuestionField {
    pub fn new(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            text: text.into(),
        }
    }
}

/// One multiple-choice question as loaded from a dataset file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// 0-based ordinal within the source file.
    pub id: usize,
    /// The question text.
    pub prompt: String,
    /// Every other field in original order. Option fields are the ones whose
    /// key is an option label.
    pub fields: Vec<QuestionField>,
    /// Answer label as found in the file. `None` when missing or not a string.
    pub correct_label: Option<String>,
}

impl Question {
    pub fn new(id: usize, prompt: impl Into<String>) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            fields: Vec::new(),
            correct_label: None,
        }
    }

    /// Builder: append a field.
    pub fn with_field(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.fields.push(QuestionField::new(key, text));
        self
    }

    /// Builder: set the correct label.
    pub fn with_answer(mut self, label: impl Into<String>) -> Self {
        self.correct_label = Some(label.into());
        self
    }

    /// Option labels present on this question, ordered by label index.
    pub fn option_keys(&self) -> Vec<String> {
        let mut keys: Vec<(usize, &str)> = self
            .fields
            .iter()
            .filter_map(|f| label_to_index(&f.key).map(|idx| (idx, f.key.as_str())))
            .collect();
        keys.sort_by_key(|(idx, _)| *idx);
        keys.into_iter().map(|(_, k)| k.to_string()).collect()
    }

    /// Text of the option labelled `label`.
    pub fn option_text(&self, label: &str) -> Option<&str> {
        if label_to_index(label).is_none() {
            return None;
        }
        self.fields
            .iter()
            .find(|f| f.key == label)
            .map(|f| f.text.as_str())
    }

    /// The correct label, trimmed and upper-cased. `None` when missing or blank.
    pub fn expected_label(&self) -> Option<String> {
        let label = self.correct_label.as_deref()?.trim();
        if label.is_empty() {
            None
        } else {
            Some(label.to_uppercase())
        }
    }

    /// Question text followed by one `"{key}: {text}"` line per field.
    pub fn render_prompt(&self) -> String {
        let lines: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("{}: {}", f.key, f.text))
            .collect();
        format!("{}\n{}", self.prompt, lines.join("\n"))
    }
}
