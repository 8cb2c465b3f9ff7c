//! Dataset discovery and loading.
//!
//! Supported formats: `.json` (array of objects), `.jsonl`, `.csv`, `.tsv`.
//! Records carrying a `choices` list are normalised to labelled option
//! fields (`A`, `B`, ...) before they become [`Question`]s.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::domain::{label_to_index, option_labels, Question, Result, TwinkleError};

pub const SUPPORTED_EXTENSIONS: &[&str] = &["json", "jsonl", "csv", "tsv"];

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Question files under `root`, sorted. A file path is returned as is.
/// Hidden directories are not descended into.
pub fn find_evaluation_files(root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
        e.depth() == 0 || !e.file_type().is_dir() || !e.file_name().to_string_lossy().starts_with('.')
    });
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        match extension(entry.path()) {
            Some(ext) if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) => {
                files.push(entry.into_path());
            }
            Some(ext) if ext == "lock" => {}
            _ => warn!(path = %entry.path().display(), "skipping unsupported file"),
        }
    }
    files.sort();
    info!(root = %root.display(), files = files.len(), "evaluation files discovered");
    Ok(files)
}

/// Load and normalise every question in `path`. Ids are 0-based ordinals.
pub fn load_questions(path: impl AsRef<Path>) -> Result<Vec<Question>> {
    let path = path.as_ref();
    let records = match extension(path).as_deref() {
        Some("json") => read_json(path)?,
        Some("jsonl") => read_jsonl(path)?,
        Some("csv") => read_delimited(path, b',')?,
        Some("tsv") => read_delimited(path, b'\t')?,
        _ => return Err(TwinkleError::UnsupportedFormat(path.to_path_buf())),
    };

    let questions = records
        .into_iter()
        .enumerate()
        .map(|(id, record)| to_question(path, id, normalize_choices(record)))
        .collect::<Result<Vec<_>>>()?;
    info!(path = %path.display(), questions = questions.len(), "dataset loaded");
    Ok(questions)
}

fn malformed(path: &Path, reason: impl Into<String>) -> TwinkleError {
    TwinkleError::MalformedDataset {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn into_object(path: &Path, value: Value, position: usize) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(malformed(
            path,
            format!("record {position} is not an object: {other}"),
        )),
    }
}

fn read_json(path: &Path) -> Result<Vec<Map<String, Value>>> {
    let value: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let Value::Array(items) = value else {
        return Err(malformed(path, "expected a JSON array of records"));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, v)| into_object(path, v, i))
        .collect()
}

fn read_jsonl(path: &Path) -> Result<Vec<Map<String, Value>>> {
    fs::read_to_string(path)?
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            let value: Value = serde_json::from_str(line)
                .map_err(|e| malformed(path, format!("record {i}: {e}")))?;
            into_object(path, value, i)
        })
        .collect()
}

fn read_delimited(path: &Path, delimiter: u8) -> Result<Vec<Map<String, Value>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    for required in ["question", "answer"] {
        if !headers.iter().any(|h| h == required) {
            return Err(malformed(path, format!("missing `{required}` column")));
        }
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let mut map = Map::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            let cell = if header == "answer" {
                cell.trim().to_uppercase()
            } else {
                cell.to_string()
            };
            map.insert(header.to_string(), Value::String(cell));
        }
        records.push(map);
    }
    Ok(records)
}

/// Rewrite `{question, choices: [...], answer: 1 | "B"}` into labelled option
/// fields with a letter answer. Records without a usable `choices` list, or
/// whose answer maps to no generated label, are returned unchanged.
pub fn normalize_choices(record: Map<String, Value>) -> Map<String, Value> {
    let choices = match record.get("choices") {
        Some(Value::Array(items)) if items.len() >= 2 => items.clone(),
        _ => return record,
    };
    let labels = option_labels(choices.len());

    let answer_index = match record.get("answer") {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .map(|n| n as usize),
        Some(Value::String(s)) => {
            let s = s.trim();
            match s.parse::<usize>() {
                Ok(idx) => Some(idx),
                Err(_) => label_to_index(&s.to_uppercase()),
            }
        }
        _ => None,
    };
    let Some(answer_index) = answer_index.filter(|idx| *idx < labels.len()) else {
        return record;
    };

    let mut normalized: Map<String, Value> = record
        .into_iter()
        .filter(|(k, _)| k != "choices" && k != "answer")
        .collect();
    for (label, text) in labels.iter().zip(choices) {
        normalized.insert(label.clone(), text);
    }
    normalized.insert(
        "answer".to_string(),
        Value::String(labels[answer_index].clone()),
    );
    normalized
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn to_question(path: &Path, id: usize, record: Map<String, Value>) -> Result<Question> {
    let prompt = match record.get("question") {
        Some(v) => field_text(v),
        None => return Err(malformed(path, format!("record {id} has no `question` field"))),
    };
    let mut question = Question::new(id, prompt);
    for (key, value) in &record {
        match key.as_str() {
            "question" => {}
            "answer" => {
                if let Value::String(label) = value {
                    question.correct_label = Some(label.clone());
                }
            }
            _ => question = question.with_field(key.clone(), field_text(value)),
        }
    }
    Ok(question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn integer_answer_becomes_letter() {
        let out = normalize_choices(obj(json!({
            "question": "q", "choices": ["w", "x", "y", "z"], "answer": 1
        })));
        assert_eq!(out["A"], "w");
        assert_eq!(out["D"], "z");
        assert_eq!(out["answer"], "B");
        assert!(out.get("choices").is_none());
    }

    #[test]
    fn letter_answer_with_choices() {
        let out = normalize_choices(obj(json!({
            "question": "q", "choices": ["w", "x", "y"], "answer": " c"
        })));
        assert_eq!(out["C"], "y");
        assert_eq!(out["answer"], "C");
    }

    #[test]
    fn out_of_range_answer_left_alone() {
        let input = obj(json!({"question": "q", "choices": ["w", "x"], "answer": 5}));
        assert_eq!(normalize_choices(input.clone()), input);

        let single = obj(json!({"question": "q", "choices": ["w"], "answer": 0}));
        assert_eq!(normalize_choices(single.clone()), single);
    }

    #[test]
    fn more_than_26_choices() {
        let choices: Vec<String> = (0..28).map(|i| format!("opt{i}")).collect();
        let out = normalize_choices(obj(json!({"question": "q", "choices": choices, "answer": 27})));
        assert_eq!(out["AB"], "opt27");
        assert_eq!(out["answer"], "AB");
    }

    #[test]
    fn load_json_preserves_field_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.json");
        fs::write(
            &path,
            r#"[{"question": "1+1?", "A": "1", "B": "2", "answer": "B", "note": 3},
                {"question": "2+2?", "A": "4", "B": "5", "answer": null}]"#,
        )
        .unwrap();
        let qs = load_questions(&path).unwrap();
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[0].render_prompt(), "1+1?\nA: 1\nB: 2\nnote: 3");
        assert_eq!(qs[0].expected_label().as_deref(), Some("B"));
        assert_eq!(qs[1].id, 1);
        assert_eq!(qs[1].correct_label, None);
    }

    #[test]
    fn load_jsonl_and_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let jsonl = dir.path().join("a.jsonl");
        fs::write(
            &jsonl,
            "{\"question\": \"q0\", \"choices\": [\"x\", \"y\"], \"answer\": 0}\n\n{\"question\": \"q1\", \"A\": \"x\", \"B\": \"y\", \"answer\": \"B\"}\n",
        )
        .unwrap();
        let qs = load_questions(&jsonl).unwrap();
        assert_eq!(qs[0].option_keys(), vec!["A", "B"]);
        assert_eq!(qs[0].expected_label().as_deref(), Some("A"));

        let tsv = dir.path().join("b.tsv");
        fs::write(&tsv, "question\tA\tB\tanswer\nq\tx\ty\t b \n").unwrap();
        let qs = load_questions(&tsv).unwrap();
        assert_eq!(qs[0].correct_label.as_deref(), Some("B"));
        assert_eq!(qs[0].option_text("A"), Some("x"));
    }

    #[test]
    fn csv_requires_answer_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.csv");
        fs::write(&path, "question,A,B\nq,x,y\n").unwrap();
        let err = load_questions(&path).unwrap_err();
        assert!(matches!(err, TwinkleError::MalformedDataset { .. }));
    }

    #[test]
    fn unsupported_extension() {
        let err = load_questions("data.parquet").unwrap_err();
        assert!(matches!(err, TwinkleError::UnsupportedFormat(_)));
    }

    #[test]
    fn discovery_is_sorted_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("mmlu")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join("mmlu/b.json"), "[]").unwrap();
        fs::write(root.join("mmlu/a.jsonl"), "").unwrap();
        fs::write(root.join("mmlu/readme.md"), "").unwrap();
        fs::write(root.join(".cache/x.json"), "[]").unwrap();

        let files = find_evaluation_files(root).unwrap();
        assert_eq!(files, vec![root.join("mmlu/a.jsonl"), root.join("mmlu/b.json")]);

        let single = find_evaluation_files(root.join("mmlu/b.json")).unwrap();
        assert_eq!(single, vec![root.join("mmlu/b.json")]);
    }
}
