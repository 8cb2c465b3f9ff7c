//! Runner to finalize, with a scripted model: a two-rank distributed run must
//! agree with a single-process run over the same dataset.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use twinkle_core::fakes::ScriptedLlm;
use twinkle_core::shard::{merged_run_path, read_records};
use twinkle_core::{
    Distribution, EvalConfig, EvaluationRunner, FileExporter, FinalizeOutcome, Finalizer,
    FsShardStore,
};

const TS: &str = "20250301_0930";

fn write_dataset(root: &Path) -> std::path::PathBuf {
    let dataset = root.join("datasets").join("mmlu");
    fs::create_dir_all(&dataset).unwrap();
    fs::write(
        dataset.join("anatomy.json"),
        r#"[
            {"question": "Q-alpha", "A": "yes", "B": "no", "answer": "A"},
            {"question": "Q-beta", "A": "yes", "B": "no", "answer": "A"},
            {"question": "Q-gamma", "A": "yes", "B": "no", "answer": "A"},
            {"question": "Q-delta", "A": "yes", "B": "no", "answer": "A"}
        ]"#,
    )
    .unwrap();
    fs::write(
        dataset.join("virology.jsonl"),
        "{\"question\": \"Q-epsilon\", \"choices\": [\"x\", \"y\", \"z\"], \"answer\": 2}\n",
    )
    .unwrap();
    dataset
}

fn config(dataset: &Path) -> EvalConfig {
    let yaml = format!(
        r#"
llm_api:
  base_url: http://localhost:9/v1
model:
  name: tiny
evaluation:
  dataset_paths:
    - {path}
  repeat_runs: 2
  datasets_prompt_map:
    {path}: en
"#,
        path = dataset.display()
    );
    EvalConfig::from_yaml_str(&yaml).unwrap()
}

fn llm() -> Arc<ScriptedLlm> {
    Arc::new(
        ScriptedLlm::new()
            .respond("Q-alpha", "The answer is (A)")
            .respond("Q-beta", "The answer is (B)")
            .respond("Q-gamma", "Answer: A")
            .respond("Q-delta", "(A)")
            .respond("Q-epsilon", "The answer is (C)"),
    )
}

#[tokio::test]
async fn single_process_run_exports_final_report() {
    let tmp = tempfile::tempdir().unwrap();
    let dataset = write_dataset(tmp.path());
    let results = tmp.path().join("results");

    let runner = EvaluationRunner::new(config(&dataset), llm())
        .unwrap()
        .with_results_dir(&results);
    let summary = runner.run(Some(TS.to_string())).await.unwrap();

    assert_eq!(summary.written, vec![results.join(format!("results_{TS}.json"))]);
    let ds = &summary.report.dataset_results[&dataset.display().to_string()];
    let anatomy = ds
        .file(&dataset.join("anatomy.json").display().to_string())
        .unwrap();
    assert_eq!(anatomy.individual_runs.accuracies, vec![0.75, 0.75]);
    let virology = ds
        .file(&dataset.join("virology.jsonl").display().to_string())
        .unwrap();
    assert_eq!(virology.accuracy_mean, 1.0);
    assert!((ds.average_accuracy - 0.875).abs() < 1e-12);

    // Each run log holds every file's records.
    assert_eq!(read_records(&merged_run_path(&results, TS, 1)).unwrap().len(), 5);
    assert!(summary.report.config["llm_api"].get("api_key").is_none());
}

#[tokio::test]
async fn two_ranks_then_finalize_matches_single_process() {
    let tmp = tempfile::tempdir().unwrap();
    let dataset = write_dataset(tmp.path());
    let results = tmp.path().join("results");

    for rank in 0..2 {
        let runner = EvaluationRunner::new(config(&dataset), llm())
            .unwrap()
            .with_results_dir(&results)
            .with_distribution(Distribution {
                node: rank,
                rank,
                world_size: 2,
            });
        let summary = runner.run(Some(TS.to_string())).await.unwrap();
        assert_eq!(summary.written.len(), 1);
        assert!(summary.written[0]
            .to_string_lossy()
            .ends_with(&format!("results_{TS}_node{rank}_rank{rank}.json")));
    }

    let finalizer = Finalizer {
        results_dir: &results,
        store: &FsShardStore,
        exporter: &FileExporter,
        publisher: None,
    };
    let FinalizeOutcome::Merged { report, .. } = finalizer.finalize(TS).unwrap() else {
        panic!("expected a merge");
    };

    let ds = &report.dataset_results[&dataset.display().to_string()];
    let anatomy = ds
        .file(&dataset.join("anatomy.json").display().to_string())
        .unwrap();
    assert_eq!(anatomy.individual_runs.accuracies, vec![0.75, 0.75]);
    assert_eq!(anatomy.accuracy_std, 0.0);
    assert!((ds.average_accuracy - 0.875).abs() < 1e-12);

    for run in 0..2 {
        let merged = read_records(&merged_run_path(&results, TS, run)).unwrap();
        let ids: Vec<usize> = merged.iter().map(|r| r.question_id).collect();
        assert_eq!(ids, vec![0, 0, 1, 2, 3]);
    }

    let leftovers: Vec<String> = fs::read_dir(&results)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains("_node"))
        .collect();
    assert!(leftovers.is_empty(), "shards left behind: {leftovers:?}");
}
