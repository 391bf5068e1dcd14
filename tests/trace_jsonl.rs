use tempfile::tempdir;
use verdict_harness::tournament::{JudgeTrace, LadderStage, TracePhase};
use verdict_harness::{JsonlTraceSink, TraceSink};

#[derive(Debug, serde::Deserialize)]
struct TraceRow {
    call_index: usize,
    phase: String,
    ladder_stage: String,
    outcome: String,
    candidates: Vec<String>,
}

fn make_trace(call_index: usize, stage: LadderStage) -> JudgeTrace {
    JudgeTrace {
        timestamp_ms: 0,
        run_id: "run-1".to_string(),
        chapter_id: "ch-3".to_string(),
        phase: TracePhase::Screening,
        call_index,
        ladder_stage: stage,
        candidates: vec!["Ana".to_string(), "Ben".to_string()],
        prompt_hash: "prompt_hash".to_string(),
        temperature: 0.8,
        max_output_tokens: 1800,
        truncated_by_size_limit: false,
        outcome: "parsed",
        detail: None,
        cached: true,
        input_tokens: 0,
        output_tokens: 0,
        cost_nanodollars: 0,
    }
}

#[test]
fn jsonl_trace_sink_writes_events_and_flushes_on_join() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");

    let (sink, worker) = JsonlTraceSink::new(&path).unwrap();
    sink.record(make_trace(1, LadderStage::FullRubric)).unwrap();
    sink.record(make_trace(2, LadderStage::StructuredOnly)).unwrap();

    drop(sink);
    worker.join().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let rows: Vec<TraceRow> = raw
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].call_index, 1);
    assert_eq!(rows[0].phase, "screening");
    assert_eq!(rows[0].ladder_stage, "full_rubric");
    assert_eq!(rows[0].outcome, "parsed");
    assert_eq!(rows[0].candidates, vec!["Ana", "Ben"]);
    assert_eq!(rows[1].ladder_stage, "structured_only");
}

#[test]
fn jsonl_trace_sink_clones_share_one_writer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");

    let (sink, worker) = JsonlTraceSink::new(&path).unwrap();
    let survivor = sink.clone();
    sink.record(make_trace(1, LadderStage::FullRubric)).unwrap();
    drop(sink);
    survivor.record(make_trace(2, LadderStage::ShortRubric)).unwrap();
    drop(survivor);
    worker.join().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), 2);
}
