use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use verdict_harness::oracle::{JudgeOracle, OracleError, OracleReply, OracleUsage};
use verdict_harness::prompts::{JudgePrompt, PromptShape, RankingContext};
use verdict_harness::tournament::{
    parse_response, Candidate, CandidateRegistry, JudgeError, LadderStage, ParseOutcome,
    TruncationDetector, VerdictLadder,
};

/// Replays canned replies in order and records every prompt it saw.
struct Scripted {
    replies: Mutex<VecDeque<(String, bool)>>,
    seen: Mutex<Vec<(PromptShape, usize, f32, bool)>>,
}

impl Scripted {
    fn new(replies: &[(&str, bool)]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|(t, f)| (t.to_string(), *f)).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<(PromptShape, usize, f32, bool)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl JudgeOracle for Scripted {
    async fn invoke(&self, prompt: &JudgePrompt, _: u32) -> Result<OracleReply, OracleError> {
        self.seen.lock().unwrap().push((
            prompt.shape,
            prompt.len_chars(),
            prompt.temperature,
            prompt.json_mode,
        ));
        let (text, truncated) = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ("nothing left".to_string(), false));
        Ok(OracleReply {
            text,
            truncated_by_size_limit: truncated,
            usage: OracleUsage::default(),
        })
    }
}

const GOOD: &str = "Consensus.\n```json\n{\"table\": [{\"rank\": 1, \"id\": \"DRAFT_Bea\"}, {\"rank\": 2, \"id\": \"DRAFT_Al\"}], \"analysis\": \"Bea wins\"}\n```";

fn field() -> Vec<Candidate> {
    vec![
        Candidate::new("Al", "A long draft. ".repeat(20)),
        Candidate::new("Bea", "Another long draft. ".repeat(20)),
    ]
}

fn ctx<'a>(candidates: &'a [Candidate]) -> RankingContext<'a> {
    RankingContext {
        chapter_id: "ch-9",
        source_text: Some("The original chapter, quoted in full for fidelity."),
        candidates,
    }
}

#[tokio::test]
async fn truncated_full_rubric_retries_with_shorter_prompt() {
    let oracle = Scripted::new(&[
        ("CRITIC A: Draft one...\n- Fidelity to original plot", false),
        (GOOD, false),
    ]);
    let detector = TruncationDetector::default();
    let candidates = field();
    let verdict = VerdictLadder::new(&oracle, &detector)
        .run(&ctx(&candidates), 0.7)
        .await
        .expect("parsed on retry");

    assert_eq!(verdict.table.winner().map(|e| e.display_name.as_str()), Some("Bea"));
    assert_eq!(
        verdict.diagnostics.stages,
        vec![LadderStage::FullRubric, LadderStage::ShortRubric]
    );
    assert_eq!(verdict.diagnostics.truncations, 1);
    let seen = oracle.seen();
    assert_eq!(seen[0].0, PromptShape::FullRubric);
    assert_eq!(seen[1].0, PromptShape::ShortRubric);
    assert!(seen[1].1 < seen[0].1, "short rubric must be shorter");
}

#[tokio::test]
async fn provider_length_flag_counts_as_truncation() {
    let oracle = Scripted::new(&[(GOOD, true), (GOOD, false)]);
    let detector = TruncationDetector::default();
    let candidates = field();
    let verdict = VerdictLadder::new(&oracle, &detector)
        .run(&ctx(&candidates), 0.7)
        .await
        .expect("parsed");
    assert_eq!(verdict.diagnostics.oracle_calls, 2);
    assert_eq!(oracle.seen()[1].0, PromptShape::ShortRubric);
}

#[tokio::test]
async fn missing_block_falls_back_to_structured_only() {
    let json_only = r#"{"table": [{"rank": 1, "id": "DRAFT_Al"}, {"rank": 2, "id": "DRAFT_Bea"}]}"#;
    let oracle = Scripted::new(&[("Both drafts are lovely.", false), (json_only, false)]);
    let detector = TruncationDetector::default();
    let candidates = field();
    let verdict = VerdictLadder::new(&oracle, &detector)
        .run(&ctx(&candidates), 0.7)
        .await
        .expect("parsed");

    assert_eq!(verdict.table.rank_of("Al"), Some(1));
    let seen = oracle.seen();
    assert_eq!(seen[1].0, PromptShape::StructuredOnly);
    assert_eq!(seen[1].2, 0.0);
    assert!(seen[1].3, "structured stage uses JSON mode");
    assert_eq!(verdict.diagnostics.decode_failures, 1);
}

#[tokio::test]
async fn double_truncation_is_unparseable_by_default() {
    let replies = [("**DRAFT_", false), ("Plot fidelity:", false)];
    let detector = TruncationDetector::default();
    let candidates = field();

    let oracle = Scripted::new(&replies);
    let err = VerdictLadder::new(&oracle, &detector)
        .run(&ctx(&candidates), 0.7)
        .await
        .expect_err("fails");
    assert!(matches!(err, JudgeError::VerdictUnparseable { .. }));
    assert_eq!(err.diagnostics().truncations, 2);
    assert_eq!(oracle.seen().len(), 2);

    let oracle = Scripted::new(&replies);
    let err = VerdictLadder::new(&oracle, &detector)
        .escalate_truncation(false)
        .run(&ctx(&candidates), 0.7)
        .await
        .expect_err("fails");
    assert!(matches!(err, JudgeError::VerdictTruncated { .. }));
}

#[tokio::test]
async fn exhausted_ladder_never_invents_a_ranking() {
    let oracle = Scripted::new(&[("no", false), ("still no", false)]);
    let detector = TruncationDetector::default();
    let candidates = field();
    let err = VerdictLadder::new(&oracle, &detector)
        .run(&ctx(&candidates), 0.7)
        .await
        .expect_err("fails");
    match err {
        JudgeError::VerdictUnparseable {
            raw, diagnostics, ..
        } => {
            assert_eq!(raw, "still no");
            assert_eq!(
                diagnostics.stages,
                vec![
                    LadderStage::FullRubric,
                    LadderStage::StructuredOnly,
                    LadderStage::Failed
                ]
            );
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn parsing_ignores_table_listing_order() {
    let candidates = vec![
        Candidate::new("Al", "a"),
        Candidate::new("Bea", "b"),
        Candidate::new("Cy", "c"),
    ];
    let registry = CandidateRegistry::new(&candidates);
    let detector = TruncationDetector::default();
    let sorted = r#"```json
{"table": [{"rank": 1, "id": "DRAFT_Cy", "tone": 9}, {"rank": 2, "id": "DRAFT_Al", "tone": 7}, {"rank": 3, "id": "DRAFT_Bea", "tone": 4}]}
```"#;
    let shuffled = r#"```json
{"table": [{"rank": 3, "id": "DRAFT_Bea", "tone": 4}, {"rank": 1, "id": "DRAFT_Cy", "tone": 9}, {"rank": 2, "id": "DRAFT_Al", "tone": 7}]}
```"#;
    let (ParseOutcome::Parsed(a), ParseOutcome::Parsed(b)) = (
        parse_response(sorted, false, &registry, &detector),
        parse_response(shuffled, false, &registry, &detector),
    ) else {
        panic!("both should parse");
    };
    for name in ["Al", "Bea", "Cy"] {
        assert_eq!(a.table.rank_of(name), b.table.rank_of(name));
        assert_eq!(a.table.entry(name).map(|e| e.scores), b.table.entry(name).map(|e| e.scores));
    }
    assert_eq!(b.table.winner().map(|e| e.display_name.as_str()), Some("Cy"));
}

#[test]
fn parsing_ignores_where_the_block_sits_in_prose() {
    let candidates = field();
    let registry = CandidateRegistry::new(&candidates);
    let detector = TruncationDetector::default();
    let block = r#"```json
{"table": [{"rank": 1, "id": "DRAFT_Al", "overall": 8}, {"rank": 2, "id": "DRAFT_Bea", "overall": 6}], "analysis": "Al is tighter.", "feedback": {"DRAFT_Bea": "Cut the prologue."}}
```"#;
    let replies = [
        format!("{block}\n\nThat settles it."),
        format!("CRITIC A: Al reads cleanly.\n\n{block}\n\nCRITIC B: agreed."),
        format!("After long debate the panel agreed.\n\n{block}"),
    ];

    let verdicts: Vec<_> = replies
        .iter()
        .map(|raw| match parse_response(raw, false, &registry, &detector) {
            ParseOutcome::Parsed(v) => v,
            other => panic!("expected a verdict, got {other:?}"),
        })
        .collect();
    for v in &verdicts[1..] {
        assert_eq!(v.table, verdicts[0].table);
        assert_eq!(v.analysis_text, verdicts[0].analysis_text);
        assert_eq!(v.feedback_by_candidate, verdicts[0].feedback_by_candidate);
    }
    assert_eq!(verdicts[0].feedback_by_candidate["Bea"], "Cut the prologue.");
}
