use async_trait::async_trait;
use fuseqa_core::consensus::{select_best, select_best_batch, AnswerCandidate, ConsensusQuestion};
use fuseqa_core::llm::Completion;
use fuseqa_core::{FuseError, Result};
use parking_lot::Mutex;

/// Follows the instructions the way a well-behaved model would, but wraps every reply in noise.
struct ScriptedJudge {
    prompts: Mutex<Vec<String>>,
    label_override: Option<&'static str>,
}

impl ScriptedJudge {
    fn new() -> Self { Self { prompts: Mutex::new(Vec::new()), label_override: None } }
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
    let from = text.find(start).map(|i| i + start.len()).unwrap();
    let to = text[from..].find(end).map(|i| from + i).unwrap();
    &text[from..to]
}

fn verdict_json(prompt: &str) -> serde_json::Value {
    let quoted = between(prompt, "Input JSON:\n", "\n\nJust Output");
    let raw: String = serde_json::from_str(quoted).unwrap();
    let start = raw.find('{').unwrap();
    let end = raw.rfind('}').unwrap();
    serde_json::from_str(&raw[start..=end]).unwrap()
}

#[async_trait]
impl Completion for ScriptedJudge {
    fn name(&self) -> &str { "scripted" }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        if prompt.contains("identify which model gave the best response") {
            assert!(prompt.contains("not a follow-up question"));
            let input: serde_json::Value = serde_json::from_str(between(prompt, "Input JSON:\n", "\n\nFor the above")).unwrap();
            let (model, answer) = input["answers"]
                .as_object()
                .unwrap()
                .iter()
                .find(|(_, text)| !text.as_str().unwrap().trim_end().ends_with('?'))
                .map(|(m, a)| (m.clone(), a.as_str().unwrap().to_string()))
                .unwrap();
            let model = self.label_override.map(str::to_string).unwrap_or(model);
            return Ok(format!(
                "Sure! Here is my verdict:\n{}\nLet me know if you need more.",
                serde_json::json!({ "best_model": model, "best_answer": answer })
            ));
        }
        let verdict = verdict_json(prompt);
        if prompt.contains("Just Output the best_model") {
            return Ok(format!("best_model: {}\n", verdict["best_model"].as_str().unwrap()));
        }
        if prompt.contains("Just Output the best_answer") {
            return Ok(format!("\"{}\"", verdict["best_answer"].as_str().unwrap()));
        }
        Err(FuseError::external("scripted", "unexpected prompt"))
    }
}

fn candidates() -> Vec<AnswerCandidate> {
    vec![AnswerCandidate::new("S1", "Paris is the capital."), AnswerCandidate::new("S2", "What do you mean?")]
}

#[tokio::test]
async fn prefers_an_answer_over_a_follow_up_question() {
    let judge = ScriptedJudge::new();
    let result = select_best("q1", "What is the capital of France?", &candidates(), &judge).await.unwrap();
    assert_eq!(result.source, "S1");
    assert_eq!(result.answer, "Paris is the capital.");
    assert_eq!(judge.prompts.lock().len(), 3);
}

#[tokio::test]
async fn answer_is_copied_from_the_candidate_not_the_judge() {
    struct Paraphraser;
    #[async_trait]
    impl Completion for Paraphraser {
        fn name(&self) -> &str { "paraphraser" }
        async fn complete(&self, prompt: &str) -> Result<String> {
            if prompt.contains("Just Output the best_model") { return Ok("S1".into()); }
            Ok("The capital is Paris, obviously.".into())
        }
    }
    let result = select_best("q1", "Capital?", &candidates(), &Paraphraser).await.unwrap();
    assert_eq!(result.answer, "Paris is the capital.");
}

#[tokio::test]
async fn unknown_label_is_an_extraction_failure() {
    let judge = ScriptedJudge { prompts: Mutex::new(Vec::new()), label_override: Some("S9") };
    let err = select_best("q1", "Capital?", &candidates(), &judge).await.unwrap_err();
    assert!(matches!(err, FuseError::ConsensusExtraction { ref query_id, .. } if query_id == "q1"));
}

#[tokio::test]
async fn empty_candidates_fail_without_calling_the_judge() {
    let judge = ScriptedJudge::new();
    assert!(select_best("q1", "Capital?", &[], &judge).await.is_err());
    assert!(judge.prompts.lock().is_empty());
}

#[tokio::test]
async fn batch_collects_failures_alongside_successes() {
    let judge = ScriptedJudge::new();
    let questions = vec![
        ConsensusQuestion { query_id: "q1".into(), question: "Capital of France?".into(), candidates: candidates() },
        ConsensusQuestion { query_id: "q2".into(), question: "Nothing answered".into(), candidates: vec![] },
        ConsensusQuestion {
            query_id: "q3".into(),
            question: "Largest planet?".into(),
            candidates: vec![AnswerCandidate::new("wiki", "Which planet?"), AnswerCandidate::new("bm25", "Jupiter.")],
        },
    ];
    let batch = select_best_batch(&judge, &questions).await;
    assert_eq!(batch.results.len(), 2);
    assert_eq!(batch.results[1].source, "bm25");
    assert_eq!(batch.failures.len(), 1);
    assert_eq!(batch.failures[0].query_id, "q2");
}
