//! QA tests for the planning flow using a scripted generator.
//!
//! These tests verify the generate-validate-repair loop end to end:
//! - Shape coercion in the initial prompt
//! - Corrective retries for non-JSON replies
//! - Repair prompts carrying the rejected payload and violations verbatim
//! - Exhaustion surfacing the final violations

use quill_core::engine::PlanBaselines;
use quill_core::testing::MockGenerator;
use quill_core::{Pipeline, PipelineConfig, PipelineError, ProjectConstraints};
use serde_json::json;
use std::time::Duration;

fn fast_config(root: &std::path::Path) -> PipelineConfig {
    let mut config = PipelineConfig::rooted_at(root);
    config.backend_retries = 0;
    config.retry_backoff = Duration::from_millis(1);
    config
}

async fn pipeline(root: &std::path::Path, mock: MockGenerator) -> Pipeline<MockGenerator> {
    Pipeline::new(mock, ProjectConstraints::default(), fast_config(root))
        .await
        .unwrap()
}

fn valid_plan_json(title: &str) -> String {
    json!({
        "project": {
            "title": title,
            "author": "R. Calloway",
            "genre": "Romance",
            "sub_genre": "Financial thriller"
        },
        "logline": "Two rival quant traders fall in love during a short squeeze.",
        "themes": ["trust", "risk"],
        "characters": {
            "Mara Voss": {
                "description": "Lead derivatives trader",
                "goals": ["Survive the squeeze"]
            },
            "Eli Tran": {
                "description": "Compliance officer",
                "goals": []
            }
        },
        "chapter_outline": [
            {
                "number": 1,
                "title": "Opening Bell",
                "description": "Mara spots the anomaly.",
                "target_words": 2000
            },
            {
                "number": 2,
                "title": "Margin Call",
                "description": "The desk is put on review.",
                "target_words": 2200
            }
        ]
    })
    .to_string()
}

fn baselines() -> PlanBaselines {
    PlanBaselines {
        title: Some("Hearts on Margin".to_string()),
        author: Some("R. Calloway".to_string()),
        required_entities: vec!["Mara Voss".to_string()],
        min_characters: 2,
        min_chapters: 2,
        ..PlanBaselines::default()
    }
}

#[tokio::test]
async fn test_plan_accepted_first_try() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockGenerator::new(vec![valid_plan_json("Hearts on Margin")]);
    let pipeline = pipeline(dir.path(), mock).await;

    let plan = pipeline
        .plan_book("A romance between rival traders.", &baselines())
        .await
        .unwrap();

    assert_eq!(plan.project.title, "Hearts on Margin");
    assert_eq!(plan.chapter_outline.len(), 2);
    assert_eq!(plan.chapter(2).unwrap().title, "Margin Call");
}

#[tokio::test]
async fn test_initial_prompt_carries_materials_and_skeleton() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockGenerator::new(vec![valid_plan_json("Hearts on Margin")]);
    let pipeline = pipeline(dir.path(), mock).await;

    pipeline
        .plan_book("A romance between rival traders.", &baselines())
        .await
        .unwrap();

    let requests = pipeline_requests(&pipeline);
    assert_prompt_contains_in(&requests, 0, "A romance between rival traders.");
    // The coercion block includes a minimal instance of the schema.
    assert_prompt_contains_in(&requests, 0, "\"chapter_outline\"");
    assert!(requests[0].json_format);
    assert_eq!(requests[0].options.temperature, 0.0);
}

#[tokio::test]
async fn test_prose_reply_triggers_corrective_retry() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockGenerator::new(vec![
        "Sure! Let me sketch out a plan for you.".to_string(),
        valid_plan_json("Hearts on Margin"),
    ]);
    let pipeline = pipeline(dir.path(), mock).await;

    let plan = pipeline
        .plan_book("materials", &baselines())
        .await
        .unwrap();
    assert_eq!(plan.project.title, "Hearts on Margin");

    let requests = pipeline_requests(&pipeline);
    assert_eq!(requests.len(), 2);
    assert_prompt_contains_in(&requests, 1, "ONLY the JSON");
}

#[tokio::test]
async fn test_repair_prompt_quotes_domain_violation_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    // Schema-valid but with a misremembered title.
    let mock = MockGenerator::new(vec![
        valid_plan_json("Heart on Margin"),
        valid_plan_json("Hearts on Margin"),
    ]);
    let pipeline = pipeline(dir.path(), mock).await;

    let plan = pipeline
        .plan_book("materials", &baselines())
        .await
        .unwrap();
    assert_eq!(plan.project.title, "Hearts on Margin");

    let requests = pipeline_requests(&pipeline);
    assert_eq!(requests.len(), 2);
    // The repair prompt contains the rejected payload and the exact
    // mismatch, down to the quoted titles.
    assert_prompt_contains_in(&requests, 1, "Heart on Margin");
    assert_prompt_contains_in(
        &requests,
        1,
        r#"project.title "Heart on Margin" must equal "Hearts on Margin"."#,
    );
    assert_prompt_contains_in(&requests, 1, "resend the COMPLETE corrected JSON");
}

#[tokio::test]
async fn test_exhaustion_surfaces_final_violations() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockGenerator::new(vec![
        valid_plan_json("Heart on Margin"),
        valid_plan_json("Heart on Margin"),
        valid_plan_json("Heart on Margin"),
    ]);
    let pipeline = pipeline(dir.path(), mock).await;

    let error = pipeline
        .plan_book("materials", &baselines())
        .await
        .unwrap_err();

    match error {
        PipelineError::PlanExhausted {
            attempts,
            violations,
            last_artifact,
        } => {
            assert_eq!(attempts, 3);
            assert!(violations
                .iter()
                .any(|v| v.contains(r#"must equal "Hearts on Margin""#)));
            let artifact = last_artifact.unwrap();
            assert_eq!(artifact["project"]["title"], "Heart on Margin");
        }
        other => panic!("expected PlanExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_exhausted_backend_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockGenerator::new(vec![]);
    let pipeline = pipeline(dir.path(), mock).await;

    let error = pipeline
        .plan_book("materials", &baselines())
        .await
        .unwrap_err();
    assert!(matches!(error, PipelineError::Backend { .. }));
}

// The pipeline owns the mock; expose its recorded requests for assertions.
fn pipeline_requests(
    pipeline: &Pipeline<MockGenerator>,
) -> Vec<quill_core::GenerationRequest> {
    pipeline.generator().requests()
}

fn assert_prompt_contains_in(
    requests: &[quill_core::GenerationRequest],
    index: usize,
    needle: &str,
) {
    assert!(
        requests[index].prompt.contains(needle),
        "request {index} prompt does not contain {needle:?}:\n{}",
        requests[index].prompt
    );
}
