mod common;

use std::sync::Arc;

use common::{
    app_with, write_png, FakeCleanup, FakeRecognition, FaultyRepository, ScriptedGeneration,
    THREE_GUIDE_QUESTIONS,
};
use cuoti_mind::models::{Difficulty, DialogueState, ErrorType, TurnOutcome};
use cuoti_mind::services::contracts::RecordRepository;
use serde_json::json;

/// 录入 → 引导 → 清单 → 练习，题目文本只在进程内传递
#[tokio::test]
async fn test_full_learning_flow() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_png(dir.path(), "q.png");

    let repo = Arc::new(FaultyRepository::new());
    let generator = Arc::new(ScriptedGeneration::new());
    generator
        .reply(THREE_GUIDE_QUESTIONS)
        .reply("减去3之后得到什么？")
        .reply("很好，2x=8，两边同时除以2得到x=4。")
        .reply(json!({ "checklist": ["移项", "合并", "系数化1"], "formula": "移项要变号" }).to_string())
        .reply(
            json!({
                "questions": [
                    { "question": "3x+2=11，求x", "answer": "x=3", "explanation": "", "difficulty": "基础" },
                    { "question": "4x-1=7，求x", "answer": "x=2", "explanation": "", "difficulty": "基础" },
                    { "question": "2(x+1)=10，求x", "answer": "x=4", "explanation": "", "difficulty": "进阶" },
                    { "question": "5x+3=2x+12，求x", "answer": "x=3", "explanation": "", "difficulty": "进阶" },
                    { "question": "(x+1)/3+x=7，求x", "answer": "x=5", "explanation": "", "difficulty": "挑战" }
                ]
            })
            .to_string(),
        );

    let app = app_with(
        Arc::new(FakeRecognition::new("2x+3=11，求x")),
        FakeCleanup::working(),
        generator.clone(),
        repo.clone(),
    );

    let intake = app.submit(&image, ErrorType::MadeMistake).await.unwrap();
    assert_eq!(intake.analysis.subject, "数学");

    let mut session = app
        .start_guide(&intake.record_id, Some(intake.question_text.as_str()))
        .await
        .unwrap();
    assert_eq!(session.subject, "数学");
    assert_eq!(session.error_type, ErrorType::MadeMistake);

    let first = app.answer(&mut session, "两边减3").await.unwrap();
    assert!(matches!(first, TurnOutcome::NextQuestion { turn_index: 1, .. }));
    let second = app.answer(&mut session, "2x=8").await.unwrap();
    assert!(matches!(second, TurnOutcome::Summary { .. }));
    assert_eq!(session.state, DialogueState::Finished);

    let checklist = app.finish_guide(&mut session).await.unwrap();
    assert_eq!(checklist.steps, vec!["移项", "合并", "系数化1"]);

    let batch = app
        .generate_practice(&intake.record_id, Some(intake.question_text.as_str()), 3)
        .await
        .unwrap();
    assert_eq!(batch.len(), 5);
    assert_eq!(batch.count_of(Difficulty::Challenge), 1);
    assert_eq!(batch.persisted().count(), 5);

    let practice_prompt = generator.requests()[4].last_user_message().unwrap().to_string();
    assert!(practice_prompt.contains("母题：2x+3=11，求x"));
    assert!(practice_prompt.contains("知识点：一元一次方程、移项"));

    let stored = repo.get(&intake.record_id).await.unwrap();
    assert!(stored.question_text.is_none());
    assert!(!stored.guide_questions.unwrap().contains("2x+3=11"));
    assert_eq!(stored.memory_formula.as_deref(), Some("移项要变号"));
    assert_eq!(generator.remaining(), 0);
}

#[tokio::test]
async fn test_submit_inbox_uses_configured_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.png", "b.png", "c.png"] {
        write_png(dir.path(), name);
    }

    let repo = Arc::new(FaultyRepository::new());
    let app = app_with(
        Arc::new(FakeRecognition::new("2x+3=11")),
        FakeCleanup::failing(),
        Arc::new(ScriptedGeneration::new()),
        repo.clone(),
    );
    assert_eq!(app.config().max_concurrent_images, 2);

    let stats = app.submit_inbox(dir.path(), ErrorType::DidNotKnow).await.unwrap();
    assert_eq!(stats.success(), 3);
    assert_eq!(repo.inner.list(10, 0).await.unwrap().len(), 3);
}
