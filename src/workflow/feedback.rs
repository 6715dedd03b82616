//! 反馈题生成 - 流程层
//!
//! 难度分布由错误类型决定，不看调用方要的数量：
//!
//! | 错误类型 | 基础 | 进阶 | 挑战 |
//! |---|---|---|---|
//! | 不会 | 3 | 2 | 0 |
//! | 做错 | 2 | 2 | 1 |
//!
//! 分布写进提示词作为生成指引，返回的题目不按分布截断。
//! 每道候选题单独校验、单独保存，保存失败只跳过该题。

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, GenerationFailure};
use crate::models::{
    Difficulty, DifficultyDistribution, ErrorType, FeedbackCandidate, FeedbackQuestion,
};
use crate::services::contracts::{
    generation_with_timeout, with_timeout, GenerationService, RecordRepository,
};
use crate::utils::logging::truncate_text;
use crate::workflow::prompts;

const DID_NOT_KNOW: DifficultyDistribution = DifficultyDistribution::new(3, 2, 0);
const MADE_MISTAKE: DifficultyDistribution = DifficultyDistribution::new(2, 2, 1);

/// 按错误类型决定难度分布
///
/// 已知错误类型使用固定分布，`count` 只在错误类型未知时生效：
/// 前一半（向上取整）为基础题，其余为进阶题。
pub fn distribution_for(error_type: Option<ErrorType>, count: usize) -> DifficultyDistribution {
    match error_type {
        Some(ErrorType::DidNotKnow) => DID_NOT_KNOW,
        Some(ErrorType::MadeMistake) => MADE_MISTAKE,
        None => {
            let basic = count.div_ceil(2);
            DifficultyDistribution::new(basic, count - basic, 0)
        }
    }
}

/// 一道生成的反馈题及其保存结果
#[derive(Debug, Clone)]
pub struct GeneratedFeedback {
    pub question: FeedbackQuestion,
    /// 保存失败时为 `None`
    pub feedback_id: Option<String>,
}

/// 一次生成的全部反馈题（包括保存失败的）
#[derive(Debug, Clone, Default)]
pub struct FeedbackBatch {
    pub items: Vec<GeneratedFeedback>,
}

impl FeedbackBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn questions(&self) -> impl Iterator<Item = &FeedbackQuestion> {
        self.items.iter().map(|item| &item.question)
    }

    /// 已经保存成功的题目
    pub fn persisted(&self) -> impl Iterator<Item = &GeneratedFeedback> {
        self.items.iter().filter(|item| item.feedback_id.is_some())
    }

    pub fn count_of(&self, difficulty: Difficulty) -> usize {
        self.questions().filter(|q| q.difficulty == difficulty).count()
    }
}

/// 反馈题生成引擎
pub struct FeedbackPolicyEngine {
    generator: Arc<dyn GenerationService>,
    repository: Arc<dyn RecordRepository>,
    call_timeout: Duration,
    generation_timeout: Duration,
}

impl FeedbackPolicyEngine {
    pub fn new(
        generator: Arc<dyn GenerationService>,
        repository: Arc<dyn RecordRepository>,
        call_timeout: Duration,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            generator,
            repository,
            call_timeout,
            generation_timeout,
        }
    }

    /// 基于母题生成反馈题并逐题保存
    ///
    /// # 参数
    /// - `record_id`: 母题记录ID
    /// - `question_text`: 母题文本；不传时从记录中解析
    /// - `count`: 期望数量，错误类型已知时被固定分布覆盖
    pub async fn generate_feedback(
        &self,
        record_id: &str,
        question_text: Option<&str>,
        count: usize,
    ) -> AppResult<FeedbackBatch> {
        let record = with_timeout("读取记录", self.call_timeout, self.repository.get(record_id))
            .await
            .map_err(|e| AppError::lookup(record_id, e))?;

        let text = question_text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| record.resolve_question_text())
            .ok_or_else(|| {
                AppError::MissingContext(format!("记录 {} 没有可用的题目文本，请提供母题", record_id))
            })?;

        let distribution = distribution_for(record.error_type, count);
        if distribution.total() == 0 {
            warn!("[{}] ⚠️ 需要生成的题目数量为 0，跳过", record_id);
            return Ok(FeedbackBatch::default());
        }

        info!(
            "[{}] 📝 开始生成反馈题: {}",
            record_id,
            distribution.guidance()
        );

        let request = prompts::feedback_questions(
            &text,
            &record.subject,
            &record.knowledge_points,
            record.error_type,
            &distribution,
        );
        let value =
            generation_with_timeout(self.generation_timeout, self.generator.complete_json(&request))
                .await?;

        let questions = select_candidates(record_id, &value, &distribution);
        if questions.is_empty() {
            return Err(GenerationFailure::malformed("反馈题列表", truncate_text(&value.to_string(), 80)).into());
        }

        let mut batch = FeedbackBatch::default();
        for question in questions {
            let feedback_id = match with_timeout(
                "保存反馈题",
                self.call_timeout,
                self.repository.append_feedback(&question),
            )
            .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(
                        "[{}] ⚠️ 反馈题保存失败，跳过: {} ({})",
                        record_id,
                        truncate_text(&question.question_content, 30),
                        e
                    );
                    None
                }
            };
            batch.items.push(GeneratedFeedback {
                question,
                feedback_id,
            });
        }

        info!(
            "[{}] ✅ 反馈题生成完成: {} 道，已保存 {} 道",
            record_id,
            batch.len(),
            batch.persisted().count()
        );
        Ok(batch)
    }
}

/// 逐题校验候选题，保留全部有效题目
///
/// 难度分布只是生成指引，实际数量和分布不一致时只记警告。
fn select_candidates(
    record_id: &str,
    value: &JsonValue,
    distribution: &DifficultyDistribution,
) -> Vec<FeedbackQuestion> {
    let raw = value
        .get("questions")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default();

    let mut selected = Vec::new();
    for (idx, item) in raw.into_iter().enumerate() {
        let candidate: FeedbackCandidate = match serde_json::from_value(item) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("[{}] ⚠️ 第 {} 道候选题格式错误，丢弃: {}", record_id, idx + 1, e);
                continue;
            }
        };

        match validate_candidate(record_id, candidate) {
            Ok(question) => selected.push(question),
            Err(reason) => {
                warn!("[{}] ⚠️ 第 {} 道候选题无效，丢弃: {}", record_id, idx + 1, reason);
            }
        }
    }

    let mut actual = DifficultyDistribution::default();
    for question in &selected {
        match question.difficulty {
            Difficulty::Basic => actual.basic += 1,
            Difficulty::Advanced => actual.advanced += 1,
            Difficulty::Challenge => actual.challenge += 1,
        }
    }
    if !selected.is_empty() && actual != *distribution {
        warn!(
            "[{}] ⚠️ 难度分布与要求不一致: 要求 {}，实际 {}",
            record_id,
            distribution.guidance(),
            actual.guidance()
        );
    }

    selected
}

fn validate_candidate(
    record_id: &str,
    candidate: FeedbackCandidate,
) -> Result<FeedbackQuestion, String> {
    let question = candidate.question.trim();
    let answer = candidate.answer.trim();
    if question.is_empty() {
        return Err("题目内容为空".to_string());
    }
    if answer.is_empty() {
        return Err("答案为空".to_string());
    }
    let difficulty = Difficulty::from_label(&candidate.difficulty)
        .ok_or_else(|| format!("无法识别的难度 '{}'", candidate.difficulty))?;

    let explanation = candidate.explanation.trim();
    Ok(FeedbackQuestion {
        master_question_id: record_id.to_string(),
        question_content: question.to_string(),
        difficulty,
        standard_answer: answer.to_string(),
        explanation: (!explanation.is_empty()).then(|| explanation.to_string()),
        student_answer: None,
        is_correct: None,
        created_at: Local::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_error_types_ignore_count() {
        for count in [0, 1, 5, 12] {
            let did_not_know = distribution_for(Some(ErrorType::DidNotKnow), count);
            assert_eq!(did_not_know, DifficultyDistribution::new(3, 2, 0));
            assert_eq!(did_not_know.total(), 5);

            let made_mistake = distribution_for(Some(ErrorType::MadeMistake), count);
            assert_eq!(made_mistake, DifficultyDistribution::new(2, 2, 1));
            assert_eq!(made_mistake.total(), 5);
        }
    }

    #[test]
    fn test_unknown_error_type_splits_count() {
        assert_eq!(distribution_for(None, 5), DifficultyDistribution::new(3, 2, 0));
        assert_eq!(distribution_for(None, 4), DifficultyDistribution::new(2, 2, 0));
        assert_eq!(distribution_for(None, 1), DifficultyDistribution::new(1, 0, 0));
        assert_eq!(distribution_for(None, 0).total(), 0);
    }

    #[test]
    fn test_invalid_candidates_dropped() {
        let value = json!({
            "questions": [
                { "question": "3x+1=10，求x", "answer": "x=3", "explanation": "移项", "difficulty": "基础" },
                { "question": "", "answer": "x=1", "difficulty": "基础" },
                { "question": "5x-2=8，求x", "answer": "  ", "difficulty": "进阶" },
                { "question": "2(x+1)=8，求x", "answer": "x=3", "difficulty": "地狱" },
                "not an object",
                { "question": "4x+4=0，求x", "answer": "x=-1", "difficulty": "advanced" }
            ]
        });

        let selected = select_candidates("rec1", &value, &DifficultyDistribution::new(2, 2, 1));
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].difficulty, Difficulty::Basic);
        assert_eq!(selected[0].explanation.as_deref(), Some("移项"));
        assert_eq!(selected[1].difficulty, Difficulty::Advanced);
        assert!(selected.iter().all(|q| q.master_question_id == "rec1"));
    }

    #[test]
    fn test_candidates_kept_when_distribution_differs() {
        let item = |d: &str| json!({ "question": "x+1=2", "answer": "x=1", "difficulty": d });
        let value = json!({
            "questions": [item("基础"), item("基础"), item("基础"), item("进阶"), item("挑战")]
        });

        let selected = select_candidates("rec1", &value, &distribution_for(Some(ErrorType::MadeMistake), 5));
        assert_eq!(selected.len(), 5);
        let basic = selected.iter().filter(|q| q.difficulty == Difficulty::Basic).count();
        assert_eq!(basic, 3);
        assert_eq!(selected[3].difficulty, Difficulty::Advanced);
        assert_eq!(selected[4].difficulty, Difficulty::Challenge);
    }
}
