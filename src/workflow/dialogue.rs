//! 苏格拉底式引导对话 - 流程层
//!
//! 状态机：`Init → Questioning → Summarizing → Finished`，`Error` 为终止态。
//!
//! - 会话由调用方持有，只能通过本模块的操作修改
//! - 生成失败不改动会话，调用方可以原样重试同一轮
//! - 结束后把引导问题、对话记录、解题清单写回所属错题记录

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, GenerationFailure, ServiceError};
use crate::models::{
    DialogueState, GuideSession, ReplyOutcome, SolutionChecklist, Turn, TurnOutcome,
};
use crate::services::contracts::{
    extract_json, generation_with_timeout, with_timeout, GenerationService, RecordRepository,
};
use crate::utils::logging::truncate_text;
use crate::workflow::prompts;

/// 提示词要求的最少引导问题数
pub const MIN_GUIDE_QUESTIONS: usize = 3;
/// 引导问题最多保留的数量
pub const MAX_GUIDE_QUESTIONS: usize = 5;
/// 解题清单最多步数
pub const MAX_CHECKLIST_STEPS: usize = 7;
/// 记忆口诀最大字数
pub const MAX_MNEMONIC_CHARS: usize = 20;

/// 提示学生继续思考的过渡语
const TRANSITION_MARKERS: [&str; 7] = [
    "下一个问题",
    "下一步请",
    "请你想一想",
    "请思考",
    "想一想",
    "next question",
    "now try",
];

/// 行首编号：`1.` `2、` `(3)` `Q1:` `问题1：`，前面可以带列表符号
static NUMBERING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[-*•]\s*)?(?:[(（]?\d+[.、．:：)）]|Q\d+[.、．:：)）]?|问题?\d*[.、．:：)）])\s*")
        .expect("Valid numbering regex")
});

/// 引导对话引擎
pub struct DialogueEngine {
    generator: Arc<dyn GenerationService>,
    repository: Arc<dyn RecordRepository>,
    call_timeout: Duration,
    generation_timeout: Duration,
}

impl DialogueEngine {
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

    /// 为一条错题记录开启引导会话
    ///
    /// # 参数
    /// - `record_id`: 错题记录ID
    /// - `question_text`: 题目文本；不传时只能使用记录里的进程内文本
    ///
    /// 要求生成 3-5 个引导问题。超过 5 个只保留前 5 个；
    /// 少于 3 个（至少 1 个）照常开始会话，只记警告。
    pub async fn start_session(
        &self,
        record_id: &str,
        question_text: Option<&str>,
    ) -> AppResult<GuideSession> {
        let record = with_timeout("读取记录", self.call_timeout, self.repository.get(record_id))
            .await
            .map_err(|e| AppError::lookup(record_id, e))?;

        let text = question_text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| record.resolve_question_text())
            .ok_or_else(|| {
                AppError::MissingContext(format!("记录 {} 没有可用的题目文本，请提供题目", record_id))
            })?;

        let error_type = record.error_type.ok_or_else(|| {
            AppError::MissingContext(format!("记录 {} 缺少不会/做错标记", record_id))
        })?;

        info!(
            "[{}] 💬 开始引导对话: {} ({})",
            record_id,
            truncate_text(&text, 40),
            error_type
        );

        let request = prompts::guide_questions(&text, &record.subject, error_type);
        let content =
            generation_with_timeout(self.generation_timeout, self.generator.complete(&request))
                .await?;

        let mut questions = parse_guide_questions(&content);
        if questions.is_empty() {
            return Err(GenerationFailure::malformed("引导问题列表", truncate_text(&content, 80)).into());
        }
        if questions.len() < MIN_GUIDE_QUESTIONS {
            warn!(
                "[{}] ⚠️ 只生成了 {} 个引导问题（要求至少 {} 个），继续对话",
                record_id,
                questions.len(),
                MIN_GUIDE_QUESTIONS
            );
        }
        if questions.len() > MAX_GUIDE_QUESTIONS {
            debug!("引导问题 {} 个，只保留前 {} 个", questions.len(), MAX_GUIDE_QUESTIONS);
            questions.truncate(MAX_GUIDE_QUESTIONS);
        }

        let mut session = GuideSession::new(record_id, text, record.subject, error_type);
        session.current_prompt = questions.first().cloned();
        session.guide_questions = questions;
        session.state = DialogueState::Questioning;

        info!(
            "[{}] ✓ 生成 {} 个引导问题",
            record_id,
            session.guide_questions.len()
        );
        Ok(session)
    }

    /// 提交学生对当前问题的回答
    pub async fn submit_answer(
        &self,
        session: &mut GuideSession,
        answer: &str,
    ) -> AppResult<TurnOutcome> {
        if session.state != DialogueState::Questioning {
            return Err(AppError::InvalidState {
                current: session.state.to_string(),
                operation: "submit_answer",
            });
        }

        let current = session.current_prompt.clone().unwrap_or_default();
        let request = prompts::continue_dialogue(session, &current, answer);
        let content =
            generation_with_timeout(self.generation_timeout, self.generator.complete(&request))
                .await?;

        if content.trim().is_empty() {
            return Err(GenerationFailure::new("对话回复为空").into());
        }

        // 生成成功后才改动会话
        session.transcript.push(Turn {
            question: current,
            answer: answer.to_string(),
        });

        match classify_reply(&content) {
            ReplyOutcome::Continuation(prompt) => {
                session.turn_index += 1;
                if session.turn_index >= session.guide_questions.len() {
                    info!(
                        "[{}] 引导问题已用完 ({} 轮)，进入总结阶段",
                        session.record_id, session.turn_index
                    );
                    session.current_prompt = None;
                    session.state = DialogueState::Summarizing;
                    Ok(TurnOutcome::QuestionsExhausted { last_reply: prompt })
                } else {
                    debug!("[{}] 第 {} 轮继续追问", session.record_id, session.turn_index);
                    session.current_prompt = Some(prompt.clone());
                    Ok(TurnOutcome::NextQuestion {
                        prompt,
                        turn_index: session.turn_index,
                    })
                }
            }
            ReplyOutcome::Summary(summary) => {
                info!("[{}] ✓ 对话已总结", session.record_id);
                // Summarizing 与 Finished 之间没有可观察的间隔
                session.current_prompt = None;
                session.summary = Some(summary.clone());
                session.state = DialogueState::Finished;
                Ok(TurnOutcome::Summary { summary })
            }
        }
    }

    /// 生成解题清单和记忆口诀，并写回错题记录
    pub async fn generate_checklist(
        &self,
        session: &mut GuideSession,
    ) -> AppResult<SolutionChecklist> {
        if !matches!(
            session.state,
            DialogueState::Summarizing | DialogueState::Finished
        ) {
            return Err(AppError::InvalidState {
                current: session.state.to_string(),
                operation: "generate_checklist",
            });
        }

        let transcript = session.transcript_text();
        let approach = match &session.summary {
            Some(summary) if transcript.is_empty() => summary.clone(),
            Some(summary) => format!("{}\n老师总结：{}", transcript, summary),
            None => transcript.clone(),
        };

        let request = prompts::solution_checklist(&session.question_text, &session.subject, &approach);
        let value =
            generation_with_timeout(self.generation_timeout, self.generator.complete_json(&request))
                .await?;
        let checklist = parse_checklist(&value)?;

        info!(
            "[{}] ✓ 解题清单 {} 步{}",
            session.record_id,
            checklist.steps.len(),
            if checklist.mnemonic.is_some() { "，含记忆口诀" } else { "" }
        );

        self.write_back(session, &transcript, &checklist).await?;
        session.state = DialogueState::Finished;
        Ok(checklist)
    }

    async fn write_back(
        &self,
        session: &mut GuideSession,
        transcript: &str,
        checklist: &SolutionChecklist,
    ) -> AppResult<()> {
        let record_id = session.record_id.clone();

        let fetched = with_timeout("读取记录", self.call_timeout, self.repository.get(&record_id)).await;
        let mut record = match fetched {
            Ok(record) => record,
            Err(e) => return Err(self.fail_write_back(session, e)),
        };

        record.guide_questions = Some(render_guide_questions(session));
        record.thinking_process = Some(transcript.to_string());
        record.solution_approach = Some(
            session
                .summary
                .clone()
                .unwrap_or_else(|| transcript.to_string()),
        );
        record.solution_checklist = Some(checklist.render());
        record.memory_formula = checklist.mnemonic.clone();

        if let Err(e) = with_timeout(
            "写回记录",
            self.call_timeout,
            self.repository.update(&record_id, &record),
        )
        .await
        {
            return Err(self.fail_write_back(session, e));
        }

        info!("[{}] ✅ 引导结果已写回记录", record_id);
        Ok(())
    }

    /// 记录已不存在时会话进入 `Error`，其他存储错误不改动会话
    fn fail_write_back(&self, session: &mut GuideSession, err: ServiceError) -> AppError {
        if err.is_not_found() {
            warn!("[{}] ❌ 写回失败，记录已不存在", session.record_id);
            session.state = DialogueState::Error {
                reason: format!("记录 {} 不存在", session.record_id),
            };
            AppError::NotFound(session.record_id.clone())
        } else {
            warn!("[{}] ⚠️ 写回失败: {}", session.record_id, err);
            AppError::Persistence(err)
        }
    }
}

/// 判断生成服务的回复是继续追问还是总结
///
/// 优先读取 `{"type": "question" | "summary", "content": ...}`；
/// 拿不到结构化结果时按文本判断：问号 → 追问，过渡语 → 追问，否则为总结。
pub fn classify_reply(content: &str) -> ReplyOutcome {
    let mut text = content.trim().to_string();

    if let Some(value) = extract_json(content) {
        let inner = value
            .get("content")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty());

        if let Some(inner) = inner {
            match value.get("type").and_then(JsonValue::as_str) {
                Some("question") | Some("continuation") => {
                    return ReplyOutcome::Continuation(inner.to_string())
                }
                Some("summary") => return ReplyOutcome::Summary(inner.to_string()),
                _ => text = inner.to_string(),
            }
        }
    }

    if text.contains('?') || text.contains('？') {
        return ReplyOutcome::Continuation(text);
    }

    let lowered = text.to_lowercase();
    if TRANSITION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return ReplyOutcome::Continuation(text);
    }

    ReplyOutcome::Summary(text)
}

/// 解析引导问题列表，去掉行首编号
pub fn parse_guide_questions(content: &str) -> Vec<String> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let numbered: Vec<String> = lines
        .iter()
        .filter_map(|line| {
            let matched = NUMBERING.find(line)?;
            let rest = line[matched.end()..].trim();
            (!rest.is_empty()).then(|| rest.to_string())
        })
        .collect();

    if !numbered.is_empty() {
        return numbered;
    }

    // 没有编号时，只认问句
    lines
        .into_iter()
        .filter(|line| line.ends_with('?') || line.ends_with('？'))
        .map(str::to_string)
        .collect()
}

/// 解析解题清单 JSON：`{"checklist": [...], "formula": "..."}`
fn parse_checklist(value: &JsonValue) -> Result<SolutionChecklist, GenerationFailure> {
    let mut steps: Vec<String> = value
        .get("checklist")
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(|step| NUMBERING.replace(step.trim(), "").trim().to_string())
                .filter(|step| !step.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if steps.is_empty() {
        return Err(GenerationFailure::malformed("解题清单", value));
    }
    steps.truncate(MAX_CHECKLIST_STEPS);

    let mnemonic = value
        .get("formula")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .and_then(|f| {
            if f.chars().count() > MAX_MNEMONIC_CHARS {
                debug!("记忆口诀超过 {} 字，丢弃: {}", MAX_MNEMONIC_CHARS, f);
                None
            } else {
                Some(f.to_string())
            }
        });

    Ok(SolutionChecklist { steps, mnemonic })
}

/// 写回 `引导问题` 字段：只有编号问题，题目文本不落库
fn render_guide_questions(session: &GuideSession) -> String {
    session
        .guide_questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {}", i + 1, q))
        .collect::<Vec<_>>()
        .join("\n")
}
