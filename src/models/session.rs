//! 引导对话会话
//!
//! 会话不单独持久化，只在结束时把解题清单等产物写回所属错题记录。

use serde::{Deserialize, Serialize};

use super::record::ErrorType;

/// 会话状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueState {
    Init,
    Questioning,
    Summarizing,
    Finished,
    /// 终止态，不再接受任何操作
    Error { reason: String },
}

impl std::fmt::Display for DialogueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogueState::Init => write!(f, "Init"),
            DialogueState::Questioning => write!(f, "Questioning"),
            DialogueState::Summarizing => write!(f, "Summarizing"),
            DialogueState::Finished => write!(f, "Finished"),
            DialogueState::Error { reason } => write!(f, "Error({})", reason),
        }
    }
}

/// 一问一答
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// 生成服务对学生回答的回应
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// 继续追问
    Continuation(String),
    /// 总结解题思路，对话结束
    Summary(String),
}

/// 单轮提交的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// 还有下一问
    NextQuestion { prompt: String, turn_index: usize },
    /// 引导问题用完，进入总结阶段（没有总结文本）
    QuestionsExhausted { last_reply: String },
    /// 生成服务给出了总结，对话结束
    Summary { summary: String },
}

/// 解题清单与记忆口诀
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionChecklist {
    pub steps: Vec<String>,
    pub mnemonic: Option<String>,
}

impl SolutionChecklist {
    /// 多维表格中的文本形式：`1. xxx` 每步一行
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {}", i + 1, step))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 引导对话会话
#[derive(Debug, Clone)]
pub struct GuideSession {
    pub record_id: String,
    pub question_text: String,
    pub subject: String,
    pub error_type: ErrorType,
    pub guide_questions: Vec<String>,
    /// 当前展示给学生的问题
    pub current_prompt: Option<String>,
    pub turn_index: usize,
    pub transcript: Vec<Turn>,
    pub state: DialogueState,
    pub summary: Option<String>,
}

impl GuideSession {
    pub fn new(
        record_id: impl Into<String>,
        question_text: impl Into<String>,
        subject: impl Into<String>,
        error_type: ErrorType,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            question_text: question_text.into(),
            subject: subject.into(),
            error_type,
            guide_questions: Vec::new(),
            current_prompt: None,
            turn_index: 0,
            transcript: Vec::new(),
            state: DialogueState::Init,
            summary: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            DialogueState::Finished | DialogueState::Error { .. }
        )
    }

    /// 对话记录拼接成的解题思路文本
    pub fn transcript_text(&self) -> String {
        self.transcript
            .iter()
            .map(|turn| format!("老师：{}\n学生：{}", turn.question, turn.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
