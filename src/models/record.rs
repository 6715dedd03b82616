use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 不会 / 做错
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    /// 不会
    DidNotKnow,
    /// 做错
    MadeMistake,
}

impl ErrorType {
    /// 多维表格中使用的单选值
    pub fn label(self) -> &'static str {
        match self {
            ErrorType::DidNotKnow => "不会",
            ErrorType::MadeMistake => "做错",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim() {
            "不会" | "不会做" => Some(ErrorType::DidNotKnow),
            "做错" | "做错了" => Some(ErrorType::MadeMistake),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// 掌握程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MasteryLevel {
    /// 未掌握
    #[default]
    NotMastered,
    /// 掌握中
    Mastering,
    /// 已掌握
    Mastered,
}

impl MasteryLevel {
    pub fn label(self) -> &'static str {
        match self {
            MasteryLevel::NotMastered => "未掌握",
            MasteryLevel::Mastering => "掌握中",
            MasteryLevel::Mastered => "已掌握",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim() {
            "未掌握" => Some(MasteryLevel::NotMastered),
            "掌握中" => Some(MasteryLevel::Mastering),
            "已掌握" => Some(MasteryLevel::Mastered),
            _ => None,
        }
    }
}

/// 题目分析结果
///
/// 分析失败时整体退化为 `Default`：学科为空、知识点为空。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestionAnalysis {
    pub subject: String,
    pub knowledge_points: Vec<String>,
    pub grade: String,
    pub question_type: String,
    pub difficulty: String,
}

/// 错题记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// 存储层分配的记录ID（读回时才有）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    /// 错题原图（本地路径或存储侧文件 token）
    pub original_image: String,
    /// 去手写后的图片
    pub cleaned_image: String,

    /// 题目文本，只在进程内流转，任何存储实现都不落盘
    #[serde(skip)]
    pub question_text: Option<String>,

    pub subject: String,
    pub knowledge_points: Vec<String>,
    pub error_type: Option<ErrorType>,
    pub error_reason: Option<String>,

    // --- 学习引导 ---
    pub guide_questions: Option<String>,
    pub thinking_process: Option<String>,
    pub solution_approach: Option<String>,
    pub solution_checklist: Option<String>,
    pub memory_formula: Option<String>,

    // --- 状态 ---
    pub is_master_question: bool,
    pub mastery_level: MasteryLevel,
    pub created_at: DateTime<Local>,
    pub last_review_time: Option<DateTime<Local>>,
    pub review_count: Option<u32>,
}

impl ErrorRecord {
    /// 新录入的错题：默认标记为母题、未掌握、创建时间为当前时间
    pub fn new(
        original_image: impl Into<String>,
        cleaned_image: impl Into<String>,
        question_text: impl Into<String>,
        analysis: QuestionAnalysis,
        error_type: ErrorType,
    ) -> Self {
        Self {
            record_id: None,
            original_image: original_image.into(),
            cleaned_image: cleaned_image.into(),
            question_text: Some(question_text.into()),
            subject: analysis.subject,
            knowledge_points: analysis.knowledge_points,
            error_type: Some(error_type),
            error_reason: None,
            guide_questions: None,
            thinking_process: None,
            solution_approach: None,
            solution_checklist: None,
            memory_formula: None,
            is_master_question: true,
            mastery_level: MasteryLevel::NotMastered,
            created_at: Local::now(),
            last_review_time: None,
            review_count: None,
        }
    }

    /// 返回去掉内部题目文本后的副本，供存储层使用
    pub fn without_question_text(&self) -> Self {
        Self {
            question_text: None,
            ..self.clone()
        }
    }

    /// 进程内的题目文本；从存储读回的记录没有题目文本，需要调用方重新提供
    pub fn resolve_question_text(&self) -> Option<String> {
        self.question_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ErrorRecord {
        ErrorRecord::new(
            "uploads/q.png",
            "uploads/cleaned_q.png",
            "2x+3=11，求x",
            QuestionAnalysis::default(),
            ErrorType::DidNotKnow,
        )
    }

    #[test]
    fn test_new_record_defaults() {
        let record = sample_record();
        assert!(record.is_master_question);
        assert_eq!(record.mastery_level, MasteryLevel::NotMastered);
        assert_eq!(record.error_type, Some(ErrorType::DidNotKnow));
        assert!(record.subject.is_empty());
        assert!(record.knowledge_points.is_empty());
    }

    #[test]
    fn test_question_text_never_serialized() {
        let json = serde_json::to_string(&sample_record()).unwrap();
        assert!(!json.contains("2x+3=11"));
    }

    #[test]
    fn test_resolve_question_text_only_in_process() {
        assert_eq!(
            sample_record().resolve_question_text().as_deref(),
            Some("2x+3=11，求x")
        );

        let mut stored = sample_record().without_question_text();
        stored.guide_questions = Some("题目：2x+3=11，求x\n1. 等式两边可以做什么？".to_string());
        assert_eq!(stored.resolve_question_text(), None);
    }

    #[test]
    fn test_labels_round_trip() {
        assert_eq!(ErrorType::from_label("做错"), Some(ErrorType::MadeMistake));
        assert_eq!(ErrorType::from_label("不会做"), Some(ErrorType::DidNotKnow));
        assert_eq!(ErrorType::from_label("其他"), None);
        assert_eq!(MasteryLevel::from_label("掌握中"), Some(MasteryLevel::Mastering));
    }
}
