use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 反馈题难度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    /// 基础
    Basic,
    /// 进阶
    Advanced,
    /// 挑战
    Challenge,
}

static DIFFICULTY_LABELS: phf::Map<&'static str, Difficulty> = phf::phf_map! {
    "基础" => Difficulty::Basic,
    "基础题" => Difficulty::Basic,
    "basic" => Difficulty::Basic,
    "进阶" => Difficulty::Advanced,
    "进阶题" => Difficulty::Advanced,
    "advanced" => Difficulty::Advanced,
    "挑战" => Difficulty::Challenge,
    "挑战题" => Difficulty::Challenge,
    "challenge" => Difficulty::Challenge,
};

impl Difficulty {
    pub fn label(self) -> &'static str {
        match self {
            Difficulty::Basic => "基础",
            Difficulty::Advanced => "进阶",
            Difficulty::Challenge => "挑战",
        }
    }

    /// 解析难度标签（中文或英文，忽略大小写）
    pub fn from_label(s: &str) -> Option<Self> {
        DIFFICULTY_LABELS
            .get(s.trim().to_lowercase().as_str())
            .copied()
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// 反馈题（关联到一道母题）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackQuestion {
    /// 母题记录ID
    pub master_question_id: String,
    pub question_content: String,
    pub difficulty: Difficulty,
    pub standard_answer: String,
    /// 简要解析，不写入存储
    #[serde(skip)]
    pub explanation: Option<String>,
    pub student_answer: Option<String>,
    pub is_correct: Option<bool>,
    pub created_at: DateTime<Local>,
}

/// 生成服务返回的候选题，字段都可能缺失，逐题校验
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedbackCandidate {
    pub question: String,
    pub answer: String,
    pub explanation: String,
    pub difficulty: String,
}

/// 难度分布
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DifficultyDistribution {
    pub basic: usize,
    pub advanced: usize,
    pub challenge: usize,
}

impl DifficultyDistribution {
    pub const fn new(basic: usize, advanced: usize, challenge: usize) -> Self {
        Self {
            basic,
            advanced,
            challenge,
        }
    }

    pub fn total(&self) -> usize {
        self.basic + self.advanced + self.challenge
    }

    pub fn count_of(&self, difficulty: Difficulty) -> usize {
        match difficulty {
            Difficulty::Basic => self.basic,
            Difficulty::Advanced => self.advanced,
            Difficulty::Challenge => self.challenge,
        }
    }

    /// 渲染成提示词里的难度分布说明，例如 `基础题2道，进阶题2道，挑战题1道`
    pub fn guidance(&self) -> String {
        [Difficulty::Basic, Difficulty::Advanced, Difficulty::Challenge]
            .into_iter()
            .filter(|d| self.count_of(*d) > 0)
            .map(|d| format!("{}题{}道", d.label(), self.count_of(d)))
            .collect::<Vec<_>>()
            .join("，")
    }
}
