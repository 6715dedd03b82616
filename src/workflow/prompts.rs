//! 提示词模板
//!
//! 引导对话与反馈题生成用到的全部提示词集中在这里，流程代码只负责填参数。

use crate::models::{DifficultyDistribution, ErrorType, GuideSession};
use crate::services::contracts::CompletionRequest;

/// 提示词里题目文本的前缀
const QUESTION_HEADER: &str = "题目：";

const TEACHER_SYSTEM: &str = "你是一位优秀的老师，擅长使用苏格拉底式教学法引导学生思考。\
你的任务是针对学生的错题，提出一系列引导性问题，帮助学生自己找到解题思路。\
不要直接给出答案，而是通过提问引导学生思考。";

const DIALOGUE_SYSTEM: &str = "你是一位优秀的老师，使用苏格拉底式教学法。\
根据学生的回答，继续提问引导，或总结解题思路。";

/// 生成 3-5 个递进式引导问题
pub fn guide_questions(question_text: &str, subject: &str, error_type: ErrorType) -> CompletionRequest {
    let user = format!(
        r#"{header}{question}
科目：{subject}
学生情况：{error_type}

请生成3-5个递进式的引导问题，帮助学生思考解题思路。
问题应该：
1. 从简单到复杂，逐步深入
2. 引导学生思考关键概念和步骤
3. 适合学生的认知水平
4. 每个问题之间要有逻辑关联

请以列表形式返回问题，每个问题一行，以序号开头。"#,
        header = QUESTION_HEADER,
        question = question_text,
        subject = display_subject(subject),
        error_type = error_type.label(),
    );

    CompletionRequest::new()
        .system(TEACHER_SYSTEM)
        .user(user)
        .temperature(0.7)
}

/// 根据完整对话记录和本轮回答继续对话
///
/// 要求模型用 JSON 给出明确的结果类型，解析不到时再退回文本判断。
pub fn continue_dialogue(session: &GuideSession, current_question: &str, answer: &str) -> CompletionRequest {
    let mut request = CompletionRequest::new().system(DIALOGUE_SYSTEM);

    for turn in &session.transcript {
        request = request.assistant(turn.question.as_str()).user(turn.answer.as_str());
    }

    request
        .user(format!(
            "{}{}\n当前问题：{}\n学生回答：{}",
            QUESTION_HEADER, session.question_text, current_question, answer
        ))
        .user(
            r#"请根据学生的回答，继续提问引导（如果还需要更多引导），或总结解题思路（如果已经引导到位）。
请以JSON格式返回，不要返回任何其他内容：
{"type": "question 或 summary", "content": "下一个引导问题或解题思路总结"}"#,
        )
        .temperature(0.7)
}

/// 把解题思路整理成 3-7 步清单和记忆口诀
pub fn solution_checklist(question_text: &str, subject: &str, solution_approach: &str) -> CompletionRequest {
    let user = format!(
        r#"{header}{question}
科目：{subject}
解题思路：{approach}

请完成以下任务：
1. 将解题思路整理成标准化的解题步骤清单（3-7步）
2. 如果适合，生成一个朗朗上口的记忆口诀（不超过20字）

请以JSON格式返回：
{{
    "checklist": ["步骤1", "步骤2"],
    "formula": "记忆口诀（如果没有合适的口诀，可以为空）"
}}"#,
        header = QUESTION_HEADER,
        question = question_text,
        subject = display_subject(subject),
        approach = solution_approach,
    );

    CompletionRequest::new().user(user).temperature(0.5).max_tokens(1024)
}

/// 不同错误类型对应的出题策略
fn feedback_strategy(error_type: Option<ErrorType>) -> &'static str {
    match error_type {
        Some(ErrorType::DidNotKnow) => "生成更多基础题，帮助学生巩固基本概念和解题方法",
        Some(ErrorType::MadeMistake) => "生成相似题和易错点题，帮助学生避免类似错误",
        None => "保持相同知识点，由易到难巩固解题方法",
    }
}

/// 基于母题生成练习题
pub fn feedback_questions(
    master_question: &str,
    subject: &str,
    knowledge_points: &[String],
    error_type: Option<ErrorType>,
    distribution: &DifficultyDistribution,
) -> CompletionRequest {
    let user = format!(
        r#"请基于以下母题，生成{count}道有针对性的练习题。

母题：{question}
科目：{subject}
知识点：{points}
学生情况：{error_type}
生成策略：{strategy}
难度分布：{guidance}

要求：
1. 保持相同的知识点和解题思路
2. 改变数值、场景或表达方式
3. 每道题都要有标准答案和简要解析
4. 难度要循序渐进

请以JSON格式返回，格式如下：
{{
    "questions": [
        {{
            "question": "题目内容",
            "answer": "标准答案",
            "explanation": "简要解析",
            "difficulty": "基础/进阶/挑战"
        }}
    ]
}}"#,
        count = distribution.total(),
        question = master_question,
        subject = display_subject(subject),
        points = knowledge_points.join("、"),
        error_type = error_type.map_or("未知", ErrorType::label),
        strategy = feedback_strategy(error_type),
        guidance = distribution.guidance(),
    );

    CompletionRequest::new().user(user).temperature(0.8).max_tokens(2048)
}

fn display_subject(subject: &str) -> &str {
    if subject.trim().is_empty() {
        "未知"
    } else {
        subject
    }
}
