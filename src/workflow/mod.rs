//! 流程层（Workflow Layer）
//!
//! 每个模块定义"一件事"的完整流程，只依赖 `services::contracts` 中的能力接口：
//!
//! - `pipeline` - 一张图片 → 一条错题记录
//! - `dialogue` - 一条记录 → 一次引导对话 → 解题清单写回
//! - `feedback` - 一条记录 → 一组按难度分布生成的反馈题

pub mod dialogue;
pub mod feedback;
pub mod pipeline;
pub mod prompts;

pub use dialogue::{classify_reply, DialogueEngine};
pub use feedback::{distribution_for, FeedbackBatch, FeedbackPolicyEngine, GeneratedFeedback};
pub use pipeline::{IntakeOutcome, PipelineOrchestrator};
