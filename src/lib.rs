//! # 错题思维 (cuoti_mind)
//!
//! 把一张拍下来的错题变成结构化学习记录，并在此基础上进行苏格拉底式引导对话、
//! 按错误类型生成分层练习题。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有进程内共享的稀缺资源
//! - `TokenCache` - 访问令牌的唯一持有者，串行刷新
//!
//! ### ② 业务能力层（Services / Clients）
//! - `services/contracts` - 识别 / 去手写 / 生成 / 存储四个能力接口
//! - `LlmService`、`VisionRecognizer` - OpenAI 兼容接口的生成与识别
//! - `HandwritingCleaner`、`ImageValidator` - 本地图片处理
//! - `clients/FeishuClient` - 飞书多维表格存储；`MemoryRepository` - 进程内存储
//!
//! ### ③ 流程层（Workflow）
//! - `PipelineOrchestrator` - 验证 → 识别 → 分析 → 去手写 → 保存
//! - `DialogueEngine` - 引导对话状态机与解题清单写回
//! - `FeedbackPolicyEngine` - 难度分布与逐题保存
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator::App` - 组装配置与各能力实现
//! - `orchestrator/batch_processor` - 收件目录批量录入，管理并发
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult, GenerationFailure, ServiceError, ValidationError};
pub use models::{
    DialogueState, Difficulty, ErrorRecord, ErrorType, FeedbackQuestion, GuideSession,
    SolutionChecklist, TurnOutcome,
};
pub use orchestrator::{process_inbox, App, IntakeStats};
pub use workflow::{
    DialogueEngine, FeedbackBatch, FeedbackPolicyEngine, IntakeOutcome, PipelineOrchestrator,
};
