//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责组装和调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `App` - 应用入口
//! - 校验配置，创建具体的识别 / 去手写 / 生成 / 存储实现
//! - 持有三个流程引擎，对外暴露录入、引导、练习三类操作
//!
//! ### `batch_processor` - 批量录入
//! - 扫描收件目录
//! - 控制并发数量（Semaphore）
//! - 输出全局统计信息
//!
//! ## 层次关系
//!
//! ```text
//! App / batch_processor
//!     ↓
//! workflow (pipeline / dialogue / feedback)
//!     ↓
//! services + clients (能力实现)
//!     ↓
//! infrastructure (TokenCache)
//! ```

pub mod batch_processor;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::clients::FeishuClient;
use crate::config::Config;
use crate::error::AppResult;
use crate::models::{ErrorType, GuideSession, SolutionChecklist, TurnOutcome};
use crate::services::{
    CleanupService, GenerationService, HandwritingCleaner, ImageValidator, LlmService,
    RecognitionService, RecordRepository, VisionRecognizer,
};
use crate::workflow::{
    DialogueEngine, FeedbackBatch, FeedbackPolicyEngine, IntakeOutcome, PipelineOrchestrator,
};

pub use batch_processor::{process_inbox, IntakeStats};

/// 应用主结构
pub struct App {
    config: Config,
    pipeline: Arc<PipelineOrchestrator>,
    dialogue: DialogueEngine,
    feedback: FeedbackPolicyEngine,
}

impl App {
    /// 按配置创建应用（豆包识别 + DeepSeek 生成 + 飞书存储）
    pub fn initialize(config: Config) -> AppResult<Self> {
        config.validate()?;
        log_startup(&config);

        let recognizer = Arc::new(VisionRecognizer::new(
            LlmService::new(
                &config.vision_api_key,
                &config.vision_api_base_url,
                config.vision_model_name.clone(),
            ),
            LlmService::new(
                &config.vision_api_key,
                &config.vision_api_base_url,
                config.analysis_model_name.clone(),
            ),
        ));
        let generator = Arc::new(LlmService::new(
            &config.llm_api_key,
            &config.llm_api_base_url,
            config.llm_model_name.clone(),
        ));
        let cleaner = Arc::new(HandwritingCleaner::new(&config.upload_dir));
        let repository = Arc::new(FeishuClient::new(&config));

        Ok(Self::with_components(
            config, recognizer, cleaner, generator, repository,
        ))
    }

    /// 使用指定的能力实现创建应用（本地模式 / 测试）
    pub fn with_components(
        config: Config,
        recognizer: Arc<dyn RecognitionService>,
        cleaner: Arc<dyn CleanupService>,
        generator: Arc<dyn GenerationService>,
        repository: Arc<dyn RecordRepository>,
    ) -> Self {
        let pipeline = PipelineOrchestrator::new(
            ImageValidator::new(config.max_image_bytes),
            recognizer,
            cleaner,
            repository.clone(),
            config.call_timeout(),
        );
        let dialogue = DialogueEngine::new(
            generator.clone(),
            repository.clone(),
            config.call_timeout(),
            config.generation_timeout(),
        );
        let feedback = FeedbackPolicyEngine::new(
            generator,
            repository,
            config.call_timeout(),
            config.generation_timeout(),
        );

        Self {
            config,
            pipeline: Arc::new(pipeline),
            dialogue,
            feedback,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 录入一道错题
    pub async fn submit(&self, image: &Path, error_type: ErrorType) -> AppResult<IntakeOutcome> {
        self.pipeline.process_with_context(image, error_type).await
    }

    /// 批量录入收件目录中的图片
    pub async fn submit_inbox(&self, inbox: &Path, error_type: ErrorType) -> AppResult<IntakeStats> {
        process_inbox(
            self.pipeline.clone(),
            inbox,
            error_type,
            self.config.max_concurrent_images,
        )
        .await
    }

    /// 开始引导对话
    pub async fn start_guide(
        &self,
        record_id: &str,
        question_text: Option<&str>,
    ) -> AppResult<GuideSession> {
        self.dialogue.start_session(record_id, question_text).await
    }

    /// 提交一轮回答
    pub async fn answer(&self, session: &mut GuideSession, answer: &str) -> AppResult<TurnOutcome> {
        self.dialogue.submit_answer(session, answer).await
    }

    /// 结束引导：生成解题清单并写回记录
    pub async fn finish_guide(&self, session: &mut GuideSession) -> AppResult<SolutionChecklist> {
        self.dialogue.generate_checklist(session).await
    }

    /// 生成练习题
    pub async fn generate_practice(
        &self,
        record_id: &str,
        question_text: Option<&str>,
        count: usize,
    ) -> AppResult<FeedbackBatch> {
        self.feedback
            .generate_feedback(record_id, question_text, count)
            .await
    }
}

fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 错题思维启动");
    info!("👁️ 识别模型: {}", config.vision_model_name);
    info!("🧠 生成模型: {}", config.llm_model_name);
    info!("📊 批量录入最大并发数: {}", config.max_concurrent_images);
    info!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_initialize_rejects_incomplete_config() {
        let result = App::initialize(Config::default());
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
