//! 错题录入流程 - 流程层
//!
//! 核心职责：定义"一张图片"的完整录入流程
//!
//! 流程顺序：
//! 1. 验证图片（失败即终止）
//! 2. 识别题目文本（失败即终止，空文本也算失败）
//! 3. 分析学科 / 知识点（失败退化为空分析）
//! 4. 去手写（失败退回原图）
//! 5. 组装记录并保存（失败即终止）

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{AppError, AppResult, ServiceError};
use crate::models::{ErrorRecord, ErrorType, QuestionAnalysis};
use crate::services::contracts::{with_timeout, CleanupService, RecognitionService, RecordRepository};
use crate::services::ImageValidator;
use crate::utils::logging::truncate_text;

/// 一次录入的完整结果
#[derive(Debug, Clone)]
pub struct IntakeOutcome {
    pub record_id: String,
    /// 识别出的题目文本，只给后续的引导对话 / 反馈题使用
    pub question_text: String,
    pub analysis: QuestionAnalysis,
    /// 去手写失败、记录里使用的是原图
    pub cleanup_fell_back: bool,
}

/// 错题录入流程
///
/// - 不持有任何会话状态，可以被多个并发任务共享
/// - 只依赖能力接口（services::contracts）
pub struct PipelineOrchestrator {
    validator: ImageValidator,
    recognizer: Arc<dyn RecognitionService>,
    cleaner: Arc<dyn CleanupService>,
    repository: Arc<dyn RecordRepository>,
    call_timeout: Duration,
}

impl PipelineOrchestrator {
    pub fn new(
        validator: ImageValidator,
        recognizer: Arc<dyn RecognitionService>,
        cleaner: Arc<dyn CleanupService>,
        repository: Arc<dyn RecordRepository>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            validator,
            recognizer,
            cleaner,
            repository,
            call_timeout,
        }
    }

    /// 录入一道错题，返回记录ID
    pub async fn process(&self, image: &Path, error_type: ErrorType) -> AppResult<String> {
        self.process_with_context(image, error_type)
            .await
            .map(|outcome| outcome.record_id)
    }

    /// 录入一道错题，同时返回识别文本和分析结果
    pub async fn process_with_context(
        &self,
        image: &Path,
        error_type: ErrorType,
    ) -> AppResult<IntakeOutcome> {
        let name = image.display().to_string();
        info!("[{}] 📷 开始录入错题 ({})", name, error_type);

        // ========== 1. 验证 ==========
        let (width, height) = self.validator.validate(image).await?;
        info!("[{}] ✓ 图片验证通过 ({}x{})", name, width, height);

        // ========== 2. 识别 ==========
        let question_text = with_timeout(
            "题目识别",
            self.call_timeout,
            self.recognizer.recognize(image),
        )
        .await
        .and_then(|text| {
            let text = text.trim().to_string();
            if text.is_empty() {
                Err(ServiceError::EmptyResponse {
                    endpoint: "recognize".to_string(),
                })
            } else {
                Ok(text)
            }
        })
        .map_err(AppError::Recognition)?;
        info!("[{}] ✓ 识别完成: {}", name, truncate_text(&question_text, 40));

        // ========== 3. 分析 ==========
        let analysis = match with_timeout(
            "题目分析",
            self.call_timeout,
            self.recognizer.analyze(image, &question_text),
        )
        .await
        {
            Ok(analysis) => {
                info!(
                    "[{}] ✓ 分析完成: 学科={} 知识点={:?}",
                    name, analysis.subject, analysis.knowledge_points
                );
                analysis
            }
            Err(e) => {
                warn!("[{}] ⚠️ {}，使用空分析继续", name, AppError::Analysis(e));
                QuestionAnalysis::default()
            }
        };

        // ========== 4. 去手写 ==========
        let original = image.display().to_string();
        let (cleaned, cleanup_fell_back) =
            match with_timeout("去手写", self.call_timeout, self.cleaner.clean(image)).await {
                Ok(path) => {
                    info!("[{}] ✓ 去手写完成: {}", name, path.display());
                    (path.display().to_string(), false)
                }
                Err(e) => {
                    warn!("[{}] ⚠️ {}，使用原图", name, AppError::Cleanup(e));
                    (original.clone(), true)
                }
            };

        // ========== 5. 保存 ==========
        let record = ErrorRecord::new(
            original.clone(),
            cleaned.clone(),
            question_text.clone(),
            analysis.clone(),
            error_type,
        );

        let record_id = with_timeout("保存记录", self.call_timeout, self.repository.create(&record))
            .await
            .map_err(|e| {
                warn!(
                    "[{}] ⚠️ 保存失败，已产生的图片不会回收: {}{}",
                    name,
                    original,
                    if cleanup_fell_back {
                        String::new()
                    } else {
                        format!(", {}", cleaned)
                    }
                );
                AppError::Persistence(e)
            })?;

        info!("[{}] ✅ 错题录入成功，记录ID: {}", name, record_id);

        Ok(IntakeOutcome {
            record_id,
            question_text,
            analysis,
            cleanup_fell_back,
        })
    }
}
