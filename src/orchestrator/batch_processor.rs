//! 批量录入处理器 - 编排层
//!
//! ## 职责
//!
//! 扫描收件目录中的所有图片，并发地交给 `PipelineOrchestrator` 录入。
//!
//! ## 设计特点
//!
//! - **并发控制**：使用 Semaphore 限制同时进行的录入数量
//! - **失败隔离**：单张图片失败只计数，不影响其他图片
//! - **向下委托**：单张图片的流程完全由 workflow 层负责

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::ErrorType;
use crate::utils::logging::{log_intake_start, print_final_stats};
use crate::workflow::PipelineOrchestrator;

/// 可以录入的图片扩展名
const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "webp", "bmp", "gif"];

/// 批量录入统计
#[derive(Debug, Default)]
pub struct IntakeStats {
    pub total: usize,
    /// 成功录入的图片及其记录ID，按文件名排序
    pub succeeded: Vec<(PathBuf, String)>,
    pub failed: Vec<(PathBuf, String)>,
}

impl IntakeStats {
    pub fn success(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failures(&self) -> usize {
        self.failed.len()
    }
}

/// 录入收件目录中的全部图片
///
/// # 参数
/// - `pipeline`: 单张图片的录入流程（在任务间共享）
/// - `inbox`: 图片所在目录（不递归）
/// - `error_type`: 本批图片统一的错误类型
/// - `max_concurrent`: 最大并发数
pub async fn process_inbox(
    pipeline: Arc<PipelineOrchestrator>,
    inbox: &Path,
    error_type: ErrorType,
    max_concurrent: usize,
) -> AppResult<IntakeStats> {
    info!("\n📁 正在扫描待录入的图片: {}", inbox.display());
    let images = scan_images(inbox).await?;

    let mut stats = IntakeStats {
        total: images.len(),
        ..Default::default()
    };
    if images.is_empty() {
        warn!("⚠️ 没有找到待录入的图片，结束");
        return Ok(stats);
    }

    let max_concurrent = max_concurrent.max(1);
    log_intake_start(images.len(), max_concurrent);

    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut handles = Vec::with_capacity(images.len());

    for (idx, image) in images.into_iter().enumerate() {
        // 信号量只在本函数内持有，不会被关闭
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let pipeline = pipeline.clone();
        let path = image.clone();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            pipeline.process(&path, error_type).await
        });
        handles.push((idx + 1, image, handle));
    }

    for (index, image, handle) in handles {
        match handle.await {
            Ok(Ok(record_id)) => stats.succeeded.push((image, record_id)),
            Ok(Err(e)) => {
                error!("[图片 {}] ❌ 录入失败: {}", index, e);
                stats.failed.push((image, e.to_string()));
            }
            Err(e) => {
                error!("[图片 {}] 任务执行失败: {}", index, e);
                stats.failed.push((image, e.to_string()));
            }
        }
    }

    print_final_stats(stats.success(), stats.failures(), stats.total);
    Ok(stats)
}

/// 列出目录中的图片文件，按文件名排序
async fn scan_images(inbox: &Path) -> AppResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(inbox)
        .await
        .map_err(|source| AppError::Inbox {
            path: inbox.display().to_string(),
            source,
        })?;

    let mut images = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            images.push(path);
        }
    }

    images.sort();
    Ok(images)
}
