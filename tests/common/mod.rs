//! 集成测试共用的假实现和图片工具
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cuoti_mind::error::{GenerationFailure, ServiceError};
use cuoti_mind::models::{ErrorRecord, ErrorType, FeedbackQuestion, QuestionAnalysis};
use cuoti_mind::services::contracts::{
    CleanupService, CompletionRequest, GenerationService, RecognitionService, RecordRepository,
};
use cuoti_mind::services::MemoryRepository;
use cuoti_mind::{App, Config};

/// 写一张白底 PNG
pub fn write_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(16, 12, image::Rgb([250, 250, 250]))
        .save(&path)
        .unwrap();
    path
}

/// 测试用配置：超时缩短到 1 秒
pub fn test_config() -> Config {
    Config {
        call_timeout_secs: 1,
        generation_timeout_secs: 1,
        max_concurrent_images: 2,
        ..Config::default()
    }
}

// ========== 识别 ==========

pub struct FakeRecognition {
    text: Option<String>,
    analysis_fails: bool,
    delay: Option<Duration>,
    pub recognize_calls: AtomicUsize,
}

impl FakeRecognition {
    pub fn new(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            analysis_fails: false,
            delay: None,
            recognize_calls: AtomicUsize::new(0),
        }
    }

    /// 识别本身失败
    pub fn failing() -> Self {
        Self {
            text: None,
            ..Self::new("")
        }
    }

    pub fn with_failing_analysis(mut self) -> Self {
        self.analysis_fails = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.recognize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionService for FakeRecognition {
    async fn recognize(&self, _image: &Path) -> Result<String, ServiceError> {
        self.recognize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.text
            .clone()
            .ok_or_else(|| ServiceError::Other("识别服务不可用".to_string()))
    }

    async fn analyze(&self, _image: &Path, _text: &str) -> Result<QuestionAnalysis, ServiceError> {
        if self.analysis_fails {
            return Err(ServiceError::BadResponse {
                endpoint: "analyze".to_string(),
                code: None,
                message: Some("not json".to_string()),
            });
        }
        Ok(QuestionAnalysis {
            subject: "数学".to_string(),
            knowledge_points: vec!["一元一次方程".to_string(), "移项".to_string()],
            grade: "初一".to_string(),
            question_type: "解答题".to_string(),
            difficulty: "简单".to_string(),
        })
    }
}

// ========== 去手写 ==========

pub struct FakeCleanup {
    fails: bool,
}

impl FakeCleanup {
    pub fn working() -> Self {
        Self { fails: false }
    }

    pub fn failing() -> Self {
        Self { fails: true }
    }
}

#[async_trait]
impl CleanupService for FakeCleanup {
    async fn clean(&self, image: &Path) -> Result<PathBuf, ServiceError> {
        if self.fails {
            return Err(ServiceError::Image {
                path: image.display().to_string(),
                reason: "无法解码".to_string(),
            });
        }
        let name = image.file_name().unwrap().to_string_lossy();
        Ok(image.with_file_name(format!("cleaned_{}", name)))
    }
}

// ========== 文本生成 ==========

/// 按顺序返回预设回复，并记录收到的请求
#[derive(Default)]
pub struct ScriptedGeneration {
    replies: Mutex<VecDeque<Result<String, GenerationFailure>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, content: impl Into<String>) -> &Self {
        self.replies.lock().unwrap().push_back(Ok(content.into()));
        self
    }

    pub fn fail(&self, reason: &str) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(GenerationFailure::new(reason)));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationFailure> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationFailure::new("没有预设回复")))
    }
}

// ========== 存储 ==========

/// 包一层内存存储，可以按需注入故障
#[derive(Default)]
pub struct FaultyRepository {
    pub inner: MemoryRepository,
    /// 打开后 get / update 都返回记录不存在
    pub forget: AtomicBool,
    pub fail_create: AtomicBool,
    /// 题目内容包含该文本的反馈题保存失败
    pub fail_feedback_containing: Mutex<Option<String>>,
}

impl FaultyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_create() -> Self {
        let repo = Self::default();
        repo.fail_create.store(true, Ordering::SeqCst);
        repo
    }

    pub fn fail_feedback_containing(&self, marker: &str) {
        *self.fail_feedback_containing.lock().unwrap() = Some(marker.to_string());
    }
}

#[async_trait]
impl RecordRepository for FaultyRepository {
    async fn create(&self, record: &ErrorRecord) -> Result<String, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::BadResponse {
                endpoint: "records".to_string(),
                code: Some(1254001),
                message: Some("WrongRequestBody".to_string()),
            });
        }
        self.inner.create(record).await
    }

    async fn get(&self, record_id: &str) -> Result<ErrorRecord, ServiceError> {
        if self.forget.load(Ordering::SeqCst) {
            return Err(ServiceError::RecordNotFound {
                record_id: record_id.to_string(),
            });
        }
        self.inner.get(record_id).await
    }

    async fn update(&self, record_id: &str, record: &ErrorRecord) -> Result<(), ServiceError> {
        if self.forget.load(Ordering::SeqCst) {
            return Err(ServiceError::RecordNotFound {
                record_id: record_id.to_string(),
            });
        }
        self.inner.update(record_id, record).await
    }

    async fn append_feedback(&self, question: &FeedbackQuestion) -> Result<String, ServiceError> {
        let marker = self.fail_feedback_containing.lock().unwrap().clone();
        if let Some(marker) = marker {
            if question.question_content.contains(&marker) {
                return Err(ServiceError::Other("反馈题表写入失败".to_string()));
            }
        }
        self.inner.append_feedback(question).await
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ErrorRecord>, ServiceError> {
        self.inner.list(limit, offset).await
    }
}

/// 直接存一条错题记录（跳过录入流程）
pub async fn seed_record(
    repo: &dyn RecordRepository,
    subject: &str,
    error_type: Option<ErrorType>,
) -> String {
    let analysis = QuestionAnalysis {
        subject: subject.to_string(),
        knowledge_points: vec!["一元一次方程".to_string()],
        ..QuestionAnalysis::default()
    };
    let mut record = ErrorRecord::new(
        "uploads/q.png",
        "uploads/cleaned_q.png",
        "2x+3=11, find x",
        analysis,
        error_type.unwrap_or(ErrorType::DidNotKnow),
    );
    record.error_type = error_type;
    repo.create(&record).await.unwrap()
}

/// 用假实现组装一个 App
pub fn app_with(
    recognizer: Arc<FakeRecognition>,
    cleaner: FakeCleanup,
    generator: Arc<ScriptedGeneration>,
    repository: Arc<FaultyRepository>,
) -> App {
    App::with_components(
        test_config(),
        recognizer,
        Arc::new(cleaner),
        generator,
        repository,
    )
}

/// 三个编号引导问题
pub const THREE_GUIDE_QUESTIONS: &str =
    "1. 等式两边可以同时做什么运算？\n2. 两边同时减去3之后得到什么？\n3. 怎样求出x？";
