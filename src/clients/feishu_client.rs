/// 飞书多维表格 API 客户端
///
/// 封装错题表 / 反馈题表的读写，实现 `RecordRepository`
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ServiceError;
use crate::infrastructure::{IssuedToken, TokenCache, TokenSource};
use crate::models::{ErrorRecord, ErrorType, FeedbackQuestion, MasteryLevel};
use crate::services::contracts::RecordRepository;

/// 记录不存在
const CODE_RECORD_NOT_FOUND: i64 = 1254043;
/// 令牌无效 / 过期
const CODE_TOKEN_INVALID: [i64; 2] = [99991663, 99991668];
/// 列表接口单页上限
const MAX_PAGE_SIZE: usize = 500;

/// 错题表字段名
mod field {
    pub const ORIGINAL_IMAGE: &str = "错题原题";
    pub const CLEANED_IMAGE: &str = "去手写";
    pub const SUBJECT: &str = "学科";
    pub const KNOWLEDGE_POINTS: &str = "知识点";
    pub const ERROR_TYPE: &str = "不会/做错";
    pub const ERROR_REASON: &str = "不会/做错的原因";
    pub const GUIDE_QUESTIONS: &str = "引导问题";
    pub const THINKING_PROCESS: &str = "思考过程";
    pub const SOLUTION_APPROACH: &str = "解题思路";
    pub const SOLUTION_CHECKLIST: &str = "解题清单";
    pub const MEMORY_FORMULA: &str = "记忆口诀";
    pub const IS_MASTER: &str = "是否母题";
    pub const MASTERY_LEVEL: &str = "掌握程度";
    pub const CREATED_AT: &str = "创建时间";
    pub const LAST_REVIEW: &str = "最后复习时间";
    pub const REVIEW_COUNT: &str = "复习次数";

    // 反馈题表
    pub const MASTER_ID: &str = "母题ID";
    pub const QUESTION_CONTENT: &str = "题目内容";
    pub const DIFFICULTY: &str = "难度";
    pub const ANSWER: &str = "答案";
    pub const STUDENT_ANSWER: &str = "学生答案";
    pub const IS_CORRECT: &str = "是否正确";
}

/// tenant_access_token 来源
pub struct FeishuAuth {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    app_secret: String,
}

#[async_trait]
impl TokenSource for FeishuAuth {
    async fn fetch(&self) -> Result<IssuedToken, ServiceError> {
        let endpoint = format!("{}/auth/v3/tenant_access_token/internal", self.base_url);
        let result: Value = self
            .http
            .post(&endpoint)
            .json(&json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .send()
            .await
            .map_err(|e| ServiceError::request_failed(&endpoint, e))?
            .json()
            .await
            .map_err(|e| ServiceError::request_failed(&endpoint, e))?;

        check_code(&endpoint, &result)?;

        let value = result
            .get("tenant_access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::EmptyResponse {
                endpoint: endpoint.clone(),
            })?
            .to_string();
        let expire = result.get("expire").and_then(Value::as_u64).unwrap_or(7200);

        Ok(IssuedToken {
            value,
            expires_in: Duration::from_secs(expire),
        })
    }
}

/// 飞书多维表格客户端
pub struct FeishuClient {
    http: reqwest::Client,
    base_url: String,
    /// 多维表格 app_token，两张表共用
    app_token: String,
    table_id: String,
    feedback_table_id: Option<String>,
    tokens: TokenCache<FeishuAuth>,
}

impl FeishuClient {
    /// 创建新的飞书客户端
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::new();
        let auth = FeishuAuth {
            http: http.clone(),
            base_url: config.feishu_api_base_url.clone(),
            app_id: config.feishu_app_id.clone(),
            app_secret: config.feishu_app_secret.clone(),
        };

        Self {
            http,
            base_url: config.feishu_api_base_url.clone(),
            app_token: config.feishu_app_token.clone(),
            table_id: config.feishu_table_id.clone(),
            feedback_table_id: config.feishu_feedback_table_id.clone(),
            tokens: TokenCache::new(auth, config.token_refresh_margin()),
        }
    }

    fn records_url(&self, table_id: &str) -> String {
        format!(
            "{}/bitable/v1/apps/{}/tables/{}/records",
            self.base_url, self.app_token, table_id
        )
    }

    /// 发送带鉴权的 JSON 请求并检查响应码
    async fn send_json(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<Value, ServiceError> {
        let token = self.tokens.get_valid_token().await?;
        let result: Value = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ServiceError::request_failed(endpoint, e))?
            .json()
            .await
            .map_err(|e| ServiceError::request_failed(endpoint, e))?;

        if let Err(e) = check_code(endpoint, &result) {
            if let ServiceError::BadResponse { code: Some(code), .. } = &e {
                if CODE_TOKEN_INVALID.contains(code) {
                    warn!("飞书令牌已失效，下次请求将重新获取");
                    self.tokens.invalidate();
                }
            }
            return Err(e);
        }
        Ok(result)
    }

    /// 上传图片到多维表格，返回文件 token
    ///
    /// # 参数
    /// - `path`: 本地图片路径
    async fn upload_image(&self, path: &Path) -> Result<String, ServiceError> {
        let endpoint = format!("{}/drive/v1/medias/upload_all", self.base_url);
        let bytes = tokio::fs::read(path).await.map_err(|source| ServiceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image.png".to_string());

        let form = Form::new()
            .text("file_name", file_name.clone())
            .text("parent_type", "bitable_image")
            .text("parent_node", self.app_token.clone())
            .text("size", bytes.len().to_string())
            .part("file", Part::bytes(bytes).file_name(file_name));

        let result = self
            .send_json(self.http.post(&endpoint).multipart(form), &endpoint)
            .await?;

        let token = result
            .pointer("/data/file_token")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::EmptyResponse {
                endpoint: endpoint.clone(),
            })?;
        debug!("图片上传成功: {} -> {}", path.display(), token);
        Ok(token.to_string())
    }

    /// 本地存在的图片上传后作为附件；不存在的引用视为已上传的 token
    async fn attachment_for(&self, reference: &str) -> Result<Option<String>, ServiceError> {
        if reference.is_empty() {
            return Ok(None);
        }
        let path = Path::new(reference);
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            self.upload_image(path).await.map(Some)
        } else {
            Ok(Some(reference.to_string()))
        }
    }
}

#[async_trait]
impl RecordRepository for FeishuClient {
    async fn create(&self, record: &ErrorRecord) -> Result<String, ServiceError> {
        let endpoint = self.records_url(&self.table_id);

        let original = self.attachment_for(&record.original_image).await?;
        let cleaned = if record.cleaned_image == record.original_image {
            original.clone()
        } else {
            self.attachment_for(&record.cleaned_image).await?
        };

        let fields = record_fields(record, original.as_deref(), cleaned.as_deref());
        let result = self
            .send_json(
                self.http.post(&endpoint).json(&json!({ "fields": fields })),
                &endpoint,
            )
            .await
            .map_err(|e| {
                // 已上传的附件不回滚
                warn!(
                    "⚠️ 创建记录失败，已上传的附件将成为孤立文件: {:?} / {:?}",
                    original, cleaned
                );
                e
            })?;

        result
            .pointer("/data/record/record_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ServiceError::EmptyResponse { endpoint })
    }

    async fn get(&self, record_id: &str) -> Result<ErrorRecord, ServiceError> {
        let endpoint = format!("{}/{}", self.records_url(&self.table_id), record_id);
        let result = self
            .send_json(self.http.get(&endpoint), &endpoint)
            .await
            .map_err(|e| not_found_as(e, record_id))?;

        let item = result
            .pointer("/data/record")
            .ok_or_else(|| ServiceError::RecordNotFound {
                record_id: record_id.to_string(),
            })?;
        Ok(parse_record(item))
    }

    async fn update(&self, record_id: &str, record: &ErrorRecord) -> Result<(), ServiceError> {
        let endpoint = format!("{}/{}", self.records_url(&self.table_id), record_id);
        // 附件在创建时已上传，更新只写文本类字段
        let fields = record_fields(record, None, None);
        self.send_json(
            self.http.put(&endpoint).json(&json!({ "fields": fields })),
            &endpoint,
        )
        .await
        .map_err(|e| not_found_as(e, record_id))?;
        Ok(())
    }

    async fn append_feedback(&self, question: &FeedbackQuestion) -> Result<String, ServiceError> {
        let table_id = self.feedback_table_id.as_deref().ok_or_else(|| {
            ServiceError::Other("反馈题表格ID未配置，请设置 FEISHU_FEEDBACK_TABLE_ID".to_string())
        })?;
        let endpoint = self.records_url(table_id);

        let fields = feedback_fields(question);
        let result = self
            .send_json(
                self.http.post(&endpoint).json(&json!({ "fields": fields })),
                &endpoint,
            )
            .await
            .map_err(|e| not_found_as(e, &question.master_question_id))?;

        result
            .pointer("/data/record/record_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ServiceError::EmptyResponse { endpoint })
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ErrorRecord>, ServiceError> {
        let endpoint = self.records_url(&self.table_id);
        let wanted = offset + limit;
        let mut items: Vec<Value> = Vec::new();
        let mut page_token: Option<String> = None;

        while items.len() < wanted {
            let mut query = vec![("page_size", wanted.min(MAX_PAGE_SIZE).to_string())];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }

            let result = self
                .send_json(self.http.get(&endpoint).query(&query), &endpoint)
                .await?;

            if let Some(page) = result.pointer("/data/items").and_then(Value::as_array) {
                items.extend(page.iter().cloned());
            }

            let has_more = result
                .pointer("/data/has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            page_token = result
                .pointer("/data/page_token")
                .and_then(Value::as_str)
                .map(str::to_string);
            if !has_more || page_token.is_none() {
                break;
            }
        }

        Ok(items
            .iter()
            .skip(offset)
            .take(limit)
            .map(parse_record)
            .collect())
    }
}

// ========== 字段映射 ==========

fn record_fields(
    record: &ErrorRecord,
    original_token: Option<&str>,
    cleaned_token: Option<&str>,
) -> Map<String, Value> {
    let mut fields = Map::new();

    // 题目文本只在进程内使用，不写入表格
    if let Some(token) = original_token {
        fields.insert(field::ORIGINAL_IMAGE.into(), json!([{ "file_token": token }]));
    }
    if let Some(token) = cleaned_token {
        fields.insert(field::CLEANED_IMAGE.into(), json!([{ "file_token": token }]));
    }
    if !record.subject.is_empty() {
        fields.insert(field::SUBJECT.into(), json!(record.subject));
    }
    if !record.knowledge_points.is_empty() {
        fields.insert(field::KNOWLEDGE_POINTS.into(), json!(record.knowledge_points));
    }
    if let Some(error_type) = record.error_type {
        fields.insert(field::ERROR_TYPE.into(), json!(error_type.label()));
    }

    let texts = [
        (field::ERROR_REASON, &record.error_reason),
        (field::GUIDE_QUESTIONS, &record.guide_questions),
        (field::THINKING_PROCESS, &record.thinking_process),
        (field::SOLUTION_APPROACH, &record.solution_approach),
        (field::SOLUTION_CHECKLIST, &record.solution_checklist),
        (field::MEMORY_FORMULA, &record.memory_formula),
    ];
    for (name, value) in texts {
        if let Some(text) = value.as_deref().filter(|t| !t.is_empty()) {
            fields.insert(name.into(), json!(text));
        }
    }

    fields.insert(
        field::IS_MASTER.into(),
        json!(if record.is_master_question { "是" } else { "否" }),
    );
    fields.insert(field::MASTERY_LEVEL.into(), json!(record.mastery_level.label()));
    fields.insert(
        field::CREATED_AT.into(),
        json!(record.created_at.timestamp_millis()),
    );
    if let Some(at) = record.last_review_time {
        fields.insert(field::LAST_REVIEW.into(), json!(at.timestamp_millis()));
    }
    if let Some(count) = record.review_count {
        fields.insert(field::REVIEW_COUNT.into(), json!(count));
    }

    fields
}

fn feedback_fields(question: &FeedbackQuestion) -> Map<String, Value> {
    let mut fields = Map::new();
    // 关联字段传记录ID数组
    fields.insert(field::MASTER_ID.into(), json!([question.master_question_id]));
    fields.insert(field::QUESTION_CONTENT.into(), json!(question.question_content));
    fields.insert(field::DIFFICULTY.into(), json!(question.difficulty.label()));
    fields.insert(field::ANSWER.into(), json!(question.standard_answer));
    if let Some(answer) = &question.student_answer {
        fields.insert(field::STUDENT_ANSWER.into(), json!(answer));
    }
    if let Some(correct) = question.is_correct {
        fields.insert(
            field::IS_CORRECT.into(),
            json!(if correct { "正确" } else { "错误" }),
        );
    }
    fields.insert(
        field::CREATED_AT.into(),
        json!(question.created_at.timestamp_millis()),
    );
    fields
}

fn parse_record(item: &Value) -> ErrorRecord {
    let empty = Map::new();
    let fields = item
        .get("fields")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let text = |name: &str| fields.get(name).map(field_text).filter(|t| !t.is_empty());

    ErrorRecord {
        record_id: item
            .get("record_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        original_image: attachment_token(fields.get(field::ORIGINAL_IMAGE)),
        cleaned_image: attachment_token(fields.get(field::CLEANED_IMAGE)),
        question_text: None,
        subject: text(field::SUBJECT).unwrap_or_default(),
        knowledge_points: fields
            .get(field::KNOWLEDGE_POINTS)
            .map(field_list)
            .unwrap_or_default(),
        error_type: text(field::ERROR_TYPE).and_then(|t| ErrorType::from_label(&t)),
        error_reason: text(field::ERROR_REASON),
        guide_questions: text(field::GUIDE_QUESTIONS),
        thinking_process: text(field::THINKING_PROCESS),
        solution_approach: text(field::SOLUTION_APPROACH),
        solution_checklist: text(field::SOLUTION_CHECKLIST),
        memory_formula: text(field::MEMORY_FORMULA),
        is_master_question: text(field::IS_MASTER).map_or(true, |t| t == "是"),
        mastery_level: text(field::MASTERY_LEVEL)
            .and_then(|t| MasteryLevel::from_label(&t))
            .unwrap_or_default(),
        created_at: fields
            .get(field::CREATED_AT)
            .and_then(millis_to_local)
            .unwrap_or_else(Local::now),
        last_review_time: fields.get(field::LAST_REVIEW).and_then(millis_to_local),
        review_count: fields
            .get(field::REVIEW_COUNT)
            .and_then(Value::as_f64)
            .map(|n| n as u32),
    }
}

/// 文本字段可能是字符串、数字或富文本片段数组
fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(s) => s.clone(),
                other => other
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect(),
        _ => String::new(),
    }
}

fn field_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(field_text)
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split([',', '，', '、'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn attachment_token(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|item| item.get("file_token"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn millis_to_local(value: &Value) -> Option<DateTime<Local>> {
    let millis = value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))?;
    Local.timestamp_millis_opt(millis).single()
}

/// 检查飞书响应 `code`，非 0 视为错误
fn check_code(endpoint: &str, result: &Value) -> Result<(), ServiceError> {
    match result.get("code").and_then(Value::as_i64) {
        Some(0) => Ok(()),
        code => Err(ServiceError::BadResponse {
            endpoint: endpoint.to_string(),
            code,
            message: result.get("msg").and_then(Value::as_str).map(str::to_string),
        }),
    }
}

fn not_found_as(err: ServiceError, record_id: &str) -> ServiceError {
    match err {
        ServiceError::BadResponse {
            code: Some(CODE_RECORD_NOT_FOUND),
            ..
        } => ServiceError::RecordNotFound {
            record_id: record_id.to_string(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, QuestionAnalysis};

    fn sample_record() -> ErrorRecord {
        let analysis = QuestionAnalysis {
            subject: "数学".to_string(),
            knowledge_points: vec!["一元一次方程".to_string(), "移项".to_string()],
            ..QuestionAnalysis::default()
        };
        ErrorRecord::new("q.png", "cleaned_q.png", "2x+3=11，求x", analysis, ErrorType::MadeMistake)
    }

    #[test]
    fn test_record_fields_never_contain_question_text() {
        let fields = record_fields(&sample_record(), Some("box_orig"), Some("box_clean"));
        let dumped = Value::Object(fields.clone()).to_string();

        assert!(!dumped.contains("2x+3=11"));
        assert_eq!(fields[field::SUBJECT], "数学");
        assert_eq!(fields[field::ERROR_TYPE], "做错");
        assert_eq!(fields[field::IS_MASTER], "是");
        assert_eq!(fields[field::MASTERY_LEVEL], "未掌握");
        assert_eq!(fields[field::ORIGINAL_IMAGE][0]["file_token"], "box_orig");
    }

    #[test]
    fn test_parse_record_round_trips_labels() {
        let fields = record_fields(&sample_record(), Some("box_orig"), Some("box_clean"));
        let item = json!({ "record_id": "recABC", "fields": fields });

        let parsed = parse_record(&item);
        assert_eq!(parsed.record_id.as_deref(), Some("recABC"));
        assert_eq!(parsed.original_image, "box_orig");
        assert_eq!(parsed.cleaned_image, "box_clean");
        assert_eq!(parsed.error_type, Some(ErrorType::MadeMistake));
        assert_eq!(parsed.knowledge_points, vec!["一元一次方程", "移项"]);
        assert!(parsed.question_text.is_none());
    }

    #[test]
    fn test_field_text_handles_rich_text_segments() {
        let value = json!([{ "type": "text", "text": "题目：" }, { "type": "text", "text": "2x+3=11" }]);
        assert_eq!(field_text(&value), "题目：2x+3=11");
    }

    #[test]
    fn test_feedback_fields_link_master() {
        let question = FeedbackQuestion {
            master_question_id: "recMaster".to_string(),
            question_content: "3x-5=10，求x".to_string(),
            difficulty: Difficulty::Challenge,
            standard_answer: "x=5".to_string(),
            explanation: Some("移项".to_string()),
            student_answer: None,
            is_correct: Some(false),
            created_at: Local::now(),
        };
        let fields = feedback_fields(&question);
        assert_eq!(fields[field::MASTER_ID], json!(["recMaster"]));
        assert_eq!(fields[field::DIFFICULTY], "挑战");
        assert_eq!(fields[field::IS_CORRECT], "错误");
        assert!(!fields.contains_key(field::STUDENT_ANSWER));
    }

    #[test]
    fn test_not_found_code_mapped() {
        let err = ServiceError::BadResponse {
            endpoint: "records".to_string(),
            code: Some(CODE_RECORD_NOT_FOUND),
            message: None,
        };
        assert!(not_found_as(err, "recX").is_not_found());
    }
}
