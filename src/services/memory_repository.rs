//! 进程内存储 - 业务能力层
//!
//! 本地模式和测试使用的 `RecordRepository` 实现。
//! 与飞书实现保持同样的约束：题目文本不落盘，反馈题必须关联已存在的母题。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ServiceError;
use crate::models::{ErrorRecord, FeedbackQuestion};
use crate::services::contracts::RecordRepository;

#[derive(Default)]
struct Tables {
    /// 按插入顺序保存的记录ID
    order: Vec<String>,
    records: HashMap<String, ErrorRecord>,
    feedback: Vec<(String, FeedbackQuestion)>,
}

#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}{:06}", prefix, n)
    }

    /// 某道母题下已保存的反馈题
    pub async fn feedback_for(&self, master_id: &str) -> Vec<(String, FeedbackQuestion)> {
        self.tables
            .read()
            .await
            .feedback
            .iter()
            .filter(|(_, q)| q.master_question_id == master_id)
            .cloned()
            .collect()
    }

    pub async fn record_count(&self) -> usize {
        self.tables.read().await.records.len()
    }
}

#[async_trait]
impl RecordRepository for MemoryRepository {
    async fn create(&self, record: &ErrorRecord) -> Result<String, ServiceError> {
        let record_id = self.allocate_id("rec");
        let mut stored = record.without_question_text();
        stored.record_id = Some(record_id.clone());

        let mut tables = self.tables.write().await;
        tables.order.push(record_id.clone());
        tables.records.insert(record_id.clone(), stored);
        Ok(record_id)
    }

    async fn get(&self, record_id: &str) -> Result<ErrorRecord, ServiceError> {
        self.tables
            .read()
            .await
            .records
            .get(record_id)
            .cloned()
            .ok_or_else(|| ServiceError::RecordNotFound {
                record_id: record_id.to_string(),
            })
    }

    async fn update(&self, record_id: &str, record: &ErrorRecord) -> Result<(), ServiceError> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .records
            .get_mut(record_id)
            .ok_or_else(|| ServiceError::RecordNotFound {
                record_id: record_id.to_string(),
            })?;

        let mut stored = record.without_question_text();
        stored.record_id = Some(record_id.to_string());
        *slot = stored;
        Ok(())
    }

    async fn append_feedback(&self, question: &FeedbackQuestion) -> Result<String, ServiceError> {
        let mut tables = self.tables.write().await;
        if !tables.records.contains_key(&question.master_question_id) {
            return Err(ServiceError::RecordNotFound {
                record_id: question.master_question_id.clone(),
            });
        }

        let feedback_id = self.allocate_id("fb");
        tables.feedback.push((feedback_id.clone(), question.clone()));
        Ok(feedback_id)
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<ErrorRecord>, ServiceError> {
        let tables = self.tables.read().await;
        Ok(tables
            .order
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| tables.records.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Difficulty, ErrorType, QuestionAnalysis};

    fn record(text: &str) -> ErrorRecord {
        ErrorRecord::new("a.png", "a.png", text, QuestionAnalysis::default(), ErrorType::MadeMistake)
    }

    #[tokio::test]
    async fn test_create_strips_question_text() {
        let repo = MemoryRepository::new();
        let id = repo.create(&record("2x+3=11")).await.unwrap();

        let stored = repo.get(&id).await.unwrap();
        assert_eq!(stored.record_id.as_deref(), Some(id.as_str()));
        assert!(stored.question_text.is_none());
    }

    #[tokio::test]
    async fn test_list_paginates_in_insert_order() {
        let repo = MemoryRepository::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(repo.create(&record(&format!("题{}", i))).await.unwrap());
        }

        let page = repo.list(2, 1).await.unwrap();
        let got: Vec<_> = page.iter().filter_map(|r| r.record_id.clone()).collect();
        assert_eq!(got, vec![ids[1].clone(), ids[2].clone()]);
    }

    #[tokio::test]
    async fn test_feedback_requires_existing_master() {
        let repo = MemoryRepository::new();
        let question = FeedbackQuestion {
            master_question_id: "rec-missing".to_string(),
            question_content: "3x+1=7".to_string(),
            difficulty: Difficulty::Basic,
            standard_answer: "x=2".to_string(),
            explanation: None,
            student_answer: None,
            is_correct: None,
            created_at: chrono::Local::now(),
        };

        let err = repo.append_feedback(&question).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
