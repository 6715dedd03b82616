pub mod contracts;
pub mod handwriting_cleaner;
pub mod image_validator;
pub mod llm_service;
pub mod memory_repository;

pub use contracts::{
    CleanupService, CompletionRequest, GenerationService, RecognitionService, RecordRepository,
};
pub use handwriting_cleaner::HandwritingCleaner;
pub use image_validator::ImageValidator;
pub use llm_service::{LlmService, VisionRecognizer};
pub use memory_repository::MemoryRepository;
