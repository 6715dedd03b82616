//! 图片验证 - 业务能力层
//!
//! 只负责"这张图能不能进入流程"的判断：存在、大小、可解码

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ValidationError;

pub struct ImageValidator {
    max_bytes: u64,
}

impl ImageValidator {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// 验证图片，成功时返回图片尺寸
    pub async fn validate(&self, image: &Path) -> Result<(u32, u32), ValidationError> {
        let path_str = image.display().to_string();

        let metadata = match tokio::fs::metadata(image).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Err(ValidationError::NotFound { path: path_str }),
        };

        if metadata.len() > self.max_bytes {
            return Err(ValidationError::TooLarge {
                path: path_str,
                size: metadata.len(),
                limit: self.max_bytes,
            });
        }

        let owned: PathBuf = image.to_path_buf();
        let decoded = tokio::task::spawn_blocking(move || read_dimensions(&owned))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r);

        match decoded {
            Ok((width, height)) if width > 0 && height > 0 => {
                debug!("图片验证通过: {} ({}x{})", path_str, width, height);
                Ok((width, height))
            }
            Ok((width, height)) => Err(ValidationError::Undecodable {
                path: path_str,
                reason: format!("图片尺寸为 {}x{}", width, height),
            }),
            Err(reason) => Err(ValidationError::Undecodable {
                path: path_str,
                reason,
            }),
        }
    }
}

fn read_dimensions(path: &Path) -> Result<(u32, u32), String> {
    image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| e.to_string())?
        .into_dimensions()
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(8, 6, image::Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_valid_png_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "q.png");

        let dims = ImageValidator::new(1024 * 1024).validate(&path).await.unwrap();
        assert_eq!(dims, (8, 6));
    }

    #[tokio::test]
    async fn test_missing_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageValidator::new(1024)
            .validate(&dir.path().join("nope.png"))
            .await;
        assert!(matches!(result, Err(ValidationError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_oversized_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "q.png");

        let result = ImageValidator::new(10).validate(&path).await;
        assert!(matches!(result, Err(ValidationError::TooLarge { limit: 10, .. })));
    }

    #[tokio::test]
    async fn test_garbage_bytes_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.png");
        std::fs::write(&path, b"definitely not an image").unwrap();

        let result = ImageValidator::new(1024).validate(&path).await;
        assert!(matches!(result, Err(ValidationError::Undecodable { .. })));
    }
}
