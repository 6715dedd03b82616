//! 去手写服务 - 业务能力层
//!
//! 基础实现：把彩色笔迹（蓝 / 红笔）刷白，再转灰度并拉伸对比度。
//! 没有检测到手写时原样输出灰度图，不视为失败。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::{GrayImage, Luma, RgbImage};
use tracing::debug;

use crate::error::ServiceError;
use crate::services::contracts::CleanupService;
use crate::utils::upload_dir::create_dated_dir;

/// 饱和度超过该值的像素视为彩色笔迹
const INK_SATURATION_THRESHOLD: f32 = 0.35;
/// 过暗的像素即使有色偏也保留（印刷体黑字）
const INK_MIN_VALUE: f32 = 0.25;

pub struct HandwritingCleaner {
    output_dir: PathBuf,
}

impl HandwritingCleaner {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl CleanupService for HandwritingCleaner {
    async fn clean(&self, image: &Path) -> Result<PathBuf, ServiceError> {
        let dir = create_dated_dir(&self.output_dir)
            .await
            .map_err(|source| ServiceError::Io {
                path: self.output_dir.display().to_string(),
                source,
            })?;

        let file_name = image
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "image.png".to_string());
        let output = dir.join(format!("cleaned_{}", file_name));

        let input = image.to_path_buf();
        let target = output.clone();
        let removed = tokio::task::spawn_blocking(move || clean_file(&input, &target))
            .await
            .map_err(|e| ServiceError::Other(format!("去手写任务异常退出: {}", e)))??;

        debug!("去手写完成: {} (刷白 {} 个笔迹像素)", output.display(), removed);
        Ok(output)
    }
}

fn clean_file(input: &Path, output: &Path) -> Result<usize, ServiceError> {
    let image_error = |path: &Path, e: image::ImageError| ServiceError::Image {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let rgb = image::open(input)
        .map_err(|e| image_error(input, e))?
        .to_rgb8();
    let (cleaned, removed) = remove_colored_ink(&rgb);
    stretch_contrast(cleaned)
        .save(output)
        .map_err(|e| image_error(output, e))?;
    Ok(removed)
}

/// 彩色笔迹刷白并转灰度，返回灰度图和被刷白的像素数
pub fn remove_colored_ink(rgb: &RgbImage) -> (GrayImage, usize) {
    let mut removed = 0;
    let gray = GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let (max, min) = (r.max(g).max(b) as f32 / 255.0, r.min(g).min(b) as f32 / 255.0);
        let saturation = if max > 0.0 { (max - min) / max } else { 0.0 };

        if saturation > INK_SATURATION_THRESHOLD && max > INK_MIN_VALUE {
            removed += 1;
            Luma([255])
        } else {
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            Luma([luma.round().clamp(0.0, 255.0) as u8])
        }
    });
    (gray, removed)
}

/// 线性拉伸到 0..=255
fn stretch_contrast(mut gray: GrayImage) -> GrayImage {
    let (lo, hi) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if hi <= lo {
        return gray;
    }

    let range = (hi - lo) as f32;
    for pixel in gray.pixels_mut() {
        let v = (pixel.0[0] - lo) as f32 * 255.0 / range;
        pixel.0[0] = v.round() as u8;
    }
    gray
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_blue_ink_removed_black_print_kept() {
        let mut rgb = RgbImage::from_pixel(3, 1, Rgb([250, 250, 250]));
        rgb.put_pixel(0, 0, Rgb([20, 40, 200])); // 蓝笔
        rgb.put_pixel(1, 0, Rgb([10, 10, 10])); // 印刷黑字

        let (gray, removed) = remove_colored_ink(&rgb);
        assert_eq!(removed, 1);
        assert_eq!(gray.get_pixel(0, 0).0[0], 255);
        assert!(gray.get_pixel(1, 0).0[0] < 20);
    }

    #[tokio::test]
    async fn test_clean_writes_into_dated_dir() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("q.png");
        RgbImage::from_pixel(4, 4, Rgb([200, 30, 30])).save(&input).unwrap();

        let cleaner = HandwritingCleaner::new(dir.path().join("uploads"));
        let output = cleaner.clean(&input).await.unwrap();

        assert!(output.exists());
        assert_eq!(output.file_name().unwrap(), "cleaned_q.png");
    }

    #[tokio::test]
    async fn test_unreadable_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.png");
        std::fs::write(&input, b"xx").unwrap();

        let cleaner = HandwritingCleaner::new(dir.path().join("uploads"));
        let result = cleaner.clean(&input).await;
        assert!(matches!(result, Err(ServiceError::Image { .. })));
    }
}
