use std::path::{Path, PathBuf};

/// 按日期创建输出子目录：`<base>/<YYYY-MM-DD>`
pub async fn create_dated_dir(base_dir: &Path) -> std::io::Result<PathBuf> {
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let dir = base_dir.join(today);
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_dated_dir_is_idempotent() {
        let base = tempfile::tempdir().unwrap();
        let first = create_dated_dir(base.path()).await.unwrap();
        let second = create_dated_dir(base.path()).await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
        assert_eq!(first.parent(), Some(base.path()));
    }
}
