//! 讲义读取
//!
//! `.pdf` 文件交给 `pdf-extract` 在阻塞线程上提取文本，其他文件按 UTF-8 文本读取。

use std::path::Path;

use tracing::{debug, info};

use crate::error::{AppError, AppResult, FileError};

/// 讲义读取器
pub struct SourceLoader;

impl SourceLoader {
    /// 读取讲义全文
    ///
    /// # 参数
    /// - `path`: PDF 或文本文件路径
    ///
    /// # 返回
    /// 返回提取出的文本
    pub async fn load(path: &Path) -> AppResult<String> {
        if !path.is_file() {
            return Err(FileError::NotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let text = if Self::is_pdf(path) {
            info!("📄 提取 PDF 文本: {}", path.display());
            let owned = path.to_path_buf();
            tokio::task::spawn_blocking(move || pdf_extract::extract_text(&owned))
                .await
                .map_err(|e| FileError::ExtractFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
                .map_err(|e| FileError::ExtractFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
        } else {
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| AppError::file_read_failed(path, e))?
        };

        debug!("讲义读取完成: {} 字符", text.chars().count());
        Ok(text)
    }

    fn is_pdf(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false)
    }
}
