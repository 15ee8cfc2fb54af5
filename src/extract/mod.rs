//! 文档提取与上传校验
//!
//! 提取是工作流的外部协作者：编排器只依赖 `DocumentExtractor` 接口。
//! 内置实现处理纯文本文档；PDF 等格式的解析由外部服务完成后以同样
//! 的接口接入。

use std::path::Path;

use async_trait::async_trait;

use crate::error::AppError;

/// 估算页数时每页的字符数
const PAGE_CHAR_COUNT: usize = 3000;

/// 提取结果
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    /// 文档文本
    pub text: String,
    /// 页数
    pub page_count: usize,
    /// 文件大小（字节）
    pub file_size: u64,
    /// 文件名
    pub file_name: String,
}

/// 文档提取接口
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// 提取文档文本与元信息
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, AppError>;
}

/// 纯文本提取器
///
/// 页数按换页符切分，无换页符时按字符数估算，至少 1 页
#[derive(Debug, Default)]
pub struct TextExtractor;

#[async_trait]
impl DocumentExtractor for TextExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, AppError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::Extraction(format!("文件读取失败: {e}")))?;

        let text = String::from_utf8_lossy(&bytes).to_string();
        if text.trim().is_empty() {
            return Err(AppError::Extraction("文档内容为空".to_string()));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(ExtractedDocument {
            page_count: estimate_page_count(&text),
            file_size: bytes.len() as u64,
            file_name,
            text,
        })
    }
}

/// 估算页数
fn estimate_page_count(text: &str) -> usize {
    let form_feeds = text.matches('\u{c}').count();
    if form_feeds > 0 {
        return form_feeds + 1;
    }
    text.chars().count().div_ceil(PAGE_CHAR_COUNT).max(1)
}

/// 校验结果
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    /// 是否通过
    pub valid: bool,
    /// 结果说明
    pub message: String,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self {
            valid: true,
            message: "文件验证通过".to_string(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// 上传文件校验器
#[derive(Debug, Clone)]
pub struct FileValidator {
    max_file_size: u64,
    supported_exts: &'static [&'static str],
}

impl FileValidator {
    /// 创建校验器
    pub fn new(max_file_size: u64) -> Self {
        Self {
            max_file_size,
            supported_exts: &["txt", "md"],
        }
    }

    /// 校验上传文件
    pub fn validate(&self, file_name: &str, size: u64) -> ValidationOutcome {
        if file_name.trim().is_empty() {
            return ValidationOutcome::fail("文件名不能为空");
        }

        if file_name.len() > 255 {
            return ValidationOutcome::fail("文件名过长");
        }

        if file_name.contains(['<', '>', ':', '"', '/', '\\', '|', '?', '*']) {
            return ValidationOutcome::fail("文件名包含无效字符");
        }

        if size > self.max_file_size {
            return ValidationOutcome::fail(format!(
                "文件大小超过限制 (最大 {})",
                format_file_size(self.max_file_size)
            ));
        }

        let ext = Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !self.supported_exts.contains(&ext.as_str()) {
            return ValidationOutcome::fail(format!(
                "不支持的文件格式，仅支持: {}",
                self.supported_exts.join(", ")
            ));
        }

        ValidationOutcome::ok()
    }
}

/// 格式化文件大小
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    const UNITS: &[&str] = &["Bytes", "KB", "MB", "GB"];
    let exponent = (bytes as f64).log(1024.0).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    format!("{:.2} {}", value, UNITS[exponent])
        .replace(".00 ", " ")
}
