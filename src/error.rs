//! 错误类型定义
//!
//! 定义工作流处理过程中可能发生的错误

use thiserror::Error;

/// 应用错误
///
/// 传播策略：除行级 `Parse` 错误（在中继循环内就地恢复）外，
/// 每个失败恰好产生一个 `error` 事件并使所在的 Future 以错误结束。
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// 请求校验失败（文件缺失、格式不支持等，在任何阶段运行前出现）
    #[error("请求校验失败: {0}")]
    Validation(String),

    /// 文档解析失败
    #[error("文档解析失败: {0}")]
    Extraction(String),

    /// 上游生成接口返回非 200 状态码，不自动重试
    #[error("上游请求失败，状态码: {status}")]
    Upstream { status: u16 },

    /// 流数据解析失败（单行级别，通常被就地跳过）
    #[error("流数据解析失败: {0}")]
    Parse(String),

    /// 流式响应传输层读取错误
    #[error("流读取错误: {0}")]
    Transport(String),

    /// 工作流阶段执行失败
    #[error("阶段 {stage} 执行失败: {message}")]
    StageFailure { stage: String, message: String },

    /// 请求已取消
    #[error("请求已取消")]
    Cancelled,

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Extraction(_) => 422,
            AppError::Upstream { .. } => 502,
            AppError::Parse(_) => 500,
            AppError::Transport(_) => 502,
            AppError::StageFailure { .. } => 500,
            AppError::Cancelled => 499,
            AppError::Config(_) => 500,
            AppError::Internal(_) => 500,
        }
    }

    /// 获取错误类型字符串
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Extraction(_) => "extraction_error",
            AppError::Upstream { .. } => "upstream_error",
            AppError::Parse(_) => "parse_error",
            AppError::Transport(_) => "transport_error",
            AppError::StageFailure { .. } => "stage_failure",
            AppError::Cancelled => "cancelled",
            AppError::Config(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// 转换为 JSON 错误响应体
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.status_code()
            }
        })
    }
}
