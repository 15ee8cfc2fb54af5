//! 配置模块
//!
//! 所有配置在进程启动时从环境变量加载一次，随后以 `Arc<AppConfig>`
//! 显式传入服务状态与生成客户端，不使用全局可变状态。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// 默认 HTTP 端口
const DEFAULT_PORT: u16 = 3000;
/// 默认侧信道 WebSocket 端口
const DEFAULT_WS_PORT: u16 = 3001;
/// 默认最大上传文件大小 (10MB)
const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP 服务端口
    pub port: u16,
    /// 侧信道 WebSocket 端口
    pub ws_port: u16,
    /// 最大上传文件大小（字节）
    pub max_file_size: u64,
    /// 上传文件暂存目录
    pub upload_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        // 默认上传目录: ~/.testcast/uploads
        let upload_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".testcast")
            .join("uploads");

        Self {
            port: DEFAULT_PORT,
            ws_port: DEFAULT_WS_PORT,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            upload_dir,
        }
    }
}

/// 上游生成服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// 上游服务基础地址
    pub base_url: String,
    /// OpenAPI 协议所需的 API Key
    pub api_key: String,
    /// 默认模型名称
    pub default_model: String,
    /// 默认温度
    pub temperature: f32,
    /// 检索阈值（Langchain 协议参数）
    pub score_threshold: f32,
    /// 最大生成 token 数
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            default_model: "qwen2.5-32b".to_string(),
            temperature: 0.0,
            score_threshold: 0.0,
            max_tokens: 20000,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 上游生成服务配置
    pub llm: LlmConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    ///
    /// 必需: `BASE_URL`；其余变量缺省时使用默认值。
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::default();

        let base_url = std::env::var("BASE_URL")
            .map_err(|_| AppError::Config("未配置 BASE_URL".to_string()))?;
        if base_url.trim().is_empty() {
            return Err(AppError::Config("BASE_URL 不能为空".to_string()));
        }
        config.llm.base_url = base_url.trim_end_matches('/').to_string();

        if let Ok(key) = std::env::var("API_KEY") {
            config.llm.api_key = key;
        } else {
            tracing::warn!("[Config] 未配置 API_KEY，OpenAPI 协议调用将不携带鉴权头");
        }

        if let Ok(model) = std::env::var("DEFAULT_MODEL") {
            if !model.trim().is_empty() {
                config.llm.default_model = model;
            }
        }

        if let Some(port) = parse_env("PORT") {
            config.server.port = port;
        }
        if let Some(ws_port) = parse_env("WS_PORT") {
            config.server.ws_port = ws_port;
        }
        if let Some(max) = parse_env("MAX_FILE_SIZE") {
            config.server.max_file_size = max;
        }
        if let Ok(dir) = std::env::var("UPLOAD_DIR") {
            if !dir.trim().is_empty() {
                config.server.upload_dir = PathBuf::from(dir);
            }
        }

        Ok(config)
    }
}

/// 解析数值型环境变量，无法解析时返回 None
fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
