//! 模型能力注册表
//!
//! 模型名称到上游协议能力的静态映射，进程启动时构建一次，只读。
//! 协议选择在请求入口解析一次，热路径中不再做字符串匹配。

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// 上游协议变体
///
/// 决定生成请求使用哪种请求体结构
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiProtocol {
    /// 会话补全式接口 (`{query, model_name, temperature, max_tokens, history}`)
    Langchain,
    /// 消息列表式接口 (`{model, messages, temperature}`)
    OpenApi,
}

/// 模型能力条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCapability {
    /// 上游模型名称
    pub name: &'static str,
    /// 展示标签
    pub label: &'static str,
    /// 使用的协议变体
    pub protocol: ApiProtocol,
    /// 是否支持多模态（图片）输入
    pub multimodal: bool,
    /// 是否支持扩展推理（思维链）
    pub think: bool,
}

/// 支持的模型表
pub const MODELS: &[ModelCapability] = &[
    ModelCapability {
        name: "Qwen2.5-VL-72B",
        label: "qwen2.5-vl-72b",
        protocol: ApiProtocol::OpenApi,
        multimodal: true,
        think: false,
    },
    ModelCapability {
        name: "deepseek-r1-distill",
        label: "deepseekR1-14b",
        protocol: ApiProtocol::Langchain,
        multimodal: false,
        think: true,
    },
    ModelCapability {
        name: "qwen2.5-32b",
        label: "qwen2.5-32b",
        protocol: ApiProtocol::Langchain,
        multimodal: false,
        think: false,
    },
    ModelCapability {
        name: "Qwen3-32B",
        label: "qwen3-32b",
        protocol: ApiProtocol::OpenApi,
        multimodal: false,
        think: true,
    },
    ModelCapability {
        name: "Qwen3-235B-A22B",
        label: "qwen3-235b-a22b",
        protocol: ApiProtocol::OpenApi,
        multimodal: false,
        think: true,
    },
];

/// 按模型名称索引的能力表
static MODEL_INDEX: Lazy<HashMap<&'static str, &'static ModelCapability>> =
    Lazy::new(|| MODELS.iter().map(|m| (m.name, m)).collect());

/// 兜底能力：默认模型也未注册时使用
const FALLBACK: ModelCapability = ModelCapability {
    name: "qwen2.5-32b",
    label: "qwen2.5-32b",
    protocol: ApiProtocol::Langchain,
    multimodal: false,
    think: false,
};

/// 模型能力注册表
///
/// 未知模型名称回退到配置的默认模型，不抛出错误（宽容回退策略，
/// 仅记录告警日志以便发现配置笔误）。
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    default_model: String,
}

impl ModelRegistry {
    /// 创建注册表
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
        }
    }

    /// 精确查找模型能力
    pub fn lookup(&self, name: &str) -> Option<&'static ModelCapability> {
        MODEL_INDEX.get(name).copied()
    }

    /// 解析模型能力，未知名称回退到默认模型
    pub fn resolve(&self, name: &str) -> &'static ModelCapability {
        if let Some(capability) = self.lookup(name) {
            return capability;
        }
        tracing::warn!(
            "[ModelRegistry] 未知模型 {}，回退到默认模型 {}",
            name,
            self.default_model
        );
        self.lookup(&self.default_model).unwrap_or(&FALLBACK)
    }

    /// 默认模型名称
    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}
