//! 数据模型
//!
//! 模型能力注册表、上游线格式类型与工作流运行状态

pub mod capability;
pub mod chat;
pub mod workflow;

pub use capability::{ApiProtocol, ModelCapability, ModelRegistry, MODELS};
pub use chat::{
    ChatMessage, ContentPart, HistoryMessage, ImageData, ImageUrl, LangchainChatRequest,
    MessageContent, OpenApiChatRequest,
};
pub use workflow::{
    DocumentMeta, ResultMetadata, RunRegistry, RunStatus, RunStatusView, WorkflowResult,
    WorkflowRun,
};
