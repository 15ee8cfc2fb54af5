//! HTTP 服务
//!
//! 路由：
//!
//! - `POST /api/workflow/start` — 上传文档并启动工作流，返回 NDJSON 事件流
//! - `GET  /api/workflow/status/:workflow_id` — 在途运行的状态查询
//! - `GET  /api/websocket/status` — 侧信道连接数查询
//! - `GET  /api/websocket/info` — 侧信道地址信息
//! - `GET  /health` — 健康检查

pub mod handlers;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

use crate::config::AppConfig;
use crate::extract::{DocumentExtractor, FileValidator, TextExtractor};
use crate::llm::{LlmClient, TextGenerator};
use crate::models::{ModelRegistry, RunRegistry};
use crate::workflow::WorkflowSequencer;
use crate::ws::SubscriberHub;

/// multipart 编码开销的余量
const BODY_LIMIT_SLACK: u64 = 64 * 1024;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Arc<AppConfig>,
    /// 生成客户端
    pub generator: Arc<dyn TextGenerator>,
    /// 文档提取协作者
    pub extractor: Arc<dyn DocumentExtractor>,
    /// 上传校验器
    pub validator: Arc<FileValidator>,
    /// 阶段编排器
    pub sequencer: Arc<WorkflowSequencer>,
    /// 活跃运行注册表
    pub registry: Arc<RunRegistry>,
    /// 侧信道订阅者集合
    pub hub: Arc<SubscriberHub>,
}

impl AppState {
    /// 组装应用状态
    pub fn new(config: AppConfig) -> Self {
        let model_registry = Arc::new(ModelRegistry::new(config.llm.default_model.clone()));
        let registry = Arc::new(RunRegistry::new());

        Self {
            generator: Arc::new(LlmClient::new(config.llm.clone(), model_registry)),
            extractor: Arc::new(TextExtractor),
            validator: Arc::new(FileValidator::new(config.server.max_file_size)),
            sequencer: Arc::new(WorkflowSequencer::new(registry.clone())),
            registry,
            hub: Arc::new(SubscriberHub::new()),
            config: Arc::new(config),
        }
    }
}

/// 构建路由
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.server.max_file_size + BODY_LIMIT_SLACK;

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/workflow/start",
            post(handlers::workflow_api::start_workflow),
        )
        .route(
            "/api/workflow/status/:workflow_id",
            get(handlers::workflow_api::workflow_status),
        )
        .route("/api/websocket/status", get(handlers::ws_api::ws_status))
        .route("/api/websocket/info", get(handlers::ws_api::ws_info))
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(body_limit as usize)),
        )
        .with_state(state)
}

/// 启动 HTTP 服务
pub async fn run_server(state: AppState, port: u16) -> std::io::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("[Server] 服务器运行在 http://localhost:{}", port);
    axum::serve(listener, router).await
}

/// 健康检查
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
