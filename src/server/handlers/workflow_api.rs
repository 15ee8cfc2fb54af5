//! 工作流入口处理器
//!
//! 接收 multipart 文档上传，校验后启动工作流，以 NDJSON 帧流式返回
//! `StreamEvent`。流式开始前的失败以 JSON 错误响应返回；流式开始后
//! 的失败由编排器在已打开的流内发出终止 `error` 帧（响应头此时已经
//! 发出，无法更改状态码）。
//!
//! 客户端断开时响应体被丢弃，通道下发端随即触发取消令牌，在途的
//! 上游调用一并中止。

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::error::AppError;
use crate::server::AppState;
use crate::stream::events::{ChannelSink, EventSink, StreamEvent};
use crate::workflow::WorkflowRequest;
use crate::ws::FanoutSink;

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// 上传内容
struct Upload {
    file_name: String,
    data: Bytes,
}

/// 从 multipart 请求中读取 `file` 字段
async fn read_upload(multipart: &mut Multipart) -> Result<Option<Upload>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("解析上传内容失败: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("读取上传内容失败: {e}")))?;
        return Ok(Some(Upload { file_name, data }));
    }
    Ok(None)
}

/// 启动测试用例生成工作流
pub async fn start_workflow(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let upload = match read_upload(&mut multipart).await {
        Ok(Some(upload)) => upload,
        Ok(None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "请上传文件",
                    "message": "请选择要处理的文档文件"
                })),
            )
                .into_response();
        }
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(e.to_json())).into_response();
        }
    };

    // 校验在任何阶段运行之前完成
    let outcome = state
        .validator
        .validate(&upload.file_name, upload.data.len() as u64);
    if !outcome.valid {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "文件验证失败",
                "message": outcome.message
            })),
        )
            .into_response();
    }

    // 暂存上传文件
    let upload_dir = &state.config.server.upload_dir;
    if let Err(e) = tokio::fs::create_dir_all(upload_dir).await {
        error!("[Workflow] 创建上传目录失败: {}", e);
        let err = AppError::Internal(format!("创建上传目录失败: {e}"));
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(err.to_json())).into_response();
    }
    let stored_name = format!("{}_{}", Utc::now().timestamp_millis(), upload.file_name);
    let file_path = upload_dir.join(stored_name);
    if let Err(e) = tokio::fs::write(&file_path, &upload.data).await {
        error!("[Workflow] 保存上传文件失败: {}", e);
        let err = AppError::Internal(format!("保存上传文件失败: {e}"));
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(err.to_json())).into_response();
    }

    let run_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let sink = FanoutSink::new(
        ChannelSink::new(tx, cancel.clone()),
        state.hub.clone(),
        run_id.clone(),
    );

    info!("[Workflow] 启动工作流 {}: {}", run_id, upload.file_name);
    sink.emit(StreamEvent::Start {
        message: "开始处理文件...".to_string(),
        file_name: upload.file_name.clone(),
    })
    .await;

    // 工作流在后台任务中执行，事件经通道流回响应体
    let sequencer = state.sequencer.clone();
    let extractor = state.extractor.clone();
    let generator = state.generator.clone();
    let registry = state.registry.clone();
    let model = state.config.llm.default_model.clone();
    let task_run_id = run_id.clone();
    let task_path = file_path.clone();
    tokio::spawn(async move {
        let request = WorkflowRequest {
            run_id: task_run_id.clone(),
            file_path: task_path.clone(),
            model,
        };
        match sequencer
            .run(request, extractor, generator, &sink, cancel)
            .await
        {
            Ok(_) => {}
            Err(AppError::Cancelled) => {
                info!("[Workflow] 工作流 {} 已取消", task_run_id);
            }
            Err(e) => {
                warn!("[Workflow] 工作流 {} 失败: {}", task_run_id, e);
            }
        }
        // 清理暂存文件并丢弃运行记录
        let _ = tokio::fs::remove_file(&task_path).await;
        registry.remove(&task_run_id);
    });

    // NDJSON 帧流：每个事件一帧，终止事件后关闭传输
    let body_stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            match serde_json::to_string(&event) {
                Ok(frame) => yield Ok::<_, std::convert::Infallible>(format!("{frame}\n")),
                Err(e) => warn!("[Workflow] 事件序列化失败: {}", e),
            }
            if terminal {
                break;
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|e| {
            error!("[Workflow] 构建流式响应失败: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// 查询在途工作流状态
pub async fn workflow_status(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Response {
    match state.registry.snapshot(&workflow_id) {
        Some(view) => Json(view).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "工作流不存在" })),
        )
            .into_response(),
    }
}
