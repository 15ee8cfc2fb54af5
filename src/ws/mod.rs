//! WebSocket 侧信道
//!
//! 与主 NDJSON 响应流独立的持久双向连接，用于带外的状态订阅：
//!
//! - 连接建立后服务端下发 `connection` 事件与分配的客户端 ID
//! - `{type:"ping"}` → `{type:"pong"}`
//! - `{type:"subscribe", workflow_id}` → `subscribed` 确认并开始接收
//!   匹配主题的广播
//! - 其余/非法消息回复 `error`；连接关闭时从订阅表移除
//!
//! 订阅表是唯一的共享可变结构；每个连接任务只写自己的表项，
//! 广播方只读遍历，无需额外加锁。

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::stream::events::{EventSink, StreamEvent};

/// 连接句柄
#[derive(Debug)]
struct ClientHandle {
    tx: mpsc::UnboundedSender<Message>,
    workflow_id: Option<String>,
}

/// 订阅者集合
#[derive(Debug, Default)]
pub struct SubscriberHub {
    clients: DashMap<String, ClientHandle>,
}

impl SubscriberHub {
    /// 创建订阅者集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接
    pub(crate) fn register(&self, client_id: &str, tx: mpsc::UnboundedSender<Message>) {
        self.clients.insert(
            client_id.to_string(),
            ClientHandle {
                tx,
                workflow_id: None,
            },
        );
    }

    /// 设置连接订阅的工作流主题
    pub(crate) fn set_topic(&self, client_id: &str, workflow_id: String) {
        if let Some(mut entry) = self.clients.get_mut(client_id) {
            entry.workflow_id = Some(workflow_id);
        }
    }

    /// 移除连接
    pub(crate) fn remove(&self, client_id: &str) {
        self.clients.remove(client_id);
    }

    /// 当前连接数
    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// 广播消息到所有连接，返回送达数量
    pub fn broadcast(&self, message: &Value) -> usize {
        let text = message.to_string();
        self.clients
            .iter()
            .filter(|entry| entry.value().tx.send(Message::Text(text.clone())).is_ok())
            .count()
    }

    /// 向订阅指定工作流的连接发送事件，返回送达数量
    ///
    /// 事件附加工作流 ID 与服务端时间戳
    pub fn send_to_workflow(&self, workflow_id: &str, event: &StreamEvent) -> usize {
        let envelope = stamp_envelope(event, workflow_id).to_string();
        self.clients
            .iter()
            .filter(|entry| entry.value().workflow_id.as_deref() == Some(workflow_id))
            .filter(|entry| entry.value().tx.send(Message::Text(envelope.clone())).is_ok())
            .count()
    }
}

/// 为事件附加工作流 ID 与服务端时间戳
pub fn stamp_envelope(event: &StreamEvent, workflow_id: &str) -> Value {
    let mut value = serde_json::to_value(event).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("workflow_id".to_string(), json!(workflow_id));
        obj.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
    }
    value
}

/// 同时写入主下发端并向侧信道订阅者扇出的下发端
pub struct FanoutSink<Inner: EventSink> {
    inner: Inner,
    hub: Arc<SubscriberHub>,
    workflow_id: String,
}

impl<Inner: EventSink> FanoutSink<Inner> {
    /// 创建扇出下发端
    pub fn new(inner: Inner, hub: Arc<SubscriberHub>, workflow_id: impl Into<String>) -> Self {
        Self {
            inner,
            hub,
            workflow_id: workflow_id.into(),
        }
    }
}

#[async_trait::async_trait]
impl<Inner: EventSink> EventSink for FanoutSink<Inner> {
    async fn emit(&self, event: StreamEvent) {
        self.hub.send_to_workflow(&self.workflow_id, &event);
        self.inner.emit(event).await;
    }
}

/// 客户端消息的处理动作
#[derive(Debug, PartialEq)]
pub enum ClientAction {
    /// 直接回复
    Reply(Value),
    /// 订阅工作流并回复确认
    Subscribe { workflow_id: String, reply: Value },
}

/// 解析并处理一条客户端消息
pub fn handle_client_message(raw: &str) -> ClientAction {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => {
            return ClientAction::Reply(json!({
                "type": "error",
                "message": "消息格式错误"
            }));
        }
    };

    match value.get("type").and_then(Value::as_str) {
        Some("ping") => ClientAction::Reply(json!({
            "type": "pong",
            "timestamp": Utc::now().to_rfc3339()
        })),
        Some("subscribe") => {
            let workflow_id = value
                .get("workflow_id")
                .or_else(|| value.get("topic"))
                .and_then(Value::as_str);
            match workflow_id {
                Some(id) => ClientAction::Subscribe {
                    workflow_id: id.to_string(),
                    reply: json!({
                        "type": "subscribed",
                        "workflow_id": id,
                        "message": "已订阅工作流更新"
                    }),
                },
                None => ClientAction::Reply(json!({
                    "type": "error",
                    "message": "缺少 workflow_id"
                })),
            }
        }
        _ => ClientAction::Reply(json!({
            "type": "error",
            "message": "未知的消息类型"
        })),
    }
}

/// 启动侧信道 WebSocket 服务器
pub async fn run_ws_server(hub: Arc<SubscriberHub>, port: u16) -> std::io::Result<()> {
    let router = Router::new().route("/", get(ws_handler)).with_state(hub);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("[WebSocket] 侧信道服务器运行在 ws://localhost:{}", port);
    axum::serve(listener, router).await
}

/// WebSocket 升级入口
async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<SubscriberHub>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// 单个连接的处理循环
async fn handle_socket(socket: WebSocket, hub: Arc<SubscriberHub>) {
    let client_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    hub.register(&client_id, tx.clone());
    info!("[WebSocket] 客户端连接: {}", client_id);

    // 欢迎消息
    let welcome = json!({
        "type": "connection",
        "message": "WebSocket连接成功",
        "client_id": client_id,
        "timestamp": Utc::now().to_rfc3339()
    });
    let _ = tx.send(Message::Text(welcome.to_string()));

    // 发送任务：把队列中的消息写到连接上
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => {
                debug!("[WebSocket] 收到消息: {}", text);
                match handle_client_message(&text) {
                    ClientAction::Reply(reply) => {
                        let _ = tx.send(Message::Text(reply.to_string()));
                    }
                    ClientAction::Subscribe { workflow_id, reply } => {
                        hub.set_topic(&client_id, workflow_id);
                        let _ = tx.send(Message::Text(reply.to_string()));
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    hub.remove(&client_id);
    send_task.abort();
    info!("[WebSocket] 客户端断开: {}", client_id);
}

/// 连接状态查询
pub fn connection_status(hub: &SubscriberHub) -> Value {
    json!({
        "connections": hub.connection_count(),
        "timestamp": Utc::now().to_rfc3339()
    })
}
