//! 侧信道信息查询处理器
//!
//! 同步读取，无副作用

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::server::AppState;
use crate::ws::connection_status;

/// 当前侧信道连接状态
pub async fn ws_status(State(state): State<AppState>) -> Json<Value> {
    Json(connection_status(&state.hub))
}

/// 侧信道地址信息
pub async fn ws_info(State(state): State<AppState>) -> Json<Value> {
    let ws_port = state.config.server.ws_port;
    Json(json!({
        "ws_port": ws_port,
        "ws_url": format!("ws://localhost:{ws_port}"),
        "timestamp": Utc::now().to_rfc3339()
    }))
}
