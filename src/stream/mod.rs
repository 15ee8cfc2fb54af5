//! 流处理模块
//!
//! 上游字节流 → 行重组 → 载荷解析 → 归一化 `StreamEvent` → 下发端

pub mod events;
pub mod parsers;
pub mod relay;
pub mod replay;

pub use events::{ChannelSink, EventSink, StreamEvent};
pub use relay::{ChunkRelay, DATA_PREFIX, DONE_SENTINEL};
pub use replay::{replay_section, replay_text, ReplayOptions};
