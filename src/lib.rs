//! 多机测试系统库
//! 提供 SSH 会话客户端和多机测试分发器

pub mod config;
pub mod dispatch;
pub mod error;
pub mod ssh;
pub mod telemetry;

pub use common;
