//! 共享库
//!
//! 包含通知引擎及其周边服务共用的配置、错误处理、数据库连接、领域事件与可观测性等基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod observability;
